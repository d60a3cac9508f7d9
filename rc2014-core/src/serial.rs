//! MC6850-style serial port interface shared by the emulated peripherals.

use bitflags::bitflags;

bitflags! {
    /// ACIA status register as seen by the emulated CPU.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AciaStatus: u8 {
        /// Receive data register full.
        const RX_DATA_READY = 0b0000_0001;
        /// Transmit data register empty.
        const TX_DATA_EMPTY = 0b0000_0010;
        /// Data carrier detect.
        const DCD           = 0b0000_0100;
        /// Clear to send.
        const CTS           = 0b0000_1000;
    }
}

impl AciaStatus {
    /// Status of an always-connected, always-writable link.
    pub fn connected(rx_ready: bool) -> Self {
        let mut sts = Self::TX_DATA_EMPTY | Self::DCD | Self::CTS;
        sts.set(Self::RX_DATA_READY, rx_ready);
        sts
    }
}

/// Control register bit enabling the receive interrupt.
pub const CONTROL_RX_IRQ: u8 = 0x80;

/// A peripheral attached to an ACIA port pair.
///
/// The CPU side drives every call; implementations never block and advance
/// any pending work from inside these calls.
pub trait SerialPort {
    /// Read the status register.
    fn status(&mut self) -> AciaStatus;

    /// A byte written by the CPU to the data register.
    fn transmit(&mut self, byte: u8);

    /// A byte read by the CPU from the data register.
    fn receive(&mut self) -> u8;

    /// A write to the control register (baud rate, framing). Ignored by default.
    fn control(&mut self, _value: u8) {}
}
