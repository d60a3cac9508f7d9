//! RC2014 machine - Z80 CPU wired to the emulated serial peripherals.

use std::num::NonZeroU16;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};
use z80emu::host::TsCounter;
use z80emu::{Clock, Cpu, CpuDebug, Io, Memory, Z80NMOS};

use crate::backchannel::Backchannel;
use crate::config::{Config, PortConfig};
use crate::console::HostConsole;
use crate::error::{RcError, RcResult};
use crate::fs::Volume;
use crate::serial::{SerialPort, CONTROL_RX_IRQ};
use crate::storage::StorageDevice;

/// Type alias for the clock.
type TsClock = TsCounter<i32>;

const MEMORY_SIZE: usize = 0x10000;

/// Why [`Machine::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// CPU halted with no interrupt able to wake it.
    Halt,
    /// The stop flag was raised.
    Stopped,
}

/// Information about a finished run.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub reason: StopReason,
    pub t_states: u64,
    pub pc: u16,
}

/// Machine bus - memory + I/O.
struct Bus<'a> {
    memory: &'a mut [u8; MEMORY_SIZE],
    rom_end: usize,
    ports: PortConfig,
    console_control: &'a mut u8,
    backchannel: &'a mut Backchannel,
    storage: &'a mut StorageDevice,
}

impl Memory for Bus<'_> {
    type Timestamp = i32;

    fn read_debug(&self, addr: u16) -> u8 {
        self.memory[addr as usize]
    }

    fn read_mem(&self, addr: u16, _ts: Self::Timestamp) -> u8 {
        self.memory[addr as usize]
    }

    fn write_mem(&mut self, addr: u16, value: u8, _ts: Self::Timestamp) {
        if (addr as usize) >= self.rom_end {
            self.memory[addr as usize] = value;
        }
    }
}

impl Io for Bus<'_> {
    type Timestamp = i32;
    type WrIoBreak = ();
    type RetiBreak = ();

    fn read_io(&mut self, port: u16, _ts: Self::Timestamp) -> (u8, Option<NonZeroU16>) {
        // The upper address lines carry A or B; devices decode the low byte.
        let port = port as u8;
        let console = self.ports.console;
        let storage = self.ports.storage;

        let value = if port == console {
            self.backchannel.status().bits()
        } else if port == console.wrapping_add(1) {
            self.backchannel.receive()
        } else if port == storage {
            self.storage.status().bits()
        } else if port == storage.wrapping_add(1) {
            self.storage.receive()
        } else {
            0xFF
        };
        (value, None)
    }

    fn write_io(
        &mut self,
        port: u16,
        value: u8,
        _ts: Self::Timestamp,
    ) -> (Option<Self::WrIoBreak>, Option<NonZeroU16>) {
        let port = port as u8;
        let console = self.ports.console;
        let storage = self.ports.storage;

        if port == console {
            *self.console_control = value;
            self.backchannel.control(value);
        } else if port == console.wrapping_add(1) {
            self.backchannel.transmit(value);
        } else if port == storage {
            self.storage.control(value);
        } else if port == storage.wrapping_add(1) {
            self.storage.transmit(value);
        }
        (None, None)
    }
}

/// An RC2014 with a console ACIA and an SD card ACIA.
pub struct Machine<C: HostConsole> {
    /// Z80 CPU.
    cpu: Z80NMOS,
    /// Clock/T-state counter.
    clock: TsClock,
    /// 64KB memory; `0..rom_end` ignores writes.
    memory: [u8; MEMORY_SIZE],
    rom_end: usize,
    ports: PortConfig,
    /// Last value written to the console control register.
    console_control: u8,
    console: C,
    backchannel: Backchannel,
    storage: StorageDevice,
}

impl<C: HostConsole> Machine<C> {
    /// Create a machine with empty memory.
    pub fn new(
        console: C,
        backchannel: Backchannel,
        storage: StorageDevice,
        ports: PortConfig,
    ) -> Self {
        Self {
            cpu: Z80NMOS::default(),
            clock: TsClock::default(),
            memory: [0; MEMORY_SIZE],
            rom_end: 0,
            ports,
            console_control: 0,
            console,
            backchannel,
            storage,
        }
    }

    /// Build a machine from configuration, loading the ROM image if one is set.
    pub fn from_config(console: C, config: &Config) -> RcResult<Self> {
        let backchannel = Backchannel::new(Volume::new(&config.backchannel.root));
        let storage = StorageDevice::new(Volume::new(&config.storage.root));
        let mut machine = Self::new(console, backchannel, storage, config.ports);

        if let Some(rom) = &config.rom {
            let image = std::fs::read(rom)?;
            machine.load_rom(&image)?;
            info!(rom = %rom.display(), bytes = image.len(), "ROM loaded");
        }

        Ok(machine)
    }

    /// Load a ROM image at address 0 and write-protect it.
    pub fn load_rom(&mut self, image: &[u8]) -> RcResult<()> {
        if image.len() > MEMORY_SIZE {
            return Err(RcError::RomTooLarge(image.len()));
        }
        self.memory[..image.len()].copy_from_slice(image);
        self.rom_end = image.len();
        Ok(())
    }

    pub fn read_byte(&self, address: u16) -> u8 {
        self.memory[address as usize]
    }

    pub fn pc(&self) -> u16 {
        self.cpu.get_pc()
    }

    /// Get console reference.
    pub fn console(&self) -> &C {
        &self.console
    }

    /// Get mutable console reference.
    pub fn console_mut(&mut self) -> &mut C {
        &mut self.console
    }

    pub fn backchannel(&self) -> &Backchannel {
        &self.backchannel
    }

    pub fn backchannel_mut(&mut self) -> &mut Backchannel {
        &mut self.backchannel
    }

    pub fn storage(&self) -> &StorageDevice {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut StorageDevice {
        &mut self.storage
    }

    /// Power-on reset: CPU and peripherals. Memory contents are kept.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.console_control = 0;
        self.backchannel.reset();
        self.storage.reset();
    }

    /// Move pending bytes between the host console and the backchannel.
    pub fn service_console(&mut self) {
        while let Some(key) = self.console.get_key() {
            self.backchannel.console_input(key);
        }
        while let Some(byte) = self.backchannel.console_output() {
            self.console.write(byte);
        }
    }

    /// Service the console, then execute one instruction (or accept an interrupt).
    pub fn step(&mut self) {
        self.service_console();

        let irq_enabled = self.console_control & CONTROL_RX_IRQ != 0;
        let mut bus = Bus {
            memory: &mut self.memory,
            rom_end: self.rom_end,
            ports: self.ports,
            console_control: &mut self.console_control,
            backchannel: &mut self.backchannel,
            storage: &mut self.storage,
        };

        if irq_enabled && bus.backchannel.remote_ready() {
            let _ = self
                .cpu
                .irq(&mut bus, &mut self.clock, None::<fn(CpuDebug)>);
        }

        let _ = self
            .cpu
            .execute_next(&mut bus, &mut self.clock, None::<fn(CpuDebug)>);
    }

    /// Run from reset until HALT or until `stop` is raised.
    pub fn run(&mut self, stop: &AtomicBool) -> RunInfo {
        self.cpu.reset();
        self.run_from_current(stop)
    }

    /// Continue from the current CPU state.
    pub fn run_from_current(&mut self, stop: &AtomicBool) -> RunInfo {
        loop {
            if stop.load(Ordering::Relaxed) {
                self.service_console();
                debug!(pc = self.cpu.get_pc(), "machine stopped");
                return self.run_info(StopReason::Stopped);
            }

            self.step();

            // A halted CPU only resumes through the console receive interrupt.
            if self.cpu.is_halt() && !self.can_wake() {
                self.service_console();
                info!(pc = self.cpu.get_pc(), "CPU halted");
                return self.run_info(StopReason::Halt);
            }
        }
    }

    fn can_wake(&self) -> bool {
        self.console_control & CONTROL_RX_IRQ != 0 && self.cpu.is_irq_allowed()
    }

    fn run_info(&self, reason: StopReason) -> RunInfo {
        RunInfo {
            reason,
            t_states: self.clock.as_timestamp() as u64,
            pc: self.cpu.get_pc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::HeadlessConsole;
    use crate::serial::AciaStatus;
    use std::fs;

    fn machine(console: HeadlessConsole) -> (tempfile::TempDir, Machine<HeadlessConsole>) {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("basic")).unwrap();
        fs::create_dir(tmp.path().join("sd")).unwrap();
        let m = Machine::new(
            console,
            Backchannel::new(Volume::new(tmp.path().join("basic"))),
            StorageDevice::new(Volume::new(tmp.path().join("sd"))),
            PortConfig::default(),
        );
        (tmp, m)
    }

    /// Program that writes the NUL-terminated `msg` to `port`, then halts.
    fn print_program(port: u8, msg: &[u8]) -> Vec<u8> {
        let mut rom = vec![
            0x21, 0x0D, 0x00, // LD HL, msg
            0x7E, // loop: LD A, (HL)
            0xB7, // OR A
            0x28, 0x05, // JR Z, done
            0xD3, port, // OUT (port), A
            0x23, // INC HL
            0x18, 0xF7, // JR loop
            0x76, // done: HALT
        ];
        rom.extend_from_slice(msg);
        rom.push(0);
        rom
    }

    #[test]
    fn test_output_reaches_console() {
        let (_tmp, mut m) = machine(HeadlessConsole::new());
        m.load_rom(&print_program(0x81, b"Hi\r\n")).unwrap();

        let info = m.run(&AtomicBool::new(false));
        assert_eq!(info.reason, StopReason::Halt);
        assert_eq!(m.console().output_string(), "Hi\r\n");
    }

    #[test]
    fn test_polled_echo() {
        let program = [
            0xDB, 0x80, // loop: IN A, (0x80)
            0xE6, 0x01, // AND 1
            0x28, 0xFA, // JR Z, loop
            0xDB, 0x81, // IN A, (0x81)
            0xD3, 0x81, // OUT (0x81), A
            0x76, // HALT
        ];
        let (_tmp, mut m) = machine(HeadlessConsole::with_input(b"x"));
        m.load_rom(&program).unwrap();

        m.run(&AtomicBool::new(false));
        assert_eq!(m.console().output_string(), "x");
    }

    #[test]
    fn test_remote_backchannel_command() {
        let (tmp, mut m) = machine(HeadlessConsole::new());
        fs::create_dir(tmp.path().join("basic/games")).unwrap();
        m.load_rom(&print_program(0x81, b"\x1b{cd games\x03")).unwrap();

        m.run(&AtomicBool::new(false));
        assert_eq!(m.console().output_string(), "cwd: /games\n");
        assert_eq!(m.backchannel().cwd(), std::path::Path::new("games"));
    }

    #[test]
    fn test_storage_port() {
        let (_tmp, mut m) = machine(HeadlessConsole::new());
        m.load_rom(&print_program(0x41, b"~0:I\r")).unwrap();
        m.run(&AtomicBool::new(false));

        let dev = m.storage_mut();
        let mut out = Vec::new();
        while dev.status().contains(AciaStatus::RX_DATA_READY) {
            out.push(dev.receive());
        }
        assert_eq!(out, b"-0:N1=Card OK\n-0:Nt=EMU64\n-0:Ns=128,meg\n");
        assert!(m.console().output().is_empty());
    }

    #[test]
    fn test_rom_is_write_protected() {
        let program = [
            0x3E, 0x55, // LD A, 0x55
            0x32, 0x00, 0x00, // LD (0x0000), A
            0x32, 0x00, 0x80, // LD (0x8000), A
            0x76, // HALT
        ];
        let (_tmp, mut m) = machine(HeadlessConsole::new());
        m.load_rom(&program).unwrap();
        m.run(&AtomicBool::new(false));

        assert_eq!(m.read_byte(0x0000), 0x3E);
        assert_eq!(m.read_byte(0x8000), 0x55);
    }

    #[test]
    fn test_rom_too_large() {
        let (_tmp, mut m) = machine(HeadlessConsole::new());
        let err = m.load_rom(&vec![0; MEMORY_SIZE + 1]).unwrap_err();
        assert!(matches!(err, RcError::RomTooLarge(n) if n == MEMORY_SIZE + 1));
    }

    #[test]
    fn test_receive_interrupt_wakes_halt() {
        let mut rom = vec![0u8; 0x40];
        rom[..8].copy_from_slice(&[
            0x3E, 0x80, // LD A, 0x80
            0xD3, 0x80, // OUT (0x80), A ; RX interrupt on
            0xED, 0x56, // IM 1
            0xFB, // EI
            0x76, // HALT
        ]);
        rom[0x38..0x3F].copy_from_slice(&[
            0xDB, 0x81, // IN A, (0x81)
            0x32, 0x00, 0x80, // LD (0x8000), A
            0xF3, // DI
            0x76, // HALT
        ]);

        let (_tmp, mut m) = machine(HeadlessConsole::with_input(b"Z"));
        m.load_rom(&rom).unwrap();

        let info = m.run(&AtomicBool::new(false));
        assert_eq!(info.reason, StopReason::Halt);
        assert_eq!(m.read_byte(0x8000), b'Z');
    }

    #[test]
    fn test_reset_clears_peripherals() {
        let (_tmp, mut m) = machine(HeadlessConsole::with_input(b"q"));
        m.load_rom(&print_program(0x81, b"A")).unwrap();
        m.run(&AtomicBool::new(false));
        assert!(m.backchannel_mut().remote_ready());

        m.reset();
        assert!(!m.backchannel_mut().remote_ready());
        assert_eq!(m.pc(), 0);

        m.run(&AtomicBool::new(false));
        assert_eq!(m.console().output_string(), "AA");
    }

    #[test]
    fn test_stop_flag() {
        let (_tmp, mut m) = machine(HeadlessConsole::new());
        m.load_rom(&[0x18, 0xFE]).unwrap(); // JR $

        let info = m.run(&AtomicBool::new(true));
        assert_eq!(info.reason, StopReason::Stopped);
    }

    #[test]
    fn test_from_config_loads_rom() {
        let tmp = tempfile::tempdir().unwrap();
        let rom = tmp.path().join("test.rom");
        fs::write(&rom, [0x76]).unwrap();

        let mut config = Config::default();
        config.rom = Some(rom);
        config.backchannel.root = tmp.path().to_path_buf();
        config.storage.root = tmp.path().to_path_buf();

        let m = Machine::from_config(HeadlessConsole::new(), &config).unwrap();
        assert_eq!(m.read_byte(0), 0x76);
    }
}
