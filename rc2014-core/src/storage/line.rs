//! Accumulates bytes from the host into command lines.

/// Maximum length of a command line; longer input is truncated.
pub const MAX_LINE: usize = 255;

/// Line assembler for the storage device.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte. Returns the finished line on CR, LF or NUL.
    ///
    /// The returned line may be empty.
    pub fn feed(&mut self, byte: u8) -> Option<Vec<u8>> {
        match byte {
            b'\r' | b'\n' | 0x00 => Some(std::mem::take(&mut self.buf)),
            _ => {
                if self.buf.len() < MAX_LINE {
                    self.buf.push(byte);
                }
                None
            }
        }
    }

    /// Bytes accumulated so far.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
