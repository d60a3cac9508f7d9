//! Escape filter - splits one direction of the console link into
//! pass-through bytes and inline backchannel commands.
//!
//! A command is framed as `ESC <start> <token...> ETX`. The filter looks one
//! byte past an ESC: if the next byte is not the start marker both bytes are
//! released unchanged. Longer escape sequences that diverge later than that
//! are not reconstructed.

use tracing::warn;

/// Escape byte that may begin a command.
pub const ESC: u8 = 0x1b;

/// Ends a captured command (Ctrl-C), shared by both directions.
pub const END_MARKER: u8 = 0x03;

/// Maximum number of token bytes captured per command.
pub const CAPTURE_CAPACITY: usize = 1024;

/// Filter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterState {
    #[default]
    Idle,
    /// An ESC was withheld, waiting for the next byte.
    EscapeSeen,
    /// Collecting a command token.
    Capturing,
}

/// Outcome of feeding one byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterEvent {
    /// Byte withheld or captured; nothing to emit.
    Held,
    /// Pass the byte through.
    Emit(u8),
    /// Pass a withheld ESC and then the byte through.
    EmitEscaped(u8),
    /// A complete command token.
    Command(Vec<u8>),
}

/// Escape filter for a single direction.
#[derive(Debug)]
pub struct EscapeFilter {
    start: u8,
    state: FilterState,
    capture: Vec<u8>,
    dropped: usize,
}

impl EscapeFilter {
    /// Create a filter that starts capturing on `ESC start`.
    pub fn new(start: u8) -> Self {
        Self {
            start,
            state: FilterState::Idle,
            capture: Vec::new(),
            dropped: 0,
        }
    }

    pub fn state(&self) -> FilterState {
        self.state
    }

    /// Bytes captured so far for the command in progress.
    pub fn captured(&self) -> &[u8] {
        &self.capture
    }

    pub fn feed(&mut self, byte: u8) -> FilterEvent {
        match self.state {
            FilterState::Idle => {
                if byte == ESC {
                    self.state = FilterState::EscapeSeen;
                    FilterEvent::Held
                } else {
                    FilterEvent::Emit(byte)
                }
            }
            FilterState::EscapeSeen => {
                if byte == self.start {
                    self.capture.clear();
                    self.dropped = 0;
                    self.state = FilterState::Capturing;
                    FilterEvent::Held
                } else {
                    self.state = FilterState::Idle;
                    FilterEvent::EmitEscaped(byte)
                }
            }
            FilterState::Capturing => {
                if byte == END_MARKER {
                    if self.dropped > 0 {
                        warn!(
                            dropped = self.dropped,
                            "backchannel command exceeded {} bytes, tail dropped", CAPTURE_CAPACITY
                        );
                    }
                    let token = std::mem::take(&mut self.capture);
                    self.reset();
                    FilterEvent::Command(token)
                } else {
                    if self.capture.len() < CAPTURE_CAPACITY {
                        self.capture.push(byte);
                    } else {
                        self.dropped += 1;
                    }
                    FilterEvent::Held
                }
            }
        }
    }

    /// Return to `Idle`, discarding any partial command.
    pub fn reset(&mut self) {
        self.state = FilterState::Idle;
        self.capture.clear();
        self.dropped = 0;
    }
}
