//! Host console abstraction.
//!
//! The `HostConsole` trait is the user's side of the console link: it shows
//! bytes coming out of the backchannel and supplies typed keys. It works
//! identically for tests (HeadlessConsole) and real terminals.

use std::collections::VecDeque;

/// User terminal attached to the console link.
pub trait HostConsole: Send {
    /// Display a byte.
    fn write(&mut self, ch: u8);

    /// Next typed key, if any (non-blocking).
    fn get_key(&mut self) -> Option<u8>;
}

/// Headless console for testing - captures output, provides queued input.
#[derive(Default)]
pub struct HeadlessConsole {
    output: Vec<u8>,
    input: VecDeque<u8>,
}

impl HeadlessConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-queued input.
    pub fn with_input(input: &[u8]) -> Self {
        Self {
            output: Vec::new(),
            input: input.iter().copied().collect(),
        }
    }

    /// Queue input characters.
    pub fn queue_input(&mut self, input: &[u8]) {
        self.input.extend(input.iter().copied());
    }

    /// Get all output as bytes.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Get output as string (lossy UTF-8 conversion).
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    /// True once every queued key has been consumed.
    pub fn input_drained(&self) -> bool {
        self.input.is_empty()
    }

    pub fn clear_output(&mut self) {
        self.output.clear();
    }
}

impl HostConsole for HeadlessConsole {
    fn write(&mut self, ch: u8) {
        self.output.push(ch);
    }

    fn get_key(&mut self) -> Option<u8> {
        self.input.pop_front()
    }
}
