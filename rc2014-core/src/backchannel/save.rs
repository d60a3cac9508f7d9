//! Save capture - scrapes a BASIC `list` from the console stream into a file.
//!
//! This is a heuristic: program lines start with a digit, and the listing is
//! taken to be over at the first non-numeric line that follows at least one
//! numeric line (normally BASIC's `Ok` prompt).

use std::fs::File;
use std::io::{self, BufWriter, Write};

/// Maximum bytes kept per captured line.
pub const LINE_CAPACITY: usize = 1024;

/// Result of consuming one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStep {
    /// Byte buffered.
    Consumed,
    /// A line terminator was processed; capture continues.
    LineEnd,
    /// End of listing detected; the capture should be finished.
    Finished,
}

/// Active save capture writing program lines to `W`.
pub struct SaveCapture<W: Write = BufWriter<File>> {
    writer: W,
    path: String,
    line: Vec<u8>,
    saw_digit_line: bool,
    lines_saved: usize,
}

impl<W: Write> SaveCapture<W> {
    pub fn new(writer: W, path: impl Into<String>) -> Self {
        Self {
            writer,
            path: path.into(),
            line: Vec::new(),
            saw_digit_line: false,
            lines_saved: 0,
        }
    }

    /// Name of the file being written.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn lines_saved(&self) -> usize {
        self.lines_saved
    }

    /// Consume one byte of console output. None of it is displayed.
    pub fn consume(&mut self, byte: u8) -> io::Result<CaptureStep> {
        if byte == b'\n' || byte == b'\r' {
            let line = std::mem::take(&mut self.line);
            return self.end_line(&line);
        }

        if self.line.len() < LINE_CAPACITY {
            self.line.push(byte);
        }
        Ok(CaptureStep::Consumed)
    }

    fn end_line(&mut self, line: &[u8]) -> io::Result<CaptureStep> {
        let Some(first) = line.first() else {
            return Ok(CaptureStep::LineEnd);
        };

        if first.is_ascii_digit() {
            self.writer.write_all(line)?;
            self.writer.write_all(b"\n")?;
            self.saw_digit_line = true;
            self.lines_saved += 1;
            Ok(CaptureStep::LineEnd)
        } else if self.saw_digit_line {
            self.saw_digit_line = false;
            Ok(CaptureStep::Finished)
        } else {
            Ok(CaptureStep::LineEnd)
        }
    }

    /// Flush and hand back the writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}
