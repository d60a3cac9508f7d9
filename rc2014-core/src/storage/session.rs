//! Resumable file read session.
//!
//! The emulated card cannot block the CPU loop while it reads a file, so the
//! file is streamed one small hex chunk per poll, and only when the response
//! queue has room for a whole chunk line.

use std::fs::File;
use std::io::{ErrorKind, Read};

use tracing::warn;

use crate::queue::Spool;

/// Bytes of file data per `FS=` line.
pub const READ_CHUNK: usize = 10;

/// Free queue space required before a chunk is read.
pub const FILL_HEADROOM: usize = 2 * READ_CHUNK + 8;

/// Outcome of one fill step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStep {
    /// Not enough room in the queue; nothing read.
    Waiting,
    /// A data line was queued.
    Sent(usize),
    /// End of file reached and the end marker queued.
    Finished(u64),
}

/// An open file being streamed back to the host.
pub struct FileStreamSession<R: Read = File> {
    reader: R,
    path: String,
    sent: u64,
}

impl<R: Read> FileStreamSession<R> {
    /// Start a session: queues the begin marker.
    pub fn start(reader: R, path: impl Into<String>, out: &mut Spool) -> Self {
        let path = path.into();
        out.write_str(&format!("-0:FB={}\n", path));
        Self {
            reader,
            path,
            sent: 0,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Total data bytes queued so far.
    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }

    /// Queue the next chunk, or the end marker at end of file.
    pub fn fill_step(&mut self, out: &mut Spool) -> FillStep {
        if !out.is_caught_up() || out.queue().space() < FILL_HEADROOM {
            return FillStep::Waiting;
        }

        let mut buf = [0u8; READ_CHUNK];
        let n = loop {
            match self.reader.read(&mut buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(path = %self.path, error = %e, "storage read failed, ending file");
                    break 0;
                }
            }
        };

        if n == 0 {
            out.write_str(&format!("-0:FE={}\n", self.sent));
            return FillStep::Finished(self.sent);
        }

        let mut line = String::with_capacity(7 + 2 * n);
        line.push_str("-0:FS=");
        for b in &buf[..n] {
            line.push_str(&format!("{:02x}", b));
        }
        line.push('\n');
        out.write_str(&line);

        self.sent += n as u64;
        FillStep::Sent(n)
    }
}
