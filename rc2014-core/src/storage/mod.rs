//! Emulated SD card attached to a serial port.
//!
//! The host computer sends `~0:...` command lines; the card answers with
//! `-0:...` lines through a bounded response queue that the CPU drains one
//! byte per receive. Long transfers (file reads) are resumed on every
//! status or receive poll.

pub mod command;
pub mod line;
pub mod listing;
pub mod session;

use std::path::Path;

use tracing::{debug, info, warn};

pub use command::{
    parse, response, Category, Operation, ProtocolError, SectorOp, StorageCommand, DEVICE_ID,
};
pub use line::{LineAssembler, MAX_LINE};
pub use listing::list_directory;
pub use session::{FileStreamSession, FillStep, FILL_HEADROOM, READ_CHUNK};

use crate::fs::Volume;
use crate::queue::Spool;
use crate::serial::{AciaStatus, SerialPort};

/// Emulated SD card.
pub struct StorageDevice {
    volume: Volume,
    line: LineAssembler,
    responses: Spool,
    session: Option<FileStreamSession>,
}

impl StorageDevice {
    /// Create a card whose root directory is `volume`.
    pub fn new(volume: Volume) -> Self {
        Self {
            volume,
            line: LineAssembler::new(),
            responses: Spool::new(),
            session: None,
        }
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    /// True while a file read is in progress.
    pub fn is_reading(&self) -> bool {
        self.session.is_some()
    }

    /// Advance the active read session by at most one chunk.
    pub fn fill_step(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if let FillStep::Finished(total) = session.fill_step(&mut self.responses) {
            info!(path = session.path(), bytes = total, "storage read complete");
            self.session = None;
        }
    }

    /// Close any active read session without sending an end marker.
    pub fn cancel_read(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(
                path = session.path(),
                sent = session.bytes_sent(),
                "storage read closed"
            );
        }
    }

    /// Return to the power-on state.
    pub fn reset(&mut self) {
        self.cancel_read();
        self.line.clear();
        self.responses.clear();
    }

    fn handle_line(&mut self, line: &[u8]) {
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            return;
        }

        debug!(line = %String::from_utf8_lossy(line), "storage command");

        match parse(line) {
            Ok(cmd) => self.execute(&cmd),
            Err(e) => {
                debug!(code = e.code(), error = ?e, "storage command rejected");
                self.responses.write_str(e.response());
            }
        }
    }

    fn execute(&mut self, cmd: &StorageCommand<'_>) {
        use Operation::*;

        let args = cmd.args_str();
        match cmd.operation {
            Info => {
                for line in response::INFO {
                    self.responses.write_str(line);
                }
            }
            ListDir => list_directory(&self.volume, &args, &mut self.responses),
            MakeDir => {
                if let Err(e) = self.volume.make_dir(&args) {
                    debug!(path = %args, error = %e, "storage mkdir failed");
                    self.responses.write_str(response::BAD_COMMAND);
                }
            }
            Remove => {
                if let Err(e) = self.volume.remove(&args) {
                    debug!(path = %args, error = %e, "storage rm failed");
                    self.responses.write_str(response::BAD_COMMAND);
                }
            }
            FileRead => self.start_read(&args),
            FileClose => self.cancel_read(),
            FileWrite | FileSend | Sector(_) => {
                warn!(op = ?cmd.operation, args = %args, "storage operation unavailable");
                self.responses.write_str(response::UNAVAILABLE);
            }
        }
    }

    fn start_read(&mut self, path: &str) {
        if self.session.is_some() {
            warn!("storage read started while another was open, closing the old one");
            self.cancel_read();
        }

        let file = match self.volume.open(Path::new(""), path) {
            Ok((_, file)) => file,
            Err(e) => {
                debug!(path, error = %e, "storage open failed");
                self.responses.write_str(response::NOT_FOUND);
                return;
            }
        };

        info!(path, "storage read started");
        self.session = Some(FileStreamSession::start(file, path, &mut self.responses));
        self.fill_step();
    }
}

impl SerialPort for StorageDevice {
    fn status(&mut self) -> AciaStatus {
        self.fill_step();
        AciaStatus::connected(!self.responses.queue().is_empty())
    }

    fn transmit(&mut self, byte: u8) {
        if let Some(line) = self.line.feed(byte) {
            self.handle_line(&line);
        }
    }

    fn receive(&mut self) -> u8 {
        self.fill_step();
        self.responses.pop().unwrap_or(0x00)
    }
}
