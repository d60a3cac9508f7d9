//! Backchannel command implementations.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::dispatch::BackchannelCommand;
use super::outbox::{FeedMode, FileFeed};
use super::save::SaveCapture;
use super::{Backchannel, ConsoleSink, BOOT_SCRIPT};
use crate::error::RcResult;
use crate::fs::normalize;

/// Display form of a volume-relative path.
fn shown(rel: &Path) -> String {
    format!("/{}", rel.display())
}

impl Backchannel {
    pub(super) fn run_command(&mut self, cmd: BackchannelCommand, arg: &str) {
        use BackchannelCommand::*;

        match cmd {
            Boot => self.chain(BOOT_SCRIPT),
            More => self.more(arg),
            Type => self.type_file(arg, &[], &[]),
            Chain => self.chain(arg),
            Load => self.load(arg),
            Save => self.save(arg),
            Cd => self.cd(arg),
        }
        self.pump();
    }

    /// Resolve `path` against the working directory and open it.
    fn open_in_cwd(&self, path: &str) -> RcResult<(PathBuf, File)> {
        self.volume.open(&self.cwd, path)
    }

    /// `path` as shown in messages: resolved when it normalises, verbatim otherwise.
    fn display_arg(&self, path: &str) -> String {
        normalize(&self.cwd, path).map_or_else(|_| path.to_string(), |rel| shown(&rel))
    }

    /// Type `path` into the remote, wrapped in `prologue` and `trailer`.
    ///
    /// Nothing is sent to the remote unless the file opens.
    fn type_file(&mut self, path: &str, prologue: &[u8], trailer: &[u8]) {
        let (rel, file) = match self.open_in_cwd(path) {
            Ok(opened) => opened,
            Err(e) => {
                debug!(path, error = %e, "type: open failed");
                let name = self.display_arg(path);
                self.console_message(&format!("{}: Cannot open!\n", name));
                return;
            }
        };

        info!(path = %rel.display(), "typing file to remote");
        self.console_message(&format!("{}: Typing to remote...\n", shown(&rel)));

        let outbox = &mut self.to_remote.outbox;
        outbox.send(prologue);
        outbox.send_file(
            FileFeed::new(Box::new(BufReader::new(file)), FeedMode::Typed)
                .with_trailer(trailer)
                .with_notice("Done!\n"),
        );
    }

    fn load(&mut self, path: &str) {
        self.type_file(path, b"new\nclear\n", &[]);
    }

    fn chain(&mut self, path: &str) {
        self.type_file(path, &[], b"run\n");
    }

    fn more(&mut self, path: &str) {
        let (rel, file) = match self.open_in_cwd(path) {
            Ok(opened) => opened,
            Err(e) => {
                debug!(path, error = %e, "more: open failed");
                let name = self.display_arg(path);
                self.console_message(&format!("{}: Cannot open!\n", name));
                return;
            }
        };

        let name = shown(&rel);
        let outbox = &mut self.to_console.outbox;
        outbox.send_str(&format!("------- Begin {} -------\n", name));
        outbox.send_file(
            FileFeed::new(Box::new(BufReader::new(file)), FeedMode::Verbatim)
                .with_trailer(format!("------- End {} -------\n", name).as_bytes()),
        );
    }

    fn cd(&mut self, path: &str) {
        if path.is_empty() {
            self.cwd = PathBuf::new();
        } else {
            match normalize(&self.cwd, path) {
                Ok(rel) if self.volume.is_dir(&rel) => self.cwd = rel,
                _ => {
                    let name = self.display_arg(path);
                    self.console_message(&format!("{}: No such directory\n", name));
                    return;
                }
            }
        }
        debug!(cwd = %self.cwd.display(), "cd");
        self.console_message(&format!("cwd: {}\n", shown(&self.cwd)));
    }

    fn save(&mut self, path: &str) {
        if self.is_saving() {
            warn!("save: replacing an unfinished capture");
            self.cancel_save();
        }

        let (rel, file) = match self.volume.create(&self.cwd, path) {
            Ok(created) => created,
            Err(e) => {
                warn!(path, error = %e, "save: cannot create file");
                let name = self.display_arg(path);
                self.console_message(&format!("{}: Cannot save!\n", name));
                return;
            }
        };

        info!(path = %rel.display(), "capturing listing");
        self.to_remote.outbox.send(b"\n\n\nlist\n");
        self.sink = ConsoleSink::Capturing(SaveCapture::new(BufWriter::new(file), shown(&rel)));
    }
}
