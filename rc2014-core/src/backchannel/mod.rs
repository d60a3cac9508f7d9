//! Console backchannel.
//!
//! The console link between the user's terminal and the emulated computer
//! (the "remote") carries an inline command channel. Each direction runs its
//! own [`EscapeFilter`]; captured commands are dispatched to file transfer
//! handlers that queue bytes for either side.
//!
//! ```text
//!   remote (Z80) --remote_output--> [filter `{`] --> console queue --console_output--> terminal
//!   terminal     --console_input--> [filter `}`] --> remote queue  --remote_input-->  remote (Z80)
//! ```

pub mod dispatch;
pub mod filter;
pub mod outbox;
pub mod save;

mod handlers;

use std::path::{Path, PathBuf};

use tracing::{info, warn};

pub use dispatch::{match_command, BackchannelCommand, HandlerTable, CONSOLE_COMMANDS, REMOTE_COMMANDS};
pub use filter::{EscapeFilter, FilterEvent, FilterState, END_MARKER, ESC};
pub use outbox::{FeedMode, FileFeed, Outbox};
pub use save::{CaptureStep, SaveCapture};

use crate::fs::Volume;
use crate::serial::{AciaStatus, SerialPort};

/// Script chained by the `boot` command.
pub const BOOT_SCRIPT: &str = "boot.bas";

/// One of the two byte flows on the console link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Keys typed at the console, headed for the remote.
    ConsoleToRemote,
    /// Output of the remote, headed for the console.
    RemoteToConsole,
}

impl Direction {
    /// Byte following ESC that opens a command in this direction.
    pub fn start_marker(self) -> u8 {
        match self {
            Direction::ConsoleToRemote => b'}',
            Direction::RemoteToConsole => b'{',
        }
    }

    /// Tag used in diagnostics.
    pub fn tag(self) -> &'static str {
        match self {
            Direction::ConsoleToRemote => "TR",
            Direction::RemoteToConsole => "TC",
        }
    }

    /// Commands accepted in this direction.
    pub fn commands(self) -> HandlerTable {
        match self {
            Direction::ConsoleToRemote => CONSOLE_COMMANDS,
            Direction::RemoteToConsole => REMOTE_COMMANDS,
        }
    }
}

struct Channel {
    filter: EscapeFilter,
    outbox: Outbox,
}

impl Channel {
    fn new(direction: Direction) -> Self {
        Self {
            filter: EscapeFilter::new(direction.start_marker()),
            outbox: Outbox::new(),
        }
    }
}

/// Where remote output goes on its way to the console.
enum ConsoleSink {
    Normal,
    Capturing(SaveCapture),
}

/// Both directions of the console link plus the state shared by the handlers.
pub struct Backchannel {
    to_console: Channel,
    to_remote: Channel,
    sink: ConsoleSink,
    volume: Volume,
    cwd: PathBuf,
}

impl Backchannel {
    /// Create a backchannel serving files from `volume`.
    pub fn new(volume: Volume) -> Self {
        Self {
            to_console: Channel::new(Direction::RemoteToConsole),
            to_remote: Channel::new(Direction::ConsoleToRemote),
            sink: ConsoleSink::Normal,
            volume,
            cwd: PathBuf::new(),
        }
    }

    /// Working directory, relative to the volume root.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    /// True while a `save` capture is active.
    pub fn is_saving(&self) -> bool {
        matches!(self.sink, ConsoleSink::Capturing(_))
    }

    /// State of the filter for `direction`.
    pub fn filter_state(&self, direction: Direction) -> FilterState {
        match direction {
            Direction::ConsoleToRemote => self.to_remote.filter.state(),
            Direction::RemoteToConsole => self.to_console.filter.state(),
        }
    }

    /// A byte written by the remote towards the console.
    pub fn remote_output(&mut self, byte: u8) {
        self.filter_byte(Direction::RemoteToConsole, byte);
    }

    /// A key typed at the console towards the remote.
    pub fn console_input(&mut self, byte: u8) {
        self.filter_byte(Direction::ConsoleToRemote, byte);
    }

    /// Next byte for the console, if any.
    pub fn console_output(&mut self) -> Option<u8> {
        self.pump();
        self.to_console.outbox.pop()
    }

    /// Next byte for the remote, if any.
    pub fn remote_input(&mut self) -> Option<u8> {
        self.pump();
        self.to_remote.outbox.pop()
    }

    /// True if the remote has a byte waiting.
    pub fn remote_ready(&mut self) -> bool {
        self.pump();
        self.to_remote.outbox.has_data()
    }

    /// Advance pending file transfers in both directions.
    pub fn pump(&mut self) {
        for notice in self.to_remote.outbox.pump() {
            self.to_console.outbox.send_str(&notice);
        }
        for notice in self.to_console.outbox.pump() {
            self.to_console.outbox.send_str(&notice);
        }
    }

    /// Abandon an active `save` capture, closing its file.
    pub fn cancel_save(&mut self) {
        if let ConsoleSink::Capturing(capture) = std::mem::replace(&mut self.sink, ConsoleSink::Normal) {
            info!(path = capture.path(), "save capture cancelled");
            if let Err(e) = capture.finish() {
                warn!(error = %e, "save: flush failed on cancel");
            }
        }
    }

    /// Return to the power-on state, keeping the volume.
    pub fn reset(&mut self) {
        self.cancel_save();
        for channel in [&mut self.to_console, &mut self.to_remote] {
            channel.filter.reset();
            channel.outbox.clear();
        }
        self.cwd = PathBuf::new();
    }

    fn outbox_mut(&mut self, direction: Direction) -> &mut Outbox {
        match direction {
            Direction::ConsoleToRemote => &mut self.to_remote.outbox,
            Direction::RemoteToConsole => &mut self.to_console.outbox,
        }
    }

    /// Message for the console, bypassing any save capture.
    fn console_message(&mut self, msg: &str) {
        self.to_console.outbox.send_str(msg);
    }

    fn filter_byte(&mut self, direction: Direction, byte: u8) {
        let filter = match direction {
            Direction::ConsoleToRemote => &mut self.to_remote.filter,
            Direction::RemoteToConsole => &mut self.to_console.filter,
        };

        match filter.feed(byte) {
            FilterEvent::Held => {}
            FilterEvent::Emit(b) => self.pass_through(direction, b),
            FilterEvent::EmitEscaped(b) => {
                self.pass_through(direction, ESC);
                self.pass_through(direction, b);
            }
            FilterEvent::Command(token) => self.dispatch(direction, &token),
        }
    }

    fn pass_through(&mut self, direction: Direction, byte: u8) {
        match direction {
            Direction::ConsoleToRemote => self.to_remote.outbox.send(&[byte]),
            Direction::RemoteToConsole => self.to_console_sink(byte),
        }
    }

    fn to_console_sink(&mut self, byte: u8) {
        let ConsoleSink::Capturing(capture) = &mut self.sink else {
            self.to_console.outbox.send(&[byte]);
            return;
        };

        match capture.consume(byte) {
            Ok(CaptureStep::Consumed) => {}
            Ok(CaptureStep::LineEnd) => self.console_message("."),
            Ok(CaptureStep::Finished) => {
                self.console_message(".");
                self.finish_save();
            }
            Err(e) => {
                warn!(error = %e, "save: write failed");
                self.cancel_save();
                self.console_message(&format!("Save failed: {}\n", e));
            }
        }
    }

    fn finish_save(&mut self) {
        let ConsoleSink::Capturing(capture) = std::mem::replace(&mut self.sink, ConsoleSink::Normal) else {
            return;
        };

        let path = capture.path().to_string();
        let lines = capture.lines_saved();
        match capture.finish() {
            Ok(_) => {
                info!(path, lines, "save complete");
                self.console_message("\n\nDone saving.\n");
            }
            Err(e) => {
                warn!(path, error = %e, "save: flush failed");
                self.console_message(&format!("Save failed: {}\n", e));
            }
        }
    }
}

impl SerialPort for Backchannel {
    fn status(&mut self) -> AciaStatus {
        AciaStatus::connected(self.remote_ready())
    }

    fn transmit(&mut self, byte: u8) {
        self.remote_output(byte);
    }

    fn receive(&mut self) -> u8 {
        self.remote_input().unwrap_or(0xFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn setup() -> (tempfile::TempDir, Backchannel) {
        let tmp = tempfile::tempdir().unwrap();
        let bc = Backchannel::new(Volume::new(tmp.path()));
        (tmp, bc)
    }

    fn remote_says(bc: &mut Backchannel, bytes: &[u8]) {
        for &b in bytes {
            bc.remote_output(b);
        }
    }

    fn console_types(bc: &mut Backchannel, bytes: &[u8]) {
        for &b in bytes {
            bc.console_input(b);
        }
    }

    fn drain_console(bc: &mut Backchannel) -> String {
        let mut out = Vec::new();
        while let Some(b) = bc.console_output() {
            out.push(b);
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    fn drain_remote(bc: &mut Backchannel) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(b) = bc.remote_input() {
            out.push(b);
        }
        out
    }

    #[test]
    fn test_plain_bytes_pass_both_ways() {
        let (_tmp, mut bc) = setup();
        remote_says(&mut bc, b"Ok\r\n");
        console_types(&mut bc, b"PRINT 1\r");
        assert_eq!(drain_console(&mut bc), "Ok\r\n");
        assert_eq!(drain_remote(&mut bc), b"PRINT 1\r");
    }

    #[test]
    fn test_escape_fallback_reaches_console() {
        let (_tmp, mut bc) = setup();
        remote_says(&mut bc, b"\x1b[H");
        assert_eq!(drain_console(&mut bc), "\x1b[H");
    }

    #[test]
    fn test_unknown_remote_command() {
        let (_tmp, mut bc) = setup();
        remote_says(&mut bc, b"\x1b{frobnicate\x03");
        assert_eq!(drain_console(&mut bc), "TC: Command not found: frobnicate\n");
    }

    #[test]
    fn test_unknown_console_command_goes_to_its_own_queue() {
        let (_tmp, mut bc) = setup();
        console_types(&mut bc, b"\x1b}typefoo\x03");
        assert_eq!(drain_remote(&mut bc), b"TR: Command not found: typefoo\n");
        assert_eq!(drain_console(&mut bc), "");
    }

    #[test]
    fn test_empty_command_is_ignored() {
        let (_tmp, mut bc) = setup();
        remote_says(&mut bc, b"\x1b{\x03");
        assert_eq!(drain_console(&mut bc), "");
        assert_eq!(drain_remote(&mut bc), b"");
    }

    #[test]
    fn test_type_normalizes_line_endings() {
        let (tmp, mut bc) = setup();
        fs::write(tmp.path().join("p.bas"), b"10 PRINT \"A\"\r\n20 END\n").unwrap();

        remote_says(&mut bc, b"\x1b{type p.bas\x03");
        assert_eq!(drain_remote(&mut bc), b"10 PRINT \"A\"\n\r20 END\n\r");
        assert_eq!(
            drain_console(&mut bc),
            "/p.bas: Typing to remote...\nDone!\n"
        );
    }

    #[test]
    fn test_type_missing_file() {
        let (_tmp, mut bc) = setup();
        remote_says(&mut bc, b"\x1b{type nope.bas\x03");
        assert_eq!(drain_console(&mut bc), "/nope.bas: Cannot open!\n");
        assert_eq!(drain_remote(&mut bc), b"");
    }

    #[test]
    fn test_directory_cannot_be_typed() {
        let (tmp, mut bc) = setup();
        fs::create_dir(tmp.path().join("games")).unwrap();

        remote_says(&mut bc, b"\x1b{type games\x03");
        assert_eq!(drain_console(&mut bc), "/games: Cannot open!\n");
        assert_eq!(drain_remote(&mut bc), b"");

        console_types(&mut bc, b"\x1b}chain games\x03\x1b}more games\x03");
        assert_eq!(
            drain_console(&mut bc),
            "/games: Cannot open!\n/games: Cannot open!\n"
        );
        assert_eq!(drain_remote(&mut bc), b"");
    }

    #[test]
    fn test_load_and_chain_wrap_the_body() {
        let (tmp, mut bc) = setup();
        fs::write(tmp.path().join("p.bas"), b"10 END\n").unwrap();

        console_types(&mut bc, b"\x1b}load p.bas\x03");
        assert_eq!(drain_remote(&mut bc), b"new\nclear\n10 END\n\r");

        console_types(&mut bc, b"\x1b}chain p.bas\x03");
        assert_eq!(drain_remote(&mut bc), b"10 END\n\rrun\n");
    }

    #[test]
    fn test_boot_chains_boot_script() {
        let (tmp, mut bc) = setup();
        fs::write(tmp.path().join(BOOT_SCRIPT), b"10 PRINT \"HI\"\n").unwrap();

        remote_says(&mut bc, b"\x1b{boot ignored.bas\x03");
        assert_eq!(drain_remote(&mut bc), b"10 PRINT \"HI\"\n\rrun\n");
    }

    #[test]
    fn test_more_is_console_only() {
        let (tmp, mut bc) = setup();
        fs::write(tmp.path().join("readme.txt"), b"hello\r\n").unwrap();

        remote_says(&mut bc, b"\x1b{more readme.txt\x03");
        assert_eq!(
            drain_console(&mut bc),
            "TC: Command not found: more readme.txt\n"
        );

        console_types(&mut bc, b"\x1b}more readme.txt\x03");
        assert_eq!(
            drain_console(&mut bc),
            "------- Begin /readme.txt -------\nhello\r\n------- End /readme.txt -------\n"
        );
        assert_eq!(drain_remote(&mut bc), b"");
    }

    #[test]
    fn test_cd_validates_and_resets() {
        let (tmp, mut bc) = setup();
        fs::create_dir(tmp.path().join("games")).unwrap();
        fs::write(tmp.path().join("games/star.bas"), b"10 END\n").unwrap();

        console_types(&mut bc, b"\x1b}cd games\x03");
        assert_eq!(bc.cwd(), Path::new("games"));
        assert_eq!(drain_console(&mut bc), "cwd: /games\n");

        console_types(&mut bc, b"\x1b}type star.bas\x03");
        assert_eq!(drain_remote(&mut bc), b"10 END\n\r");
        drain_console(&mut bc);

        console_types(&mut bc, b"\x1b}cd nowhere\x03");
        assert_eq!(bc.cwd(), Path::new("games"));
        assert_eq!(drain_console(&mut bc), "/nowhere: No such directory\n");

        console_types(&mut bc, b"\x1b}cd ../..\x03");
        assert_eq!(bc.cwd(), Path::new("games"));
        drain_console(&mut bc);

        console_types(&mut bc, b"\x1b}cd\x03");
        assert_eq!(bc.cwd(), Path::new(""));
    }

    #[test]
    fn test_type_cannot_escape_root() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("root")).unwrap();
        fs::write(tmp.path().join("secret.txt"), b"x").unwrap();
        let mut bc = Backchannel::new(Volume::new(tmp.path().join("root")));

        console_types(&mut bc, b"\x1b}type ../secret.txt\x03");
        assert_eq!(drain_remote(&mut bc), b"");
        assert_eq!(drain_console(&mut bc), "../secret.txt: Cannot open!\n");
    }

    #[test]
    fn test_save_captures_listing() {
        let (tmp, mut bc) = setup();

        console_types(&mut bc, b"\x1b}save out.bas\x03");
        assert!(bc.is_saving());
        assert_eq!(drain_remote(&mut bc), b"\n\n\nlist\n");

        remote_says(&mut bc, b"10 PRINT 1\n20 END\nOk\n");
        assert!(!bc.is_saving());
        assert_eq!(drain_console(&mut bc), "...\n\nDone saving.\n");
        assert_eq!(
            fs::read_to_string(tmp.path().join("out.bas")).unwrap(),
            "10 PRINT 1\n20 END\n"
        );

        // Capture is over; output is displayed again.
        remote_says(&mut bc, b"Ready\n");
        assert_eq!(drain_console(&mut bc), "Ready\n");
    }

    #[test]
    fn test_save_into_missing_dir_fails() {
        let (_tmp, mut bc) = setup();
        console_types(&mut bc, b"\x1b}save nodir/out.bas\x03");
        assert!(!bc.is_saving());
        assert_eq!(drain_console(&mut bc), "/nodir/out.bas: Cannot save!\n");
        assert_eq!(drain_remote(&mut bc), b"");
    }

    #[test]
    fn test_cancel_save_restores_display() {
        let (tmp, mut bc) = setup();
        console_types(&mut bc, b"\x1b}save out.bas\x03");
        remote_says(&mut bc, b"10 A\n");
        bc.cancel_save();
        assert!(!bc.is_saving());
        assert_eq!(
            fs::read_to_string(tmp.path().join("out.bas")).unwrap(),
            "10 A\n"
        );
        drain_console(&mut bc);
        remote_says(&mut bc, b"hi");
        assert_eq!(drain_console(&mut bc), "hi");
    }

    #[test]
    fn test_large_type_is_streamed_in_order() {
        let (tmp, mut bc) = setup();
        let mut body = Vec::new();
        for n in 0..400 {
            body.extend_from_slice(format!("{} PRINT {}\n", n * 10, n).as_bytes());
        }
        fs::write(tmp.path().join("big.bas"), &body).unwrap();

        remote_says(&mut bc, b"\x1b{chain big.bas\x03");
        let sent = drain_remote(&mut bc);

        let mut expected: Vec<u8> = Vec::new();
        for n in 0..400 {
            expected.extend_from_slice(format!("{} PRINT {}\n\r", n * 10, n).as_bytes());
        }
        expected.extend_from_slice(b"run\n");
        assert_eq!(sent, expected);
    }

    #[test]
    fn test_reset_clears_everything() {
        let (_tmp, mut bc) = setup();
        remote_says(&mut bc, b"abc\x1b{ty");
        bc.reset();
        assert_eq!(bc.filter_state(Direction::RemoteToConsole), FilterState::Idle);
        assert_eq!(drain_console(&mut bc), "");
    }

    #[test]
    fn test_serial_port_view() {
        let (_tmp, mut bc) = setup();
        assert!(!SerialPort::status(&mut bc).contains(AciaStatus::RX_DATA_READY));
        assert_eq!(SerialPort::receive(&mut bc), 0xFF);
        bc.console_input(b'A');
        assert!(SerialPort::status(&mut bc).contains(AciaStatus::RX_DATA_READY));
        assert_eq!(SerialPort::receive(&mut bc), b'A');
        SerialPort::transmit(&mut bc, b'Z');
        assert_eq!(bc.console_output(), Some(b'Z'));
    }
}
