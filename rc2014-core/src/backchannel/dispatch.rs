//! Command dispatch for captured backchannel tokens.

use tracing::debug;

use super::{Backchannel, Direction};

/// Commands understood on the backchannel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackchannelCommand {
    /// Chain the fixed boot script.
    Boot,
    /// Show a file on the console.
    More,
    /// Type a file into the remote.
    Type,
    /// Type a file, then `run`.
    Chain,
    /// `new`, `clear`, then type a file.
    Load,
    /// Capture a `list` into a file.
    Save,
    /// Change the working directory.
    Cd,
}

/// Ordered (name, command) pairs. The first matching name wins.
pub type HandlerTable = &'static [(&'static str, BackchannelCommand)];

/// Commands the remote may issue (`ESC {`).
pub const REMOTE_COMMANDS: HandlerTable = &[
    ("boot", BackchannelCommand::Boot),
    ("type", BackchannelCommand::Type),
    ("chain", BackchannelCommand::Chain),
    ("load", BackchannelCommand::Load),
    ("save", BackchannelCommand::Save),
    ("cd", BackchannelCommand::Cd),
];

/// Commands the console user may issue (`ESC }`).
pub const CONSOLE_COMMANDS: HandlerTable = &[
    ("boot", BackchannelCommand::Boot),
    ("more", BackchannelCommand::More),
    ("type", BackchannelCommand::Type),
    ("chain", BackchannelCommand::Chain),
    ("load", BackchannelCommand::Load),
    ("save", BackchannelCommand::Save),
    ("cd", BackchannelCommand::Cd),
];

/// Find the command for `token` and return it with its argument.
///
/// A name only matches at a word boundary: it must be followed by the end of
/// the token or by whitespace, so `typefoo` does not match `type`.
pub fn match_command<'a>(
    table: &[(&str, BackchannelCommand)],
    token: &'a [u8],
) -> Option<(BackchannelCommand, &'a [u8])> {
    table.iter().find_map(|&(name, cmd)| {
        let rest = token.strip_prefix(name.as_bytes())?;
        match rest.first() {
            None => Some((cmd, rest)),
            Some(b) if b.is_ascii_whitespace() => Some((cmd, rest.trim_ascii())),
            Some(_) => None,
        }
    })
}

impl Backchannel {
    /// Run the command in `token`, captured from `direction`.
    ///
    /// Unknown commands produce a diagnostic on that direction's queue.
    pub fn dispatch(&mut self, direction: Direction, token: &[u8]) {
        if token.is_empty() {
            return;
        }

        debug!(
            tag = direction.tag(),
            len = token.len(),
            token = %String::from_utf8_lossy(token),
            "backchannel command"
        );

        match match_command(direction.commands(), token) {
            Some((cmd, arg)) => {
                let arg = String::from_utf8_lossy(arg).into_owned();
                self.run_command(cmd, &arg);
            }
            None => {
                let mut msg = format!("{}: Command not found: ", direction.tag()).into_bytes();
                msg.extend_from_slice(token);
                msg.push(b'\n');
                self.outbox_mut(direction).send(&msg);
            }
        }
    }
}
