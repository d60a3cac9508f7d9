//! Directory listing responses.

use tracing::debug;

use super::command::response;
use crate::fs::{EntryKind, Volume};
use crate::queue::Spool;

/// Queue the listing of `path` on `volume`.
///
/// ```text
///   -0:PB=<path>
///   -0:<dir>/
///   -0:<file>,<size>
///   -0:PE=<files>,<dirs>
/// ```
///
/// A directory that cannot be opened yields `-0:E6` and nothing else.
pub fn list_directory(volume: &Volume, path: &str, out: &mut Spool) {
    let entries = match volume.list_dir(path) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path, error = %e, "storage ls failed");
            out.write_str(response::BAD_COMMAND);
            return;
        }
    };

    out.write_str(&format!("-0:PB={}\n", path));

    let mut files = 0;
    let mut dirs = 0;
    for entry in &entries {
        match entry.kind {
            EntryKind::Directory => {
                out.write_str(&format!("-0:{}/\n", entry.name));
                dirs += 1;
            }
            EntryKind::File { size } => {
                out.write_str(&format!("-0:{},{}\n", entry.name, size));
                files += 1;
            }
        }
    }

    out.write_str(&format!("-0:PE={},{}\n", files, dirs));
}
