//! Volume - a host directory exposed to the emulated machine.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::error::{RcError, RcResult};

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File { size: u64 },
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// Join `path` onto `base` and normalise the result.
///
/// - `.` and empty segments are dropped
/// - `..` removes the previous segment and may not climb above the root
/// - a leading `/` makes `path` relative to the root instead of `base`
///
/// The result is always relative to the volume root. This is purely lexical;
/// symlinks are checked by [`Volume`] when the path is used.
///
/// # Examples
/// ```
/// use std::path::{Path, PathBuf};
/// use rc2014_core::normalize;
/// assert_eq!(normalize(Path::new("games"), "star.bas").unwrap(), PathBuf::from("games/star.bas"));
/// assert_eq!(normalize(Path::new("games"), "../boot.bas").unwrap(), PathBuf::from("boot.bas"));
/// assert_eq!(normalize(Path::new("games"), "/x/./y").unwrap(), PathBuf::from("x/y"));
/// assert!(normalize(Path::new(""), "../etc/passwd").is_err());
/// ```
pub fn normalize(base: &Path, path: &str) -> RcResult<PathBuf> {
    let mut parts: Vec<String> = Vec::new();

    if !path.starts_with('/') {
        for comp in base.components() {
            parts.push(comp.as_os_str().to_string_lossy().into_owned());
        }
    }

    for seg in path.split(['/', '\\']) {
        match seg {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(RcError::PathEscapes(path.to_string()));
                }
            }
            _ => parts.push(seg.to_string()),
        }
    }

    Ok(parts.iter().collect())
}

/// A directory on the host acting as the root of an emulated disk.
///
/// Every path handed in by the emulated machine is resolved through
/// [`normalize`], and symlinks met on the way may not lead outside `root`.
/// Operations that would replace or delete the root itself are refused.
#[derive(Debug, Clone)]
pub struct Volume {
    root: PathBuf,
}

impl Volume {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path for `path` relative to `base` (both inside the volume).
    pub fn resolve(&self, base: &Path, path: &str) -> RcResult<PathBuf> {
        Ok(self.root.join(normalize(base, path)?))
    }

    /// Open an existing regular file for reading.
    ///
    /// Returns the volume-relative path alongside the file.
    pub fn open(&self, base: &Path, path: &str) -> RcResult<(PathBuf, File)> {
        let rel = normalize(base, path)?;
        let host = self.contained(&rel, path)?;
        let file = File::open(host)?;
        if file.metadata()?.is_dir() {
            return Err(RcError::IsADirectory(path.to_string()));
        }
        Ok((rel, file))
    }

    /// Create or truncate a file for writing.
    ///
    /// Returns the volume-relative path alongside the file.
    pub fn create(&self, base: &Path, path: &str) -> RcResult<(PathBuf, File)> {
        let rel = Self::below_root(normalize(base, path)?)?;
        let host = self.contained(&rel, path)?;
        Ok((rel, File::create(host)?))
    }

    /// True if `rel` (already normalised) names a directory.
    pub fn is_dir(&self, rel: &Path) -> bool {
        self.contained(rel, "").is_ok_and(|host| host.is_dir())
    }

    /// List a directory, sorted by name. `.` and `..` are never returned.
    pub fn list_dir(&self, path: &str) -> RcResult<Vec<DirEntry>> {
        let rel = normalize(Path::new(""), path)?;
        let host = self.contained(&rel, path)?;
        if host.is_file() {
            return Err(RcError::NotADirectory(path.to_string()));
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&host)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == "." || name == ".." {
                continue;
            }

            // Follow symlinks, like stat(2).
            let kind = match fs::metadata(entry.path()) {
                Ok(meta) if meta.is_dir() => EntryKind::Directory,
                Ok(meta) => EntryKind::File { size: meta.len() },
                Err(_) => EntryKind::File { size: 0 },
            };
            entries.push(DirEntry { name, kind });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Create a directory.
    pub fn make_dir(&self, path: &str) -> RcResult<()> {
        let rel = Self::below_root(normalize(Path::new(""), path)?)?;
        let host = self.contained(&rel, path)?;
        fs::create_dir(host)?;
        Ok(())
    }

    /// Remove a path, trying it as an empty directory first, then as a file.
    ///
    /// A symlink is removed itself, never its target.
    pub fn remove(&self, path: &str) -> RcResult<()> {
        let rel = Self::below_root(normalize(Path::new(""), path)?)?;
        let host = self.root.join(rel);
        if fs::remove_dir(&host).is_ok() {
            return Ok(());
        }
        fs::remove_file(&host)?;
        Ok(())
    }

    fn below_root(rel: PathBuf) -> RcResult<PathBuf> {
        if rel.as_os_str().is_empty() {
            return Err(RcError::VolumeRoot);
        }
        Ok(rel)
    }

    /// Host path for `rel`, refused if its existing part resolves outside the root.
    fn contained(&self, rel: &Path, path: &str) -> RcResult<PathBuf> {
        let host = self.root.join(rel);

        // A path that does not exist yet is judged by its nearest existing ancestor.
        let Some(existing) = host.ancestors().find(|p| p.exists()) else {
            return Ok(host);
        };
        let (Ok(real), Ok(root)) = (existing.canonicalize(), self.root.canonicalize()) else {
            return Ok(host);
        };
        if real.starts_with(&root) {
            Ok(host)
        } else {
            Err(RcError::PathEscapes(path.to_string()))
        }
    }
}
