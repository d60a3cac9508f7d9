//! Machine configuration.
//!
//! Loaded from a TOML file; every field has a default, so an empty file is a
//! valid configuration:
//!
//! ```toml
//! # ROM image loaded at 0x0000 (write-protected)
//! rom = "ROMs/R0000009.BIN"
//!
//! [backchannel]
//! root = "MASS_DRV/BASIC"
//!
//! [storage]
//! root = "SD_DISK"
//!
//! [ports]
//! console = 0x80   # status/control; data is console + 1
//! storage = 0x40
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::RcResult;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// ROM image to load at address 0.
    pub rom: Option<PathBuf>,
    pub backchannel: BackchannelConfig,
    pub storage: StorageConfig,
    pub ports: PortConfig,
}

/// Console backchannel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackchannelConfig {
    /// Directory served to `type`, `load`, `save` and friends; `cd` cannot leave it.
    pub root: PathBuf,
}

impl Default for BackchannelConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("MASS_DRV/BASIC"),
        }
    }
}

/// Emulated SD card settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory acting as the card's root.
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("SD_DISK"),
        }
    }
}

/// I/O port assignment. Each ACIA uses `base` for status/control and
/// `base + 1` for data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub console: u8,
    pub storage: u8,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            console: 0x80,
            storage: 0x40,
        }
    }
}

impl Config {
    /// Parse configuration from TOML text.
    pub fn parse(text: &str) -> RcResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> RcResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_default() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_override() {
        let cfg = Config::parse(
            r#"
            rom = "basic.rom"

            [storage]
            root = "/tmp/sd"

            [ports]
            storage = 0xC0
            "#,
        )
        .unwrap();

        assert_eq!(cfg.rom, Some(PathBuf::from("basic.rom")));
        assert_eq!(cfg.storage.root, PathBuf::from("/tmp/sd"));
        assert_eq!(cfg.backchannel.root, PathBuf::from("MASS_DRV/BASIC"));
        assert_eq!(cfg.ports.console, 0x80);
        assert_eq!(cfg.ports.storage, 0xC0);
    }

    #[test]
    fn test_bad_toml() {
        assert!(Config::parse("[ports]\nconsole = \"x\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("rc2014.toml");
        fs::write(&path, "[backchannel]\nroot = \"basic\"\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.backchannel.root, PathBuf::from("basic"));
    }
}
