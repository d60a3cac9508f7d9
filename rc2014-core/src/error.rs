//! Error types for the RC2014 peripheral emulation.

use thiserror::Error;

/// Errors that can occur while servicing the emulated peripherals.
#[derive(Error, Debug)]
pub enum RcError {
    #[error("Path escapes volume root: {0}")]
    PathEscapes(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Operation not permitted on the volume root")]
    VolumeRoot,

    #[error("ROM image too large: {0} bytes")]
    RomTooLarge(usize),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}

/// Failures reported by a bounded [`ByteQueue`](crate::queue::ByteQueue).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue full")]
    Full,

    #[error("No data available")]
    NotAvailable,
}

/// Result type for peripheral operations.
pub type RcResult<T> = Result<T, RcError>;
