//! RC2014 serial peripheral emulation core
//!
//! This crate provides the pieces that sit behind the two serial ports of an
//! emulated RC2014:
//! - Console backchannel: escape-framed commands embedded in the console
//!   stream (`type`, `load`, `chain`, `save`, `more`, `cd`, `boot`)
//! - SD storage device: a line-oriented `~0:` command protocol answered
//!   with `-0:` responses
//! - A Z80 machine wiring both devices to ACIA ports
//!
//! # Architecture
//!
//! - `ByteQueue`/`Spool`: bounded byte queues between devices and the CPU
//! - `SerialPort` trait: status/data/control register access from the CPU
//! - `Volume`: a directory sandbox shared by the file handlers
//! - `HostConsole` trait: the user's terminal
//! - `Machine`: integrates the Z80 CPU with the peripherals

pub mod backchannel;
pub mod config;
pub mod console;
pub mod error;
pub mod fs;
pub mod machine;
pub mod queue;
pub mod serial;
pub mod storage;

pub use backchannel::{Backchannel, Direction};
pub use config::Config;
pub use console::{HeadlessConsole, HostConsole};
pub use error::{QueueError, RcError, RcResult};
pub use fs::{normalize, Volume};
pub use machine::{Machine, RunInfo, StopReason};
pub use queue::{ByteQueue, Spool, DEFERRED_LIMIT, QUEUE_CAPACITY};
pub use serial::{AciaStatus, SerialPort};
pub use storage::StorageDevice;
