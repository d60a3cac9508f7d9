//! Host filesystem access for the emulated peripherals.
//!
//! - `Volume`: a host directory acting as an emulated disk root
//! - `normalize`: lexical path resolution that never leaves the root

mod volume;

pub use volume::{normalize, DirEntry, EntryKind, Volume};
