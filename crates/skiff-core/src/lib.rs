//! skiff-core: Shared types for the Skiff audio host
//!
//! This crate provides the foundational pieces used across all Skiff
//! crates: the fixed-block sample buffer, the real-time event record and
//! its lock-free queue, the processor contract, parameters, musical-time
//! types, errors and engine configuration.

mod buffer;
mod config;
mod error;
mod event;
mod fifo;
mod params;
mod processor;
mod time;

pub use buffer::*;
pub use config::*;
pub use error::*;
pub use event::*;
pub use fifo::*;
pub use params::*;
pub use processor::*;
pub use time::*;

/// Audio sample type used throughout the engine
pub type Sample = f32;

/// Frames per processing block. Fixed for the lifetime of a session.
pub const BLOCK_SIZE: usize = 64;

/// Maximum number of control-voltage ports on the engine, in and out
pub const MAX_ENGINE_CV_IO_PORTS: usize = 4;

/// Maximum number of gate ports on the engine, in and out
pub const MAX_ENGINE_GATE_PORTS: usize = 8;

/// Highest note number a gate port can be bound to
pub const MAX_ENGINE_GATE_NOTE_NO: u8 = 127;

/// Maximum number of stereo busses per track
pub const TRACK_MAX_BUSSES: usize = 8;

/// Ceiling for the real-time processor array, agreed at startup
pub const MAX_RT_PROCESSORS: usize = 256;

/// Unique identifier for an addressable object (processor, track).
///
/// Assigned at registration from a process-wide counter and never reused
/// within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// Sentinel for a processor that has not been registered yet
    pub const INVALID: Self = Self(u32::MAX);

    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
