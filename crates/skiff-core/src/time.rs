//! Musical-time types shared between the transport and the event plane

use serde::{Deserialize, Serialize};

/// Wall-clock timestamp handed to the engine by the audio driver
pub type Time = std::time::Duration;

/// Musical time signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl TimeSignature {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self { numerator, denominator }
    }

    /// Length of one bar in quarter-note beats
    pub fn beats_per_bar(&self) -> f64 {
        f64::from(self.numerator) * 4.0 / f64::from(self.denominator)
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self { numerator: 4, denominator: 4 }
    }
}

/// Transport playing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayingMode {
    #[default]
    Stopped,
    Playing,
    Recording,
}

impl PlayingMode {
    /// True when musical time advances in this mode
    pub fn is_playing(self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

/// Source the transport derives its tempo from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncMode {
    #[default]
    Internal,
    Midi,
    Link,
    Gate,
}
