//! Engine configuration
//!
//! Applied once at engine construction. Block size is a compile-time
//! constant ([`crate::BLOCK_SIZE`]) and not part of the configuration.

use serde::{Deserialize, Serialize};

use crate::{ConfigError, MAX_ENGINE_CV_IO_PORTS};

/// Static engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: f32,
    pub audio_input_channels: usize,
    pub audio_output_channels: usize,
    pub cv_input_channels: usize,
    pub cv_output_channels: usize,
    /// Number of cores available for realtime processing; values above 1
    /// enable the worker pool
    pub rt_cores: usize,
    pub input_clip_detection: bool,
    pub output_clip_detection: bool,
    pub timing_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            audio_input_channels: 2,
            audio_output_channels: 2,
            cv_input_channels: 0,
            cv_output_channels: 0,
            rt_cores: 1,
            input_clip_detection: false,
            output_clip_detection: false,
            timing_enabled: false,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "sample rate {} is not positive",
                self.sample_rate
            )));
        }
        if self.cv_input_channels > MAX_ENGINE_CV_IO_PORTS
            || self.cv_output_channels > MAX_ENGINE_CV_IO_PORTS
        {
            return Err(ConfigError::Invalid(format!(
                "cv channel count exceeds {MAX_ENGINE_CV_IO_PORTS}"
            )));
        }
        if self.rt_cores == 0 {
            return Err(ConfigError::Invalid("rt_cores must be at least 1".to_string()));
        }
        Ok(())
    }
}
