//! Error types for Skiff

use thiserror::Error;

/// Status set of the engine control API.
///
/// Success is `Ok(())` on [`EngineResult`]; these are the failure kinds.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    #[error("Engine error")]
    Error,

    #[error("Invalid plugin name")]
    InvalidPluginName,

    #[error("Invalid plugin uid")]
    InvalidPluginUid,

    #[error("Invalid processor")]
    InvalidProcessor,

    #[error("Invalid parameter")]
    InvalidParameter,

    #[error("Invalid track")]
    InvalidTrack,

    #[error("Invalid channel")]
    InvalidChannel,

    #[error("Invalid number of channels")]
    InvalidNChannels,

    #[error("Realtime event queue full")]
    QueueFull,
}

/// Result type alias for the control API
pub type EngineResult<T> = Result<T, EngineError>;

/// Failure kinds of the processor lifecycle
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    #[error("Unsupported channel configuration")]
    UnsupportedChannels,

    #[error("Invalid parameter")]
    InvalidParameter,

    #[error("Failed to load plugin: {0}")]
    LoadFailed(String),
}

/// Configuration parsing and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}
