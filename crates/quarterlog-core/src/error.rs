//! Core error types for quarterlog-core.
//!
//! Command paths report these synchronously to the caller. The tick loop never
//! surfaces them; it logs and keeps going.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for quarterlog-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Durable store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The session runtime task is gone (shut down or panicked)
    #[error("Session runtime is not running")]
    RuntimeClosed,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable state store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open the backing database
    #[error("Failed to open store at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A group write was rolled back; the previous group is intact
    #[error("Write of '{group}' group failed: {message}")]
    WriteFailed { group: String, message: String },

    /// Read failed
    #[error("Read of '{key}' failed: {message}")]
    ReadFailed { key: String, message: String },

    /// A stored value could not be decoded
    #[error("Corrupt value for '{key}': {message}")]
    Corrupt { key: String, message: String },

    /// Store could not be reached at all
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Another process owns the session
    #[error("Session is in use by another process ({owner}); lock file: {}", .path.display())]
    Locked { path: PathBuf, owner: String },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Data directory could not be determined or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// Cycle duration must be positive
    #[error("Cycle duration must be greater than zero")]
    ZeroDuration,

    /// cycles_left exceeds total_cycles
    #[error("cycles_left ({left}) exceeds total_cycles ({total})")]
    CyclesOutOfRange { left: u32, total: u32 },

    /// Cycle duration past the supported maximum, or an end time past the
    /// representable range
    #[error("Cycle duration of {duration_ms}ms is out of range (max {max_ms}ms)")]
    DurationOutOfRange { duration_ms: i64, max_ms: i64 },

    /// A bounded session needs at least one cycle left
    #[error("A session with {total} total cycles needs at least one cycle left")]
    NoCyclesLeft { total: u32 },

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Presentation delivery failure. Always swallowed by the core.
#[derive(Error, Debug, Clone)]
#[error("Delivery to presenter failed: {0}")]
pub struct DeliveryError(pub String);

/// Wake-assurance failures. The session degrades to best-effort timing.
#[derive(Error, Debug)]
pub enum WakeError {
    /// The platform resource could not be acquired
    #[error("Wake-assurance unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
