//! # Error Types
//!
//! Custom error types for Pendulum Telemetry using `thiserror`.

use thiserror::Error;

/// Main error type for Pendulum Telemetry
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Device could not be opened (bad path, permissions, unsupported baud rate)
    #[error("Connection error: {0}")]
    Connection(String),

    /// `connect()` called while a session is still running
    #[error("Already connected: disconnect the active session first")]
    AlreadyConnected,

    /// Sliding window constructed with an unusable capacity
    #[error("Invalid window capacity: {0} (must be greater than 0)")]
    InvalidCapacity(usize),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Pendulum Telemetry
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Rejection of a single wire record
///
/// Never fatal to a session: the acquisition loop discards the line and keeps reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Line is not a `[value, timestamp_ms]` literal; carries the original text
    #[error("Malformed record: {0:?}")]
    Malformed(String),
}
