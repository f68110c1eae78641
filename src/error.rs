//! # Error Types
//!
//! Custom error types for Flight Tracker using `thiserror`.
//!
//! Malformed telemetry is not an error here: the decoder reports it as a
//! [`Rejection`](crate::packet::protocol::Rejection) and ingestion moves on.

use thiserror::Error;

/// Main error type for Flight Tracker
#[derive(Debug, Error)]
pub enum FlightTrackerError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial transport errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// No usable serial device was found
    #[error("No serial device found (tried: {0})")]
    SerialPortNotFound(String),

    /// Persistence errors from the session database
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A persisted row could not be converted back into a model
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// A blocking store task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    /// `start` was called while another session is still open
    #[error("Session {0} is still open")]
    SessionAlreadyOpen(String),
}

/// Result type alias for Flight Tracker
pub type Result<T> = std::result::Result<T, FlightTrackerError>;
