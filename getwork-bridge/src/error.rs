//! Common error types for getwork-bridge.
//!
//! This module provides a centralized Error enum using thiserror,
//! with conversions from underlying error types used throughout the crate.

use thiserror::Error;

/// Main error type for getwork-bridge operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from tokio or std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Request carried no usable Basic credentials
    #[error("No credentials")]
    NoCredentials,

    /// Credentials header present but undecodable
    #[error("Malformed credentials: {0}")]
    MalformedCredentials(String),

    /// Backend refused the credentials
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// No pool could accept a new worker
    #[error("No pool available: {0}")]
    NoPoolAvailable(String),

    /// Pool cannot hand out a new extranonce prefix to this worker
    #[error("Pool {0} does not support extranonce change")]
    ExtranonceChangeUnsupported(String),

    /// Pool reached its worker limit
    #[error("Too many workers on pool {pool} (limit {limit})")]
    TooManyWorkers { pool: String, limit: usize },

    /// Request envelope could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Getwork data or target could not be parsed
    #[error("Work encoding error: {0}")]
    Work(String),

    /// A detached registry task panicked or was shut down
    #[error("Session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
