//! Infrastructure error types for scalesync.
//!
//! These errors describe what went wrong below the adapter boundary
//! (transport, decoding, configuration). Adapters translate them into a
//! [`SyncFailure`](crate::SyncFailure) before returning to the orchestrator.

use thiserror::Error;

/// Top-level error type for transport and infrastructure operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Network or transport failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Remote service answered with a non-success status.
    #[error("API error: {status} - {body}")]
    Api { status: u16, body: String },

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Operation did not finish in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Target store is not reachable or not installed.
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
