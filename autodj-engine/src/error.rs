//! Error types for autodj-engine
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

use crate::services::ServiceError;

/// Main error type for autodj-engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Metadata service errors
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Deck did not start playback within the allowed time, or refused to
    #[error("Deck not ready: {0}")]
    DeckNotReady(String),

    /// Deck control failed mid-operation
    #[error("Playback error: {0}")]
    Playback(String),

    /// Persisted state could not be read or written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<autodj_common::Error> for Error {
    fn from(err: autodj_common::Error) -> Self {
        match err {
            autodj_common::Error::Io(e) => Error::Io(e),
            other => Error::Config(other.to_string()),
        }
    }
}

/// Convenience Result type using autodj-engine Error
pub type Result<T> = std::result::Result<T, Error>;
