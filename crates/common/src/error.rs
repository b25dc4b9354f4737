//! Error types for the material store

use thiserror::Error;

/// Result type alias using the store Error
pub type Result<T> = std::result::Result<T, Error>;

/// Store error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Integrity verification failed: {0}")]
    IntegrityError(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid job timestamp '{value}': expected yyyyMMdd_HHmmss")]
    InvalidTimestamp { value: String },

    #[error("Store unavailable at {path}: {reason}")]
    Unavailable { path: String, reason: String },
}
