//! Error types for wsm-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using wsm-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in wsm-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity, operation, session or recovery point not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote system error
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Caller is not allowed to touch the record
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Requested state transition is not allowed
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}
