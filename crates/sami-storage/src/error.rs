//! Error types for the storage crate.

use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Database error.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<Error> for sami_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => sami_core::Error::Storage(e.to_string()),
            Error::Serialization(s) => sami_core::Error::Serialization(s),
            Error::Storage(s) => sami_core::Error::Storage(s),
            Error::InvalidInput(s) => sami_core::Error::Validation(s),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
