//! Core error type shared across the SAMI crates.
//!
//! Each crate keeps its own focused error enum and converts into [`Error`]
//! when a failure has to cross a crate boundary.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can cross the public boundary of the pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration is malformed or inconsistent.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Input failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Persistence backend failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Anything else.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound("camera_9".to_string());
        assert_eq!(err.to_string(), "Not found: camera_9");

        let err = Error::Configuration("poll interval must be positive".to_string());
        assert!(err.to_string().contains("poll interval"));
    }

    #[test]
    fn test_json_error_conversion() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{nope");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
