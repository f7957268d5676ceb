/*!
Error types for the Persist formatter framework.
*/

use std::io;
use thiserror::Error;

/// Result type used throughout the Persist framework.
pub type Result<T> = std::result::Result<T, PersistError>;

/// Errors that can occur while registering formatters or moving objects
/// across a storage boundary.
///
/// Every error surfaces directly to the immediate caller; nothing in the
/// framework retries an operation on its behalf.
#[derive(Error, Debug)]
pub enum PersistError {
    /// Missing or invalid policy, or an unregistered type tag
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O failure at the storage boundary
    #[error("Storage error: {0}")]
    Storage(String),

    /// Malformed stored bytes
    #[error("Format error: {0}")]
    Format(String),

    /// Dispatch resolved to the wrong concrete type
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Update or read target absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// API misuse, such as reading past the end of a sequence
    #[error("Logic error: {0}")]
    Logic(String),
}

impl PersistError {
    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new format error
    pub fn format<S: Into<String>>(msg: S) -> Self {
        Self::Format(msg.into())
    }

    /// Create a new not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new logic error
    pub fn logic<S: Into<String>>(msg: S) -> Self {
        Self::Logic(msg.into())
    }

    /// Create a new type mismatch error
    pub fn type_mismatch<E: Into<String>, A: Into<String>>(expected: E, actual: A) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Short, stable name of the error kind, used as a metrics/log label
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Storage(_) => "storage",
            Self::Format(_) => "format",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::NotFound(_) => "not_found",
            Self::Logic(_) => "logic",
        }
    }
}

impl From<io::Error> for PersistError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => PersistError::NotFound(err.to_string()),
            io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => {
                PersistError::Format(err.to_string())
            }
            _ => PersistError::Storage(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for PersistError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            PersistError::Storage(err.to_string())
        } else {
            PersistError::Format(err.to_string())
        }
    }
}
