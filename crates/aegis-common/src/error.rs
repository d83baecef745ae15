//! Error types for Aegis.

use thiserror::Error;

use crate::version::SchemaVersion;

/// Top-level error type for Aegis operations.
#[derive(Debug, Error)]
pub enum AegisError {
    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Schema version mismatch
    #[error("Schema version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Expected version
        expected: SchemaVersion,
        /// Actual version found
        actual: SchemaVersion,
    },
}

impl From<bincode::Error> for AegisError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for Aegis operations.
pub type AegisResult<T> = Result<T, AegisError>;
