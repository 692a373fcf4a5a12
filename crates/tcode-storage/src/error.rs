//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Write failed for {key}: {source}")]
    WriteFailed {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn write_failed(key: impl Into<String>, source: std::io::Error) -> Self {
        Self::WriteFailed {
            key: key.into(),
            source,
        }
    }

    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey(key.into())
    }
}

impl From<tcode_models::InvalidArtifactRef> for StorageError {
    fn from(err: tcode_models::InvalidArtifactRef) -> Self {
        Self::InvalidKey(err.0)
    }
}
