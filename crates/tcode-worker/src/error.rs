//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Queue operation failed: {0}")]
    QueueFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] tcode_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] tcode_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] tcode_queue::QueueError),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn queue_failed(msg: impl Into<String>) -> Self {
        Self::QueueFailed(msg.into())
    }

    /// Whether handling the same delivery again could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Queue(e) => e.is_infrastructure(),
            WorkerError::QueueFailed(_) => true,
            _ => false,
        }
    }
}
