//! Queue and registry error types.

use tcode_models::{JobId, TransitionError};
use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("Dequeue failed: {0}")]
    DequeueFailed(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job already exists: {0}")]
    DuplicateJob(JobId),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("Concurrent update conflict for job {0}")]
    Conflict(JobId),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn enqueue_failed(msg: impl Into<String>) -> Self {
        Self::EnqueueFailed(msg.into())
    }

    pub fn dequeue_failed(msg: impl Into<String>) -> Self {
        Self::DequeueFailed(msg.into())
    }

    /// Whether the error comes from the backend rather than from the
    /// request itself. Such errors are worth retrying.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            QueueError::ConnectionFailed(_)
                | QueueError::EnqueueFailed(_)
                | QueueError::DequeueFailed(_)
                | QueueError::Conflict(_)
                | QueueError::Redis(_)
        )
    }
}
