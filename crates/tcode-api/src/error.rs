//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tcode_media::MediaError;
use tcode_queue::QueueError;
use tcode_storage::StorageError;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Failed to store upload: {0}")]
    StoreWriteFailed(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Artifact missing for job {0}")]
    ArtifactMissing(String),

    #[error("Transcode failed: {0}")]
    ExecutionFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Queue error: {0}")]
    Queue(QueueError),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound(id.into())
    }

    pub fn artifact_missing(id: impl Into<String>) -> Self {
        Self::ArtifactMissing(id.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::JobNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ArtifactMissing(_) => StatusCode::GONE,
            ApiError::StoreWriteFailed(_)
            | ApiError::ExecutionFailed(_)
            | ApiError::Internal(_)
            | ApiError::Storage(_)
            | ApiError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::PayloadTooLarge(_) => "payload_too_large",
            ApiError::StoreWriteFailed(_) => "store_write_failed",
            ApiError::JobNotFound(_) => "job_not_found",
            ApiError::ArtifactMissing(_) => "artifact_missing",
            ApiError::ExecutionFailed(_) => "execution_failed",
            ApiError::Internal(_) | ApiError::Storage(_) | ApiError::Queue(_) => "internal",
        }
    }

    fn is_internal(&self) -> bool {
        matches!(
            self,
            ApiError::Internal(_) | ApiError::Storage(_) | ApiError::Queue(_)
        )
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::WriteFailed { .. } => Self::StoreWriteFailed(err.to_string()),
            StorageError::InvalidKey(name) => {
                Self::BadRequest(format!("Unusable file name: {:?}", name))
            }
            other => Self::Storage(other),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::JobNotFound(id) => Self::JobNotFound(id.to_string()),
            other => Self::Queue(other),
        }
    }
}

impl From<MediaError> for ApiError {
    fn from(err: MediaError) -> Self {
        Self::ExecutionFailed(err.detail())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let detail = if self.is_internal()
            && std::env::var("ENVIRONMENT")
                .map(|v| v.eq_ignore_ascii_case("production"))
                .unwrap_or(false)
        {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        if status.is_server_error() {
            tracing::error!(code = self.code(), "{}", self);
        }

        let body = ErrorResponse {
            detail,
            code: self.code(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcode_models::JobId;

    #[test]
    fn test_status_and_codes() {
        let cases = [
            (ApiError::bad_request("x"), StatusCode::BAD_REQUEST, "bad_request"),
            (ApiError::job_not_found("x"), StatusCode::NOT_FOUND, "job_not_found"),
            (ApiError::artifact_missing("x"), StatusCode::GONE, "artifact_missing"),
            (
                ApiError::ExecutionFailed("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "execution_failed",
            ),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status_code(), status);
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_conversions() {
        let err: ApiError = StorageError::write_failed(
            "inputs/a/b.mp4",
            std::io::Error::other("disk full"),
        )
        .into();
        assert_eq!(err.code(), "store_write_failed");

        let err: ApiError = QueueError::JobNotFound(JobId::new()).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err: ApiError = QueueError::connection_failed("down").into();
        assert_eq!(err.code(), "internal");

        let err: ApiError = MediaError::Timeout(5).into();
        assert_eq!(err.code(), "execution_failed");
    }
}
