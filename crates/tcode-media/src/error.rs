//! Error types for transcode execution.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while executing a transcode.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Transcoding tool not found: {0}")]
    ToolNotFound(String),

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Output not produced: {0}")]
    MissingOutput(PathBuf),

    #[error("Input not found: {0}")]
    InputNotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] tcode_storage::StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Error text suitable for recording on a failed job.
    ///
    /// Includes the captured stderr tail when the tool produced one.
    pub fn detail(&self) -> String {
        match self {
            MediaError::FfmpegFailed {
                stderr: Some(stderr),
                ..
            } if !stderr.trim().is_empty() => format!("{}\n{}", self, stderr.trim()),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_includes_stderr() {
        let err = MediaError::ffmpeg_failed(
            "FFmpeg exited with status 1",
            Some("Unknown encoder 'nope'\n".to_string()),
            Some(1),
        );
        assert_eq!(
            err.detail(),
            "FFmpeg command failed: FFmpeg exited with status 1\nUnknown encoder 'nope'"
        );

        let err = MediaError::Timeout(30);
        assert_eq!(err.detail(), "Operation timed out after 30 seconds");
    }
}
