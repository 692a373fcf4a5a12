//! `POST /transcode`: multipart upload, inline or queued.

use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tcode_models::params::{DEFAULT_BITRATE, DEFAULT_CODEC, DEFAULT_RESOLUTION};
use tcode_models::{EncodeParams, JobState};

use crate::error::{ApiError, ApiResult};
use crate::handlers::jobs::artifact_response;
use crate::services::{Submission, SubmitOutcome};
use crate::state::AppState;

/// Body of an accepted async submission.
#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub job_id: String,
    pub status: JobState,
}

/// Raw multipart fields before validation.
#[derive(Debug, Default)]
struct TranscodeForm {
    file: Option<(String, Bytes)>,
    codec: Option<String>,
    bitrate: Option<String>,
    resolution: Option<String>,
    inline: Option<String>,
}

impl TranscodeForm {
    async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    let file_name = field
                        .file_name()
                        .map(str::to_string)
                        .ok_or_else(|| ApiError::bad_request("file field has no filename"))?;
                    let bytes = field.bytes().await.map_err(multipart_error)?;
                    form.file = Some((file_name, bytes));
                }
                "codec" => form.codec = Some(field.text().await.map_err(multipart_error)?),
                "bitrate" => form.bitrate = Some(field.text().await.map_err(multipart_error)?),
                "resolution" => {
                    form.resolution = Some(field.text().await.map_err(multipart_error)?)
                }
                "inline" => form.inline = Some(field.text().await.map_err(multipart_error)?),
                _ => {}
            }
        }

        Ok(form)
    }

    fn into_submission(self) -> ApiResult<Submission> {
        let (file_name, bytes) = self
            .file
            .ok_or_else(|| ApiError::bad_request("Missing required field: file"))?;

        let params = EncodeParams::new(
            self.codec.unwrap_or_else(|| DEFAULT_CODEC.to_string()),
            self.bitrate.unwrap_or_else(|| DEFAULT_BITRATE.to_string()),
            self.resolution
                .unwrap_or_else(|| DEFAULT_RESOLUTION.to_string()),
        )
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

        let inline = match self.inline {
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                ApiError::bad_request(format!("Invalid value for inline: {:?}", raw))
            })?,
            None => false,
        };

        Ok(Submission {
            file_name,
            bytes,
            params,
            inline,
        })
    }
}

/// `POST /transcode`
pub async fn transcode(State(state): State<AppState>, multipart: Multipart) -> ApiResult<Response> {
    let submission = TranscodeForm::read(multipart).await?.into_submission()?;

    match state.submission.submit(submission).await? {
        SubmitOutcome::Inline {
            artifact,
            file_name,
        } => {
            let (file, len) = state.store.open_for_read(&artifact).await?;
            artifact_response(file, len, &file_name)
        }
        SubmitOutcome::Queued { job_id, status } => Ok((
            StatusCode::ACCEPTED,
            Json(QueuedResponse {
                job_id: job_id.to_string(),
                status,
            }),
        )
            .into_response()),
    }
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::bad_request(err.body_text())
    }
}

/// Lenient boolean for form fields.
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
