//! Job status and download handlers.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tcode_models::JobState;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::error::{ApiError, ApiResult};
use crate::services::{DownloadOutcome, JobStatusResponse};
use crate::state::AppState;

/// Body returned by `GET /download/{job_id}` while the job is still going.
#[derive(Debug, Serialize)]
pub struct NotReadyResponse {
    pub status: JobState,
    pub message: String,
}

/// `GET /status/{job_id}`
pub async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<JobStatusResponse>> {
    let base_url = state
        .config
        .public_base_url
        .clone()
        .or_else(|| base_url_from_headers(&headers));

    let status = state
        .retrieval
        .get_status(&job_id, base_url.as_deref())
        .await?;
    Ok(Json(status))
}

/// `GET /download/{job_id}`
pub async fn download(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    match state.retrieval.get_result(&job_id).await? {
        DownloadOutcome::Ready {
            file,
            len,
            file_name,
        } => artifact_response(file, len, &file_name),
        DownloadOutcome::NotReady(status) => Ok((
            StatusCode::ACCEPTED,
            Json(NotReadyResponse {
                status,
                message: "Job not finished yet".to_string(),
            }),
        )
            .into_response()),
    }
}

/// Stream an opened artifact as an attachment.
pub(crate) fn artifact_response(file: File, len: u64, file_name: &str) -> ApiResult<Response> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_for(file_name))
        .header(header::CONTENT_LENGTH, len)
        .header(header::CONTENT_DISPOSITION, content_disposition(file_name))
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ApiError::internal(format!("Failed to build response: {}", e)))
}

/// Guess a media type from the file extension.
pub(crate) fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "ts" => "video/mp2t",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "gif" => "image/gif",
        _ => "video/mp4",
    }
}

/// `Content-Disposition` for a download, with an ASCII fallback name and the
/// exact name percent-encoded in `filename*`.
pub(crate) fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(file_name)
    )
}

/// Base URL of this service as seen by the client.
fn base_url_from_headers(headers: &HeaderMap) -> Option<String> {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let host = header_str("x-forwarded-host").or_else(|| header_str("host"))?;
    if host.contains(['/', '\\', '@', ' ']) {
        return None;
    }

    let proto = match header_str("x-forwarded-proto").as_deref() {
        Some("https") => "https",
        _ => "http",
    };

    Some(format!("{}://{}", proto, host))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("transcoded_clip.mp4"), "video/mp4");
        assert_eq!(content_type_for("transcoded_clip.WEBM"), "video/webm");
        assert_eq!(content_type_for("transcoded_clip.mov"), "video/quicktime");
        assert_eq!(content_type_for("no_extension"), "video/mp4");
    }

    #[test]
    fn test_content_disposition() {
        assert_eq!(
            content_disposition("transcoded_clip.mp4"),
            "attachment; filename=\"transcoded_clip.mp4\"; filename*=UTF-8''transcoded_clip.mp4"
        );

        let value = content_disposition("transcoded_vidéo \"1\".mp4");
        assert!(value.starts_with("attachment; filename=\"transcoded_vid_o _1_.mp4\""));
        assert!(value.ends_with("filename*=UTF-8''transcoded_vid%C3%A9o%20%221%22.mp4"));
        assert!(HeaderValue::from_str(&value).is_ok());
    }

    #[test]
    fn test_base_url_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(base_url_from_headers(&headers), None);

        headers.insert("host", HeaderValue::from_static("localhost:8000"));
        assert_eq!(
            base_url_from_headers(&headers).as_deref(),
            Some("http://localhost:8000")
        );

        headers.insert("x-forwarded-host", HeaderValue::from_static("media.example.com"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert_eq!(
            base_url_from_headers(&headers).as_deref(),
            Some("https://media.example.com")
        );

        headers.insert("x-forwarded-host", HeaderValue::from_static("evil.com/path"));
        assert_eq!(base_url_from_headers(&headers), None);
    }
}
