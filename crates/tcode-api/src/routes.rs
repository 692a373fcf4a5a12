//! API routes.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{download, get_status, health, ready, transcode};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, request_id, request_logging, security_headers};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let max_upload = state.config.max_upload_bytes;

    let job_routes = Router::new()
        .route("/transcode", post(transcode))
        .route("/status/:job_id", get(get_status))
        .route("/download/:job_id", get(download));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .merge(job_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        // Multipart extraction enforces its own limit; keep both in step
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(RequestBodyLimitLayer::new(max_upload))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use crate::test_support::{failing_transcoder, CopyTranscoder};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use std::sync::Arc;
    use std::time::Duration;
    use tcode_media::Transcoder;
    use tcode_models::{JobId, JobTransition};
    use tcode_queue::{JobRegistry, MemoryJobQueue, MemoryJobRegistry, WorkQueue};
    use tcode_storage::ArtifactStore;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "tcode-test-boundary";
    const INLINE_MAX: u64 = 64;

    struct TestApp {
        _dir: TempDir,
        router: Router,
        store: Arc<ArtifactStore>,
        registry: Arc<MemoryJobRegistry>,
        queue: Arc<MemoryJobQueue>,
    }

    async fn app_with(transcoder: impl Fn(ArtifactStore) -> Arc<dyn Transcoder>) -> TestApp {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path()));
        store.init().await.unwrap();
        let registry = Arc::new(MemoryJobRegistry::new());
        let queue = Arc::new(MemoryJobQueue::default());

        let config = ApiConfig {
            inline_max_bytes: INLINE_MAX,
            max_upload_bytes: 4096,
            storage_root: dir.path().to_path_buf(),
            public_base_url: Some("http://tcode.test".to_string()),
            ..ApiConfig::default()
        };
        let state = AppState::from_parts(
            config,
            store.clone(),
            registry.clone(),
            queue.clone(),
            transcoder((*store).clone()),
        );

        TestApp {
            _dir: dir,
            router: create_router(state, None),
            store,
            registry,
            queue,
        }
    }

    async fn app() -> TestApp {
        app_with(|store| Arc::new(CopyTranscoder::new(store))).await
    }

    fn multipart_body(file: Option<(&str, &[u8])>, fields: &[(&str, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((file_name, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn submit_request(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/transcode")
            .header(header::CONTENT_LENGTH, body.len())
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: &TestApp, request: Request<Body>) -> Response {
        app.router.clone().oneshot(request).await.unwrap()
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn submit_queued(app: &TestApp) -> String {
        let body = multipart_body(Some(("movie.mov", [7u8; 128].as_slice())), &[("inline", "true")]);
        let response = send(app, submit_request(body)).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        json(response).await["job_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_small_inline_returns_artifact() {
        let app = app().await;
        let body = multipart_body(Some(("clip.mp4", b"tiny video".as_slice())), &[("inline", "true")]);

        let response = send(&app, submit_request(body)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
        let disposition = response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.contains("filename=\"transcoded_clip.mp4\""));
        assert!(response.headers().contains_key("x-request-id"));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"tiny video");
        assert_eq!(app.queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_large_inline_request_is_queued() {
        let app = app().await;
        let job_id = submit_queued(&app).await;

        let id = JobId::parse(&job_id).unwrap();
        assert!(app.registry.get(&id).await.unwrap().is_some());
        assert_eq!(app.queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_async_submission_response() {
        let app = app().await;
        let body = multipart_body(
            Some(("clip.mp4", b"small but not inline".as_slice())),
            &[("codec", "libx265"), ("bitrate", "500k"), ("resolution", "640x360")],
        );

        let response = send(&app, submit_request(body)).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json(response).await;
        assert_eq!(body["status"], "queued");

        let id = JobId::parse(body["job_id"].as_str().unwrap()).unwrap();
        let job = app.registry.get(&id).await.unwrap().unwrap();
        assert_eq!(job.params.codec, "libx265");
        assert_eq!(job.params.bitrate, "500k");
        assert_eq!(job.params.resolution, "640x360");
    }

    #[tokio::test]
    async fn test_status_follows_job_lifecycle() {
        let app = app().await;
        let job_id = submit_queued(&app).await;
        let status_uri = format!("/status/{}", job_id);

        let body = json(send(&app, get(&status_uri)).await).await;
        assert_eq!(body, serde_json::json!({ "status": "queued" }));

        // Polling without worker activity is idempotent
        let again = json(send(&app, get(&status_uri)).await).await;
        assert_eq!(body, again);

        // Play the worker's part
        let delivery = app
            .queue
            .dequeue("worker-1", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        let id = delivery.task.job_id.clone();
        app.registry.update(&id, JobTransition::Start).await.unwrap();

        let body = json(send(&app, get(&status_uri)).await).await;
        assert_eq!(body, serde_json::json!({ "status": "running" }));

        let response = send(&app, get(&format!("/download/{}", job_id))).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json(response).await;
        assert_eq!(body["status"], "running");
        assert_eq!(body["message"], "Job not finished yet");

        let staging = app.store.prepare_output(&delivery.task.output_ref).await.unwrap();
        tokio::fs::write(&staging, b"transcoded").await.unwrap();
        app.store.commit(&delivery.task.output_ref, &staging).await.unwrap();
        app.registry
            .update(
                &id,
                JobTransition::Finish {
                    output_ref: delivery.task.output_ref.clone(),
                },
            )
            .await
            .unwrap();

        let body = json(send(&app, get(&status_uri)).await).await;
        assert_eq!(body["status"], "finished");
        assert_eq!(
            body["download_url"],
            format!("http://tcode.test/download/{}", job_id)
        );

        let response = send(&app, get(&format!("/download/{}", job_id))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/quicktime");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"transcoded");
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let app = app().await;
        let id = JobId::new();

        for uri in [format!("/status/{}", id), format!("/download/{}", id)] {
            let response = send(&app, get(&uri)).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
            assert_eq!(json(response).await["code"], "job_not_found");
        }
    }

    #[tokio::test]
    async fn test_missing_artifact_is_gone() {
        let app = app().await;
        let job_id = submit_queued(&app).await;
        let delivery = app
            .queue
            .dequeue("worker-1", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        let id = delivery.task.job_id.clone();
        app.registry.update(&id, JobTransition::Start).await.unwrap();
        app.registry
            .update(
                &id,
                JobTransition::Finish {
                    output_ref: delivery.task.output_ref.clone(),
                },
            )
            .await
            .unwrap();

        let response = send(&app, get(&format!("/download/{}", job_id))).await;
        assert_eq!(response.status(), StatusCode::GONE);
        assert_eq!(json(response).await["code"], "artifact_missing");
    }

    #[tokio::test]
    async fn test_failed_job_status_carries_error() {
        let app = app().await;
        let job_id = submit_queued(&app).await;
        let id = JobId::parse(&job_id).unwrap();
        app.registry.update(&id, JobTransition::Start).await.unwrap();
        app.registry
            .update(
                &id,
                JobTransition::Fail {
                    error: "Unknown encoder 'bogus'".to_string(),
                },
            )
            .await
            .unwrap();

        let body = json(send(&app, get(&format!("/status/{}", job_id))).await).await;
        assert_eq!(body["status"], "failed");
        assert_eq!(body["error"], "Unknown encoder 'bogus'");
        assert!(body.get("download_url").is_none());
    }

    #[tokio::test]
    async fn test_missing_file_is_bad_request() {
        let app = app().await;
        let body = multipart_body(None, &[("codec", "libx264")]);

        let response = send(&app, submit_request(body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["code"], "bad_request");
        assert_eq!(app.queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_codec_is_bad_request() {
        let app = app().await;
        let body = multipart_body(Some(("clip.mp4", b"data".as_slice())), &[("codec", "")]);

        let response = send(&app, submit_request(body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_inline_execution_error() {
        let app = app_with(|_| Arc::new(failing_transcoder())).await;
        let body = multipart_body(Some(("clip.mp4", b"tiny".as_slice())), &[("inline", "yes")]);

        let response = send(&app, submit_request(body)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json(response).await;
        assert_eq!(body["code"], "execution_failed");
        assert!(body["detail"].as_str().unwrap().contains("Unknown encoder"));
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected() {
        let app = app().await;
        let body = multipart_body(Some(("clip.mp4", [0u8; 8192].as_slice())), &[]);

        let response = send(&app, submit_request(body)).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(app.queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let app = app().await;

        let response = send(&app, get("/health")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");

        let response = send(&app, get("/ready")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["status"], "ready");
    }
}
