//! Submission routing: inline execution for small uploads, the queue for
//! everything else.

use std::sync::Arc;

use axum::body::Bytes;
use tcode_media::Transcoder;
use tcode_models::{ArtifactRef, EncodeParams, Job, JobId, JobState, JobTransition};
use tcode_queue::{JobRegistry, TranscodeTask, WorkQueue};
use tcode_storage::ArtifactStore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::metrics;

/// A validated transcode request.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Name of the uploaded file as sent by the client
    pub file_name: String,
    /// Uploaded bytes
    pub bytes: Bytes,
    pub params: EncodeParams,
    /// Caller asked for a synchronous result
    pub inline: bool,
}

/// Where a submission ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Transcoded synchronously; no job was created.
    Inline {
        artifact: ArtifactRef,
        file_name: String,
    },
    /// Job created and enqueued.
    Queued { job_id: JobId, status: JobState },
}

/// Routes submissions between the inline path and the work queue.
///
/// Both paths share the same store and transcoder.
#[derive(Clone)]
pub struct SubmissionRouter {
    store: Arc<ArtifactStore>,
    registry: Arc<dyn JobRegistry>,
    queue: Arc<dyn WorkQueue>,
    transcoder: Arc<dyn Transcoder>,
    inline_max_bytes: u64,
}

impl SubmissionRouter {
    pub fn new(
        store: Arc<ArtifactStore>,
        registry: Arc<dyn JobRegistry>,
        queue: Arc<dyn WorkQueue>,
        transcoder: Arc<dyn Transcoder>,
        inline_max_bytes: u64,
    ) -> Self {
        Self {
            store,
            registry,
            queue,
            transcoder,
            inline_max_bytes,
        }
    }

    /// Whether an upload of `len` bytes may run inline.
    pub fn runs_inline(&self, inline: bool, len: u64) -> bool {
        inline && len < self.inline_max_bytes
    }

    pub async fn submit(&self, submission: Submission) -> ApiResult<SubmitOutcome> {
        if submission.bytes.is_empty() {
            return Err(ApiError::bad_request("Uploaded file is empty"));
        }

        let input = self
            .store
            .put(&submission.file_name, &submission.bytes)
            .await?;
        let name = input.file_name().to_string();
        let len = submission.bytes.len() as u64;

        if self.runs_inline(submission.inline, len) {
            self.run_inline(input, &name, &submission.params).await
        } else {
            self.enqueue(input, name, submission.params).await
        }
    }

    async fn run_inline(
        &self,
        input: ArtifactRef,
        name: &str,
        params: &EncodeParams,
    ) -> ApiResult<SubmitOutcome> {
        let scope = format!("inline-{}", Uuid::new_v4());
        let output = self.store.output_ref(&scope, name)?;

        info!("Inline transcode of {} ({})", input, params.codec);
        let artifact = self.transcoder.transcode(&input, &output, params).await?;
        metrics::record_submission("inline");

        Ok(SubmitOutcome::Inline {
            file_name: artifact.file_name().to_string(),
            artifact,
        })
    }

    async fn enqueue(
        &self,
        input: ArtifactRef,
        name: String,
        params: EncodeParams,
    ) -> ApiResult<SubmitOutcome> {
        let job = Job::new(input, name, params);
        let output = self.store.output_ref(job.id.as_str(), &job.original_name)?;

        self.registry.create(&job).await?;

        let task = TranscodeTask::for_job(&job, output);
        if let Err(e) = self.queue.enqueue(&task).await {
            // No worker will ever see this job; don't leave it queued forever.
            let transition = JobTransition::Fail {
                error: format!("Failed to enqueue: {}", e),
            };
            if let Err(update_err) = self.registry.update(&job.id, transition).await {
                warn!("Could not mark job {} failed: {}", job.id, update_err);
            }
            return Err(e.into());
        }

        info!("Queued job {} for {}", job.id, job.input_ref);
        metrics::record_submission("queued");

        Ok(SubmitOutcome::Queued {
            job_id: job.id,
            status: job.state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{failing_transcoder, CopyTranscoder};
    use std::time::Duration;
    use tcode_queue::{MemoryJobQueue, MemoryJobRegistry};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: Arc<ArtifactStore>,
        registry: Arc<MemoryJobRegistry>,
        queue: Arc<MemoryJobQueue>,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path()));
        store.init().await.unwrap();
        Fixture {
            _dir: dir,
            store,
            registry: Arc::new(MemoryJobRegistry::new()),
            queue: Arc::new(MemoryJobQueue::default()),
        }
    }

    fn router(f: &Fixture, transcoder: Arc<dyn Transcoder>) -> SubmissionRouter {
        SubmissionRouter::new(
            f.store.clone(),
            f.registry.clone(),
            f.queue.clone(),
            transcoder,
            16,
        )
    }

    fn submission(bytes: &'static [u8], inline: bool) -> Submission {
        Submission {
            file_name: "clip.mp4".to_string(),
            bytes: Bytes::from_static(bytes),
            params: EncodeParams::default(),
            inline,
        }
    }

    #[test]
    fn test_inline_threshold_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let router = SubmissionRouter::new(
            Arc::new(ArtifactStore::new(dir.path())),
            Arc::new(MemoryJobRegistry::new()),
            Arc::new(MemoryJobQueue::default()),
            Arc::new(CopyTranscoder::new(ArtifactStore::new(dir.path()))),
            10,
        );
        assert!(router.runs_inline(true, 9));
        assert!(!router.runs_inline(true, 10));
        assert!(!router.runs_inline(false, 1));
    }

    #[tokio::test]
    async fn test_small_inline_bypasses_registry() {
        let f = fixture().await;
        let router = router(&f, Arc::new(CopyTranscoder::new((*f.store).clone())));

        let outcome = router.submit(submission(b"tiny", true)).await.unwrap();
        let SubmitOutcome::Inline { artifact, file_name } = outcome else {
            panic!("expected inline outcome");
        };
        assert_eq!(file_name, "transcoded_clip.mp4");
        assert!(f.store.exists(&artifact).await);
        assert_eq!(f.queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_large_inline_request_is_queued() {
        let f = fixture().await;
        let router = router(&f, Arc::new(CopyTranscoder::new((*f.store).clone())));

        let outcome = router
            .submit(submission(b"well over sixteen bytes", true))
            .await
            .unwrap();
        let SubmitOutcome::Queued { job_id, status } = outcome else {
            panic!("expected queued outcome");
        };
        assert_eq!(status, JobState::Queued);

        let job = f.registry.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.original_name, "clip.mp4");

        let delivery = f
            .queue
            .dequeue("test", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.task.job_id, job_id);
        assert_eq!(
            delivery.task.output_ref.as_str(),
            format!("outputs/{}/transcoded_clip.mp4", job_id)
        );
    }

    #[tokio::test]
    async fn test_inline_execution_error_surfaces() {
        let f = fixture().await;
        let router = router(&f, Arc::new(failing_transcoder()));

        let err = router.submit(submission(b"tiny", true)).await.unwrap_err();
        assert_eq!(err.code(), "execution_failed");
        assert!(err.to_string().contains("Unknown encoder"));
    }

    #[tokio::test]
    async fn test_empty_upload_rejected() {
        let f = fixture().await;
        let router = router(&f, Arc::new(CopyTranscoder::new((*f.store).clone())));

        let err = router.submit(submission(b"", false)).await.unwrap_err();
        assert_eq!(err.code(), "bad_request");
        assert_eq!(f.queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_creates_no_job() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("not-a-dir");
        std::fs::write(&root, b"x").unwrap();
        let store = Arc::new(ArtifactStore::new(&root));
        let queue = Arc::new(MemoryJobQueue::default());
        let router = SubmissionRouter::new(
            store.clone(),
            Arc::new(MemoryJobRegistry::new()),
            queue.clone(),
            Arc::new(CopyTranscoder::new((*store).clone())),
            16,
        );

        let err = router.submit(submission(b"payload", false)).await.unwrap_err();
        assert_eq!(err.code(), "store_write_failed");
        assert_eq!(queue.len().await.unwrap(), 0);
    }
}
