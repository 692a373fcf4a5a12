//! Status and download lookups.

use std::sync::Arc;

use serde::Serialize;
use tcode_models::{Job, JobId, JobState};
use tcode_queue::JobRegistry;
use tcode_storage::{ArtifactStore, StorageError};
use tokio::fs::File;

use crate::error::{ApiError, ApiResult};

/// Body of `GET /status/{job_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatusResponse {
    pub status: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a download lookup.
#[derive(Debug)]
pub enum DownloadOutcome {
    /// Finished artifact, opened for streaming.
    Ready {
        file: File,
        len: u64,
        file_name: String,
    },
    /// The job has not finished (yet).
    NotReady(JobState),
}

/// Read-only view of jobs and their outputs.
#[derive(Clone)]
pub struct RetrievalService {
    store: Arc<ArtifactStore>,
    registry: Arc<dyn JobRegistry>,
}

impl RetrievalService {
    pub fn new(store: Arc<ArtifactStore>, registry: Arc<dyn JobRegistry>) -> Self {
        Self { store, registry }
    }

    /// Look up a job by its external ID.
    ///
    /// Malformed IDs can never name a job and report not found.
    pub async fn lookup(&self, raw_id: &str) -> ApiResult<Job> {
        let id = JobId::parse(raw_id).ok_or_else(|| ApiError::job_not_found(raw_id))?;
        self.registry
            .get(&id)
            .await?
            .ok_or_else(|| ApiError::job_not_found(raw_id))
    }

    /// Current status of a job.
    ///
    /// `download_url` is only set when the output actually exists and a base
    /// URL is known.
    pub async fn get_status(
        &self,
        raw_id: &str,
        base_url: Option<&str>,
    ) -> ApiResult<JobStatusResponse> {
        let job = self.lookup(raw_id).await?;

        let download_url = match (&job.output_ref, base_url) {
            (Some(output), Some(base)) if job.state == JobState::Finished => {
                if self.store.exists(output).await {
                    Some(format!("{}/download/{}", base, job.id))
                } else {
                    None
                }
            }
            _ => None,
        };

        Ok(JobStatusResponse {
            status: job.state,
            download_url,
            error: job.error,
        })
    }

    /// Open the output of a finished job.
    pub async fn get_result(&self, raw_id: &str) -> ApiResult<DownloadOutcome> {
        let job = self.lookup(raw_id).await?;
        if job.state != JobState::Finished {
            return Ok(DownloadOutcome::NotReady(job.state));
        }

        let output = job
            .output_ref
            .ok_or_else(|| ApiError::artifact_missing(job.id.as_str()))?;

        match self.store.open_for_read(&output).await {
            Ok((file, len)) => Ok(DownloadOutcome::Ready {
                file,
                len,
                file_name: output.file_name().to_string(),
            }),
            Err(StorageError::NotFound(_)) => Err(ApiError::artifact_missing(job.id.as_str())),
            Err(e) => Err(e.into()),
        }
    }
}
