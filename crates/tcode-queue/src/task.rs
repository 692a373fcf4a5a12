//! Queue payload types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tcode_models::{ArtifactRef, EncodeParams, Job, JobId};

/// Work item placed on the queue for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeTask {
    /// Job this task executes
    pub job_id: JobId,
    /// Stored input artifact
    pub input_ref: ArtifactRef,
    /// Where the output is published on success
    pub output_ref: ArtifactRef,
    /// Encode parameters
    pub params: EncodeParams,
    /// When the task was enqueued
    pub enqueued_at: DateTime<Utc>,
}

impl TranscodeTask {
    /// Build the task for a freshly created job.
    pub fn for_job(job: &Job, output_ref: ArtifactRef) -> Self {
        Self {
            job_id: job.id.clone(),
            input_ref: job.input_ref.clone(),
            output_ref,
            params: job.params.clone(),
            enqueued_at: Utc::now(),
        }
    }
}

/// A task handed to one consumer, to be acknowledged once handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Backend message ID used for ack and retry bookkeeping
    pub message_id: String,
    /// Times the message has been handed out, this delivery included
    pub deliveries: u32,
    /// The task
    pub task: TranscodeTask,
}
