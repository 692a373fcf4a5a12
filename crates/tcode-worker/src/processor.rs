//! Per-task processing: registry transitions around one transcode.

use std::sync::Arc;

use tcode_media::Transcoder;
use tcode_models::{JobId, JobTransition};
use tcode_queue::{JobRegistry, QueueError, TranscodeTask};
use tracing::Instrument;

use crate::error::WorkerResult;
use crate::logging::JobLogger;

/// What happened to a task. Every outcome means the delivery can be acked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Output produced and job marked finished
    Finished,
    /// Transcode failed and job marked failed
    Failed,
    /// Nothing to do: unknown job, or already terminal
    Skipped,
}

/// Runs tasks against the registry and the transcoder.
///
/// Execution failures are recorded on the job and never returned.
/// Returned errors are infrastructure errors: the delivery should stay
/// unacknowledged so it can be retried.
pub struct TaskProcessor {
    registry: Arc<dyn JobRegistry>,
    transcoder: Arc<dyn Transcoder>,
}

impl TaskProcessor {
    pub fn new(registry: Arc<dyn JobRegistry>, transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            registry,
            transcoder,
        }
    }

    pub async fn process(&self, task: &TranscodeTask) -> WorkerResult<TaskOutcome> {
        let logger = JobLogger::new(&task.job_id, "transcode");
        self.process_inner(task, &logger)
            .instrument(logger.span())
            .await
    }

    async fn process_inner(
        &self,
        task: &TranscodeTask,
        logger: &JobLogger,
    ) -> WorkerResult<TaskOutcome> {
        let Some(job) = self.registry.get(&task.job_id).await? else {
            logger.log_warning("no registry entry, dropping task");
            return Ok(TaskOutcome::Skipped);
        };

        // Redelivery of a job that already reached a terminal state
        if job.is_terminal() {
            logger.log_skip(&format!("already {}", job.state));
            return Ok(TaskOutcome::Skipped);
        }

        let job = match self.registry.update(&task.job_id, JobTransition::Start).await {
            Ok(job) => job,
            Err(QueueError::InvalidTransition(e)) => {
                logger.log_skip(&e.to_string());
                return Ok(TaskOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };
        logger.log_start(&format!(
            "attempt {} ({} @ {}, {})",
            job.attempts, task.params.codec, task.params.bitrate, task.params.resolution
        ));

        let transition = match self
            .transcoder
            .transcode(&task.input_ref, &task.output_ref, &task.params)
            .await
        {
            Ok(output_ref) => JobTransition::Finish { output_ref },
            Err(e) => JobTransition::Fail { error: e.detail() },
        };

        match self.registry.update(&task.job_id, transition).await {
            Ok(job) => match job.error {
                None => {
                    logger.log_completion(&format!("output at {}", task.output_ref));
                    Ok(TaskOutcome::Finished)
                }
                Some(error) => {
                    logger.log_failure(&error);
                    Ok(TaskOutcome::Failed)
                }
            },
            Err(QueueError::InvalidTransition(e)) => {
                logger.log_skip(&e.to_string());
                Ok(TaskOutcome::Skipped)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Mark a job failed after its delivery was given up on. Best effort.
    pub async fn abandon(&self, job_id: &JobId, reason: &str) {
        let logger = JobLogger::new(job_id, "transcode");
        let transition = JobTransition::Fail {
            error: reason.to_string(),
        };
        match self.registry.update(job_id, transition).await {
            Ok(_) => logger.log_failure(reason),
            Err(e) => logger.log_warning(&format!("could not mark job failed: {}", e)),
        }
    }
}
