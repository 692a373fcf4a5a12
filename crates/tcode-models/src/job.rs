//! Job definitions and lifecycle.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::{ArtifactRef, EncodeParams};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse an externally supplied ID.
    ///
    /// Valid format: ASCII alphanumerics and hyphens, 8-64 chars.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() < 8 || s.len() > 64 {
            return None;
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return None;
        }
        Some(Self(s.to_string()))
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the queue
    #[default]
    Queued,
    /// Held by a worker
    Running,
    /// Output artifact produced
    Finished,
    /// Execution failed
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Finished => "finished",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Finished | JobState::Failed)
    }

    /// Whether `next` may follow this state.
    ///
    /// `Running -> Running` is allowed so a redelivered job can be restarted
    /// by another worker after a crash.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Running)
                | (JobState::Queued, JobState::Failed)
                | (JobState::Running, JobState::Running)
                | (JobState::Running, JobState::Finished)
                | (JobState::Running, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A state change requested by the worker that owns a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobTransition {
    /// A worker picked the job up
    Start,
    /// The output artifact was produced
    Finish { output_ref: ArtifactRef },
    /// Execution failed
    Fail { error: String },
}

impl JobTransition {
    /// State the job ends up in after this transition.
    pub fn target_state(&self) -> JobState {
        match self {
            JobTransition::Start => JobState::Running,
            JobTransition::Finish { .. } => JobState::Finished,
            JobTransition::Fail { .. } => JobState::Failed,
        }
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid transition for job {job_id}: {from} -> {to}")]
pub struct TransitionError {
    pub job_id: JobId,
    pub from: JobState,
    pub to: JobState,
}

/// A persisted unit of transcoding work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Current state
    #[serde(default)]
    pub state: JobState,

    /// Stored input artifact
    pub input_ref: ArtifactRef,

    /// Sanitized name of the uploaded file
    pub original_name: String,

    /// Encode parameters
    pub params: EncodeParams,

    /// Produced artifact, present only when finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<ArtifactRef>,

    /// Failure detail, present only when failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Number of times a worker started this job
    #[serde(default)]
    pub attempts: u32,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Started at timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Completed at timestamp (finished or failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(input_ref: ArtifactRef, original_name: impl Into<String>, params: EncodeParams) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            state: JobState::Queued,
            input_ref,
            original_name: original_name.into(),
            params,
            output_ref: None,
            error: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply a transition. Terminal jobs are never mutated.
    pub fn apply(&mut self, transition: JobTransition) -> Result<(), TransitionError> {
        let next = transition.target_state();
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                job_id: self.id.clone(),
                from: self.state,
                to: next,
            });
        }

        let now = Utc::now();
        match transition {
            JobTransition::Start => {
                self.attempts += 1;
                self.started_at = Some(now);
            }
            JobTransition::Finish { output_ref } => {
                self.output_ref = Some(output_ref);
                self.completed_at = Some(now);
            }
            JobTransition::Fail { error } => {
                self.error = Some(error);
                self.completed_at = Some(now);
            }
        }
        self.state = next;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            ArtifactRef::new("inputs/u1/clip.mp4").unwrap(),
            "clip.mp4",
            EncodeParams::default(),
        )
    }

    #[test]
    fn test_job_id_parse() {
        assert!(JobId::parse(&JobId::new().to_string()).is_some());
        assert!(JobId::parse("abc-1234-def").is_some());
        assert!(JobId::parse("").is_none());
        assert!(JobId::parse("short").is_none());
        assert!(JobId::parse("has space1").is_none());
        assert!(JobId::parse("has_underscore").is_none());
        assert!(JobId::parse("../../etc/passwd").is_none());
        assert!(JobId::parse(&"a".repeat(65)).is_none());
    }

    #[test]
    fn test_happy_path() {
        let mut job = job();
        assert_eq!(job.state, JobState::Queued);
        assert!(job.output_ref.is_none());

        job.apply(JobTransition::Start).unwrap();
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.attempts, 1);
        assert!(job.output_ref.is_none());

        let out = ArtifactRef::new("outputs/j/transcoded_clip.mp4").unwrap();
        job.apply(JobTransition::Finish { output_ref: out.clone() }).unwrap();
        assert_eq!(job.state, JobState::Finished);
        assert_eq!(job.output_ref, Some(out));
        assert!(job.error.is_none());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_failure_records_error() {
        let mut job = job();
        job.apply(JobTransition::Start).unwrap();
        job.apply(JobTransition::Fail { error: "exit code 1".into() }).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("exit code 1"));
        assert!(job.output_ref.is_none());
    }

    #[test]
    fn test_terminal_states_are_frozen() {
        let mut job = job();
        job.apply(JobTransition::Start).unwrap();
        job.apply(JobTransition::Fail { error: "boom".into() }).unwrap();
        let snapshot = job.clone();

        let err = job.apply(JobTransition::Start).unwrap_err();
        assert_eq!(err.from, JobState::Failed);
        assert_eq!(err.to, JobState::Running);
        assert!(job
            .apply(JobTransition::Finish {
                output_ref: ArtifactRef::new("outputs/x/y.mp4").unwrap()
            })
            .is_err());
        assert_eq!(job, snapshot);
    }

    #[test]
    fn test_no_regression_to_queued_paths() {
        for state in [JobState::Running, JobState::Finished, JobState::Failed] {
            assert!(!state.can_transition_to(JobState::Queued));
        }
        assert!(!JobState::Queued.can_transition_to(JobState::Finished));
        assert!(JobState::Running.can_transition_to(JobState::Running));
    }

    #[test]
    fn test_restart_after_crash_counts_attempts() {
        let mut job = job();
        job.apply(JobTransition::Start).unwrap();
        job.apply(JobTransition::Start).unwrap();
        assert_eq!(job.attempts, 2);
        assert_eq!(job.state, JobState::Running);
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(serde_json::to_string(&JobState::Finished).unwrap(), "\"finished\"");
        let job = job();
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["state"], "queued");
        assert!(json.get("output_ref").is_none());
        let back: Job = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
    }
}
