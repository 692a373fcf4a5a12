//! Business logic behind the HTTP handlers.

pub mod retrieval;
pub mod submission;

pub use retrieval::{DownloadOutcome, JobStatusResponse, RetrievalService};
pub use submission::{SubmitOutcome, Submission, SubmissionRouter};
