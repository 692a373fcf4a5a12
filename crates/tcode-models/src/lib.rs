//! Shared data models for the tcode transcoding service.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, job states and the transitions between them
//! - Encode parameters passed through to the transcoding tool
//! - Artifact references into the shared artifact store

pub mod artifact;
pub mod job;
pub mod params;

pub use artifact::{ArtifactRef, InvalidArtifactRef};
pub use job::{Job, JobId, JobState, JobTransition, TransitionError};
pub use params::{EncodeParams, ParamsError};
