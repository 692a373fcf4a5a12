//! Artifact store for uploaded and transcoded media.
//!
//! This crate provides:
//! - Write-once storage of uploaded inputs under ID-namespaced keys
//! - Deterministic output keys per job
//! - Staged writes committed by atomic rename
//! - Read access for downloads

pub mod error;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use store::{sanitize_file_name, ArtifactStore, StorageConfig};
