//! Transcoding worker.
//!
//! This crate provides:
//! - The job executor that consumes the queue with bounded concurrency
//! - Per-task processing with registry state transitions
//! - Crash recovery of abandoned deliveries
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod processor;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use processor::{TaskOutcome, TaskProcessor};
