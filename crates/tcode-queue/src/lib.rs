//! Work queue and job registry.
//!
//! This crate provides:
//! - Task enqueueing and consumption via Redis Streams, with retry and DLQ
//! - The job registry holding each job's lifecycle state
//! - In-memory implementations of both for tests

pub mod config;
pub mod connection;
pub mod error;
pub mod memory;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod task;

pub use config::{QueueConfig, RedisConfig};
pub use connection::RedisPool;
pub use error::{QueueError, QueueResult};
pub use memory::{MemoryJobQueue, MemoryJobRegistry};
pub use queue::{RedisJobQueue, WorkQueue};
pub use registry::{JobRegistry, RedisJobRegistry};
pub use retry::{retry_async, Backoff, FailureTracker, RetryConfig};
pub use task::{Delivery, TranscodeTask};
