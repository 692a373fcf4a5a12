//! Redis and queue configuration.

use std::time::Duration;

/// Redis connection configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL (`redis://` or `rediss://`)
    pub url: String,
    /// Connection attempts after the first before giving up
    pub connect_retries: u32,
    /// Fixed delay between connection attempts
    pub connect_backoff: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_retries: 10,
            connect_backoff: Duration::from_secs(2),
        }
    }
}

impl RedisConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            connect_retries: std::env::var("REDIS_CONNECT_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            connect_backoff: Duration::from_secs(
                std::env::var("REDIS_CONNECT_BACKOFF_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            ),
        }
    }
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Stream name for tasks
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Deliveries of one message before it is dead-lettered
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            stream_name: "tcode:jobs".to_string(),
            consumer_group: "tcode:workers".to_string(),
            dlq_stream_name: "tcode:dlq".to_string(),
            max_attempts: 3,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            stream_name: std::env::var("QUEUE_STREAM")
                .unwrap_or_else(|_| "tcode:jobs".to_string()),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or_else(|_| "tcode:workers".to_string()),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM")
                .unwrap_or_else(|_| "tcode:dlq".to_string()),
            max_attempts: std::env::var("QUEUE_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(3),
        }
    }
}
