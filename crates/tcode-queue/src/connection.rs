//! Shared Redis connection handle.

use redis::aio::{ConnectionManager, ConnectionManagerConfig, MultiplexedConnection};
use tracing::info;

use crate::config::RedisConfig;
use crate::error::{QueueError, QueueResult};
use crate::retry::{retry_async, RetryConfig};

/// Cloneable Redis handle shared by the queue and the registry.
///
/// Regular commands go through an auto-reconnecting [`ConnectionManager`].
/// Blocking reads get their own connection so they never stall other
/// commands pipelined on the shared one.
#[derive(Clone)]
pub struct RedisPool {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisPool {
    /// Connect and verify with `PING`, retrying with a fixed backoff.
    pub async fn connect(config: &RedisConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| QueueError::connection_failed(format!("invalid REDIS_URL: {}", e)))?;

        let retry = RetryConfig::new("redis_connect")
            .with_max_retries(config.connect_retries)
            .with_fixed_backoff(config.connect_backoff);

        let manager = retry_async(&retry, || {
            let client = client.clone();
            async move {
                // The outer loop owns retries; one attempt per round
                let manager_config = ConnectionManagerConfig::new().set_number_of_retries(0);
                let mut manager = ConnectionManager::new_with_config(client, manager_config).await?;
                redis::cmd("PING")
                    .query_async::<String>(&mut manager)
                    .await?;
                Ok::<_, redis::RedisError>(manager)
            }
        })
        .await
        .map_err(|e| {
            QueueError::connection_failed(format!(
                "Redis unreachable after {} attempts: {}",
                config.connect_retries + 1,
                e
            ))
        })?;

        info!("Connected to Redis");
        Ok(Self { client, manager })
    }

    /// Handle on the shared connection.
    pub fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// Dedicated connection for blocking commands.
    pub async fn blocking_conn(&self) -> QueueResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Round-trip check used by readiness checks.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_connect_gives_up_within_fixed_budget() {
        // Nothing listens on port 1
        let config = RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
            connect_retries: 2,
            connect_backoff: Duration::from_millis(50),
        };

        let start = Instant::now();
        let err = RedisPool::connect(&config).await.err().unwrap();

        assert!(matches!(err, QueueError::ConnectionFailed(_)));
        assert!(err.to_string().contains("after 3 attempts"));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
