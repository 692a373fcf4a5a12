//! Work queue using Redis Streams.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{
    StreamClaimOptions, StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions,
    StreamReadReply,
};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::connection::RedisPool;
use crate::error::{QueueError, QueueResult};
use crate::task::{Delivery, TranscodeTask};

/// TTL of per-message attempt counters.
const ATTEMPT_TTL_SECS: i64 = 86_400;

/// Pending entries inspected per claim pass.
const PENDING_SCAN_LIMIT: usize = 100;

/// Durable FIFO of transcode tasks with at-least-once delivery.
///
/// A delivered task stays pending until [`ack`](WorkQueue::ack)ed. Pending
/// tasks whose consumer went away are handed out again by
/// [`claim_stale`](WorkQueue::claim_stale).
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Prepare the backend (streams, consumer groups).
    async fn init(&self) -> QueueResult<()>;

    /// Append a task. Returns the backend message ID.
    async fn enqueue(&self, task: &TranscodeTask) -> QueueResult<String>;

    /// Take the next task for `consumer`, waiting up to `block`.
    async fn dequeue(&self, consumer: &str, block: Duration) -> QueueResult<Option<Delivery>>;

    /// Mark a delivery as handled and drop it.
    async fn ack(&self, message_id: &str) -> QueueResult<()>;

    /// Reset the idle time of a delivery `consumer` is still working on, so
    /// [`claim_stale`](WorkQueue::claim_stale) leaves it alone.
    async fn touch(&self, consumer: &str, message_id: &str) -> QueueResult<()>;

    /// Reassign up to `count` deliveries idle for at least `min_idle` to
    /// `consumer`.
    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>>;

    /// Count one failed handling attempt. Returns the new total.
    async fn record_attempt(&self, delivery: &Delivery) -> QueueResult<u32>;

    /// Move a delivery to the dead letter queue and ack it.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> QueueResult<()>;

    /// Attempts allowed before a delivery is dead-lettered.
    fn max_attempts(&self) -> u32;

    /// Number of tasks in the queue, including in-flight ones.
    async fn len(&self) -> QueueResult<u64>;

    /// Number of dead-lettered tasks.
    async fn dlq_len(&self) -> QueueResult<u64>;
}

/// [`WorkQueue`] on a Redis stream with a consumer group.
#[derive(Clone)]
pub struct RedisJobQueue {
    pool: RedisPool,
    config: QueueConfig,
}

impl RedisJobQueue {
    pub fn new(pool: RedisPool, config: QueueConfig) -> Self {
        Self { pool, config }
    }

    fn attempts_key(&self, message_id: &str) -> String {
        format!("{}:attempts:{}", self.config.stream_name, message_id)
    }

    /// Decode a stream entry. Malformed payloads are acked and dropped.
    async fn decode(&self, entry: StreamId, deliveries: u32) -> QueueResult<Option<Delivery>> {
        let payload = entry.get::<String>("task");
        let parsed = payload
            .as_deref()
            .map(serde_json::from_str::<TranscodeTask>);

        match parsed {
            Some(Ok(task)) => Ok(Some(Delivery {
                message_id: entry.id,
                deliveries,
                task,
            })),
            Some(Err(e)) => {
                warn!("Dropping malformed task {}: {}", entry.id, e);
                self.ack(&entry.id).await?;
                Ok(None)
            }
            None => {
                warn!("Dropping message {} without task payload", entry.id);
                self.ack(&entry.id).await?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl WorkQueue for RedisJobQueue {
    async fn init(&self) -> QueueResult<()> {
        let mut conn = self.pool.conn();

        // Start at 0 so tasks enqueued before the group existed are not lost
        let result: Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(&self.config.stream_name, &self.config.consumer_group, "0")
            .await;

        match result {
            Ok(()) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    async fn enqueue(&self, task: &TranscodeTask) -> QueueResult<String> {
        let mut conn = self.pool.conn();
        let payload = serde_json::to_string(task)?;

        let message_id: String = conn
            .xadd(
                &self.config.stream_name,
                "*",
                &[("task", payload.as_str()), ("job_id", task.job_id.as_str())],
            )
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        info!("Enqueued job {} with message ID {}", task.job_id, message_id);
        Ok(message_id)
    }

    async fn dequeue(&self, consumer: &str, block: Duration) -> QueueResult<Option<Delivery>> {
        let mut conn = self.pool.blocking_conn().await?;

        let opts = StreamReadOptions::default()
            .group(&self.config.consumer_group, consumer)
            .count(1)
            .block(block.as_millis().max(1) as usize);

        // Nil reply when the block times out
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.config.stream_name], &[">"], &opts)
            .await
            .map_err(|e| QueueError::dequeue_failed(e.to_string()))?;

        let Some(reply) = reply else {
            return Ok(None);
        };

        match reply.keys.into_iter().flat_map(|stream| stream.ids).next() {
            Some(entry) => self.decode(entry, 1).await,
            None => Ok(None),
        }
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.pool.conn();

        let _: () = conn
            .xack(&self.config.stream_name, &self.config.consumer_group, &[message_id])
            .await?;
        let _: () = conn.xdel(&self.config.stream_name, &[message_id]).await?;
        let _: () = conn.del(self.attempts_key(message_id)).await?;

        debug!("Acknowledged message: {}", message_id);
        Ok(())
    }

    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.pool.conn();
        let min_idle_ms = min_idle.as_millis() as usize;

        let pending: StreamPendingCountReply = conn
            .xpending_count(
                &self.config.stream_name,
                &self.config.consumer_group,
                "-",
                "+",
                PENDING_SCAN_LIMIT.max(count),
            )
            .await?;

        let stale: Vec<(String, u32)> = pending
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms >= min_idle_ms)
            .take(count)
            .map(|p| (p.id, p.times_delivered as u32))
            .collect();

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = stale.iter().map(|(id, _)| id.as_str()).collect();
        let times_delivered: HashMap<&str, u32> =
            stale.iter().map(|(id, n)| (id.as_str(), *n)).collect();
        // The server re-checks idle time, so a racing claimer loses cleanly
        let claimed: StreamClaimReply = conn
            .xclaim(
                &self.config.stream_name,
                &self.config.consumer_group,
                consumer,
                min_idle_ms,
                &ids,
            )
            .await?;

        let mut deliveries = Vec::with_capacity(claimed.ids.len());
        for entry in claimed.ids {
            // XCLAIM counted one more delivery
            let times = times_delivered
                .get(entry.id.as_str())
                .copied()
                .unwrap_or(0)
                + 1;
            if let Some(delivery) = self.decode(entry, times).await? {
                info!(
                    "Claimed stale job {} ({}, delivery {})",
                    delivery.task.job_id, delivery.message_id, delivery.deliveries
                );
                deliveries.push(delivery);
            }
        }
        Ok(deliveries)
    }

    async fn touch(&self, consumer: &str, message_id: &str) -> QueueResult<()> {
        let mut conn = self.pool.conn();

        // JUSTID leaves the delivery counter alone
        let opts = StreamClaimOptions::default().with_justid();
        let _: Vec<String> = conn
            .xclaim_options(
                &self.config.stream_name,
                &self.config.consumer_group,
                consumer,
                0,
                &[message_id],
                opts,
            )
            .await?;
        Ok(())
    }

    async fn record_attempt(&self, delivery: &Delivery) -> QueueResult<u32> {
        let mut conn = self.pool.conn();
        let key = self.attempts_key(&delivery.message_id);

        let count: u32 = conn.incr(&key, 1).await?;
        let _: () = conn.expire(&key, ATTEMPT_TTL_SECS).await?;
        Ok(count)
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        let mut conn = self.pool.conn();
        let payload = serde_json::to_string(&delivery.task)?;

        let _: String = conn
            .xadd(
                &self.config.dlq_stream_name,
                "*",
                &[
                    ("task", payload.as_str()),
                    ("job_id", delivery.task.job_id.as_str()),
                    ("error", reason),
                    ("original_id", delivery.message_id.as_str()),
                ],
            )
            .await?;

        self.ack(&delivery.message_id).await?;

        warn!("Moved job {} to DLQ: {}", delivery.task.job_id, reason);
        Ok(())
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.pool.conn();
        Ok(conn.xlen(&self.config.stream_name).await?)
    }

    async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.pool.conn();
        Ok(conn.xlen(&self.config.dlq_stream_name).await?)
    }
}
