//! Job registry: the persistent record of every job's state.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tcode_models::{Job, JobId, JobTransition};
use tracing::{debug, warn};

use crate::connection::RedisPool;
use crate::error::{QueueError, QueueResult};
use crate::retry::Backoff;

/// Key prefix for job documents.
const JOB_KEY_PREFIX: &str = "tcode:job:";

/// Optimistic update attempts before reporting a conflict.
const MAX_UPDATE_ATTEMPTS: u32 = 5;

/// Pause after losing a compare-and-set race.
const UPDATE_BACKOFF: Backoff = Backoff::Exponential {
    base: Duration::from_millis(5),
    max: Duration::from_millis(100),
};

/// Replace the document only if nobody changed it since it was read.
const COMPARE_AND_SET: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2])
  return 1
end
return 0
"#;

/// Persistent map from job ID to job record.
///
/// Updates go through [`JobTransition`]s so the forward-only state machine
/// is enforced at the store, not by callers.
#[async_trait]
pub trait JobRegistry: Send + Sync {
    /// Insert a new job. Fails with [`QueueError::DuplicateJob`] if the ID
    /// is taken.
    async fn create(&self, job: &Job) -> QueueResult<()>;

    /// Look up a job.
    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>>;

    /// Apply a transition and return the updated job.
    async fn update(&self, id: &JobId, transition: JobTransition) -> QueueResult<Job>;
}

/// [`JobRegistry`] storing one JSON document per job in Redis.
///
/// Documents never expire; retention is left to the Redis eviction policy.
#[derive(Clone)]
pub struct RedisJobRegistry {
    pool: RedisPool,
    cas: redis::Script,
}

impl RedisJobRegistry {
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool,
            cas: redis::Script::new(COMPARE_AND_SET),
        }
    }

    fn key(id: &JobId) -> String {
        format!("{}{}", JOB_KEY_PREFIX, id)
    }
}

#[async_trait]
impl JobRegistry for RedisJobRegistry {
    async fn create(&self, job: &Job) -> QueueResult<()> {
        let mut conn = self.pool.conn();
        let json = serde_json::to_string(job)?;

        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::key(&job.id))
            .arg(json)
            .arg("NX")
            .query_async(&mut conn)
            .await?;

        if reply.is_none() {
            return Err(QueueError::DuplicateJob(job.id.clone()));
        }
        debug!("Created job {}", job.id);
        Ok(())
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>> {
        let mut conn = self.pool.conn();
        let raw: Option<String> = conn.get(Self::key(id)).await?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    async fn update(&self, id: &JobId, transition: JobTransition) -> QueueResult<Job> {
        let mut conn = self.pool.conn();
        let key = Self::key(id);

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let raw: Option<String> = conn.get(&key).await?;
            let raw = raw.ok_or_else(|| QueueError::JobNotFound(id.clone()))?;

            let mut job: Job = serde_json::from_str(&raw)?;
            job.apply(transition.clone())?;
            let updated = serde_json::to_string(&job)?;

            let swapped: i32 = self
                .cas
                .key(&key)
                .arg(&raw)
                .arg(&updated)
                .invoke_async(&mut conn)
                .await?;

            if swapped == 1 {
                debug!("Job {} -> {}", id, job.state);
                return Ok(job);
            }
            warn!("Job {} changed concurrently, retrying update", id);
            tokio::time::sleep(UPDATE_BACKOFF.delay_for_attempt(attempt)).await;
        }

        Err(QueueError::Conflict(id.clone()))
    }
}
