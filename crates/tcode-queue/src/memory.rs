//! In-process queue and registry.
//!
//! Same contracts as the Redis implementations, without durability. Used by
//! tests and single-process setups.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tcode_models::{Job, JobId, JobTransition};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;

use crate::error::{QueueError, QueueResult};
use crate::queue::WorkQueue;
use crate::registry::JobRegistry;
use crate::task::{Delivery, TranscodeTask};

#[derive(Debug)]
struct PendingEntry {
    task: TranscodeTask,
    consumer: String,
    delivered_at: Instant,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: u64,
    ready: VecDeque<(String, TranscodeTask)>,
    pending: HashMap<String, PendingEntry>,
    attempts: HashMap<String, u32>,
    dead: Vec<(TranscodeTask, String)>,
}

/// In-memory [`WorkQueue`].
#[derive(Debug)]
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    max_attempts: u32,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new(3)
    }
}

impl MemoryJobQueue {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            max_attempts,
        }
    }

    /// Tasks delivered but not yet acked.
    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Consumer currently holding a delivery.
    pub async fn owner_of(&self, message_id: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .pending
            .get(message_id)
            .map(|p| p.consumer.clone())
    }

    /// Dead-lettered tasks with their reasons.
    pub async fn dead_letters(&self) -> Vec<(TranscodeTask, String)> {
        self.state.lock().await.dead.clone()
    }

    async fn try_take(&self, consumer: &str) -> Option<Delivery> {
        let mut state = self.state.lock().await;
        let (message_id, task) = state.ready.pop_front()?;
        state.pending.insert(
            message_id.clone(),
            PendingEntry {
                task: task.clone(),
                consumer: consumer.to_string(),
                delivered_at: Instant::now(),
                deliveries: 1,
            },
        );
        Some(Delivery {
            message_id,
            deliveries: 1,
            task,
        })
    }
}

#[async_trait]
impl WorkQueue for MemoryJobQueue {
    async fn init(&self) -> QueueResult<()> {
        Ok(())
    }

    async fn enqueue(&self, task: &TranscodeTask) -> QueueResult<String> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let message_id = format!("{}-0", state.next_id);
        state.ready.push_back((message_id.clone(), task.clone()));
        drop(state);

        self.notify.notify_one();
        Ok(message_id)
    }

    async fn dequeue(&self, consumer: &str, block: Duration) -> QueueResult<Option<Delivery>> {
        let deadline = Instant::now() + block;
        loop {
            if let Some(delivery) = self.try_take(consumer).await {
                return Ok(Some(delivery));
            }
            // notify_one stores a permit, so a wakeup between the check and
            // the wait is not lost
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(self.try_take(consumer).await);
            }
        }
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.pending.remove(message_id);
        state.attempts.remove(message_id);
        Ok(())
    }

    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let mut stale: Vec<&String> = state
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.delivered_at) >= min_idle)
            .map(|(id, _)| id)
            .collect();
        stale.sort();
        let stale: Vec<String> = stale.into_iter().take(count).cloned().collect();

        let mut claimed = Vec::with_capacity(stale.len());
        for message_id in stale {
            if let Some(entry) = state.pending.get_mut(&message_id) {
                entry.consumer = consumer.to_string();
                entry.delivered_at = now;
                entry.deliveries += 1;
                claimed.push(Delivery {
                    message_id,
                    deliveries: entry.deliveries,
                    task: entry.task.clone(),
                });
            }
        }
        Ok(claimed)
    }

    async fn touch(&self, consumer: &str, message_id: &str) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.pending.get_mut(message_id) {
            entry.consumer = consumer.to_string();
            entry.delivered_at = Instant::now();
        }
        Ok(())
    }

    async fn record_attempt(&self, delivery: &Delivery) -> QueueResult<u32> {
        let mut state = self.state.lock().await;
        let count = state
            .attempts
            .entry(delivery.message_id.clone())
            .or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state
            .dead
            .push((delivery.task.clone(), reason.to_string()));
        state.pending.remove(&delivery.message_id);
        state.attempts.remove(&delivery.message_id);
        Ok(())
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    async fn len(&self) -> QueueResult<u64> {
        let state = self.state.lock().await;
        Ok((state.ready.len() + state.pending.len()) as u64)
    }

    async fn dlq_len(&self) -> QueueResult<u64> {
        Ok(self.state.lock().await.dead.len() as u64)
    }
}

/// In-memory [`JobRegistry`].
#[derive(Debug, Default)]
pub struct MemoryJobRegistry {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRegistry for MemoryJobRegistry {
    async fn create(&self, job: &Job) -> QueueResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(QueueError::DuplicateJob(job.id.clone()));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn update(&self, id: &JobId, transition: JobTransition) -> QueueResult<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::JobNotFound(id.clone()))?;
        job.apply(transition)?;
        Ok(job.clone())
    }
}
