//! Job executor.

use std::sync::Arc;
use std::time::Duration;

use tcode_queue::{Delivery, FailureTracker, WorkQueue};
use tokio::sync::{watch, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::processor::{TaskOutcome, TaskProcessor};

/// Deliveries claimed per claim pass.
const CLAIM_BATCH: usize = 10;

/// Pause after a queue backend error.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Failures logged before a loop goes quiet.
const MAX_LOGGED_FAILURES: u32 = 5;

/// Heartbeats per claim idle window.
const HEARTBEATS_PER_IDLE_WINDOW: u32 = 3;

/// Floor for the heartbeat interval.
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

/// Keeps a delivery owned by this consumer while it is being handled, so
/// claim loops elsewhere only take over work from workers that went away.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    consumer: String,
    interval: Duration,
}

impl Heartbeat {
    pub fn new(consumer: impl Into<String>, claim_min_idle: Duration) -> Self {
        Self {
            consumer: consumer.into(),
            interval: (claim_min_idle / HEARTBEATS_PER_IDLE_WINDOW).max(MIN_HEARTBEAT_INTERVAL),
        }
    }
}

/// Job executor that processes tasks from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<dyn WorkQueue>,
    processor: Arc<TaskProcessor>,
    heartbeat: Heartbeat,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, queue: Arc<dyn WorkQueue>, processor: TaskProcessor) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.concurrency));
        let (shutdown, _) = watch::channel(false);
        let heartbeat = Heartbeat::new(&config.consumer_name, config.claim_min_idle);

        Self {
            config,
            queue,
            processor: Arc::new(processor),
            heartbeat,
            job_semaphore,
            shutdown,
        }
    }

    /// Run until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.config.consumer_name, self.config.concurrency
        );

        self.queue.init().await?;

        let claim_task = tokio::spawn(Self::claim_loop(
            self.config.clone(),
            Arc::clone(&self.queue),
            Arc::clone(&self.processor),
            self.heartbeat.clone(),
            Arc::clone(&self.job_semaphore),
            self.shutdown.subscribe(),
        ));

        self.consume_loop().await;

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        let all = self.config.concurrency as u32;
        match tokio::time::timeout(
            self.config.shutdown_timeout,
            self.job_semaphore.acquire_many(all),
        )
        .await
        {
            Ok(_) => info!("All in-flight jobs finished"),
            Err(_) => warn!(
                "Shutdown timeout after {:?}; unfinished jobs will be reclaimed",
                self.config.shutdown_timeout
            ),
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn consume_loop(&self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut failures = FailureTracker::new(MAX_LOGGED_FAILURES);

        loop {
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received, stopping executor");
                break;
            }

            // Only take work when there is a free slot
            let permit = tokio::select! {
                _ = shutdown_rx.changed() => continue,
                permit = Arc::clone(&self.job_semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let delivery = match self
                .queue
                .dequeue(&self.config.consumer_name, self.config.block_timeout)
                .await
            {
                Ok(Some(delivery)) => {
                    failures.record_success();
                    delivery
                }
                Ok(None) => {
                    failures.record_success();
                    continue;
                }
                Err(e) => {
                    if failures.record_failure() {
                        error!("Error consuming jobs: {}", e);
                    }
                    drop(permit);
                    tokio::time::sleep(ERROR_BACKOFF).await;
                    continue;
                }
            };

            debug!("Dequeued job {} ({})", delivery.task.job_id, delivery.message_id);
            let queue = Arc::clone(&self.queue);
            let processor = Arc::clone(&self.processor);
            let heartbeat = self.heartbeat.clone();
            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(queue, processor, &heartbeat, delivery).await;
            });
        }
    }

    /// Periodically take over deliveries whose consumer went away.
    async fn claim_loop(
        config: WorkerConfig,
        queue: Arc<dyn WorkQueue>,
        processor: Arc<TaskProcessor>,
        heartbeat: Heartbeat,
        semaphore: Arc<Semaphore>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(config.claim_interval);
        let mut failures = FailureTracker::new(MAX_LOGGED_FAILURES);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let claimed = match queue
                        .claim_stale(&config.consumer_name, config.claim_min_idle, CLAIM_BATCH)
                        .await
                    {
                        Ok(claimed) => {
                            failures.record_success();
                            claimed
                        }
                        Err(e) => {
                            if failures.record_failure() {
                                warn!("Failed to claim stale jobs: {}", e);
                            }
                            continue;
                        }
                    };

                    if !claimed.is_empty() {
                        info!("Claimed {} stale jobs", claimed.len());
                    }
                    for delivery in claimed {
                        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                            return;
                        };
                        let queue = Arc::clone(&queue);
                        let processor = Arc::clone(&processor);
                        let heartbeat = heartbeat.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            Self::execute_job(queue, processor, &heartbeat, delivery).await;
                        });
                    }
                }
            }
        }
    }

    /// Process one delivery, then ack it or count the failed attempt.
    pub async fn execute_job(
        queue: Arc<dyn WorkQueue>,
        processor: Arc<TaskProcessor>,
        heartbeat: &Heartbeat,
        delivery: Delivery,
    ) {
        let job_id = delivery.task.job_id.clone();

        // Workers keep dying on this one; do not hand it to another
        if delivery.deliveries > queue.max_attempts() {
            let reason = format!(
                "Giving up after {} abandoned deliveries",
                delivery.deliveries - 1
            );
            if let Err(e) = Self::give_up(&queue, &processor, &delivery, &reason).await {
                error!("Failed to dead-letter job {}: {}", job_id, e);
            }
            return;
        }

        match Self::process_with_heartbeat(&queue, &processor, heartbeat, &delivery).await {
            Ok(outcome) => {
                match outcome {
                    TaskOutcome::Finished => metrics::record_job_completed(),
                    TaskOutcome::Failed => metrics::record_job_failed(),
                    TaskOutcome::Skipped => metrics::record_job_skipped(),
                }
                if let Err(e) = queue.ack(&delivery.message_id).await {
                    // Redelivery is harmless: the job is terminal now
                    error!("Failed to ack job {}: {}", job_id, e);
                }
            }
            Err(e) => {
                error!("Job {} failed to process: {}", job_id, e);
                if let Err(give_up) = Self::record_failed_attempt(&queue, &processor, &delivery, &e).await {
                    error!("Failed to record attempt for job {}: {}", job_id, give_up);
                }
            }
        }
    }

    /// Run the task while refreshing the delivery's idle time.
    async fn process_with_heartbeat(
        queue: &Arc<dyn WorkQueue>,
        processor: &TaskProcessor,
        heartbeat: &Heartbeat,
        delivery: &Delivery,
    ) -> WorkerResult<TaskOutcome> {
        let process = processor.process(&delivery.task);
        tokio::pin!(process);

        let mut ticker = tokio::time::interval(heartbeat.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                result = &mut process => return result,
                _ = ticker.tick() => {
                    if let Err(e) = queue.touch(&heartbeat.consumer, &delivery.message_id).await {
                        warn!("Heartbeat for job {} failed: {}", delivery.task.job_id, e);
                    }
                }
            }
        }
    }

    async fn record_failed_attempt(
        queue: &Arc<dyn WorkQueue>,
        processor: &TaskProcessor,
        delivery: &Delivery,
        cause: &WorkerError,
    ) -> WorkerResult<()> {
        if !cause.is_retryable() {
            let reason = format!("Not retryable: {}", cause);
            return Self::give_up(queue, processor, delivery, &reason).await;
        }

        let attempts = queue.record_attempt(delivery).await?;
        let max_attempts = queue.max_attempts();

        if attempts < max_attempts {
            info!(
                "Job {} will be retried (attempt {}/{})",
                delivery.task.job_id, attempts, max_attempts
            );
            return Ok(());
        }

        let reason = format!("Giving up after {} attempts: {}", attempts, cause);
        Self::give_up(queue, processor, delivery, &reason).await
    }

    /// Dead-letter the delivery and mark its job failed.
    async fn give_up(
        queue: &Arc<dyn WorkQueue>,
        processor: &TaskProcessor,
        delivery: &Delivery,
        reason: &str,
    ) -> WorkerResult<()> {
        warn!("Moving job {} to DLQ: {}", delivery.task.job_id, reason);
        queue.dead_letter(delivery, reason).await?;
        metrics::record_job_dead_lettered();
        processor.abandon(&delivery.task.job_id, reason).await;
        Ok(())
    }
}
