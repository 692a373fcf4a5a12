//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tcode_media::TranscoderConfig;
use tcode_storage::StorageConfig;
use uuid::Uuid;

/// Grace period added to the transcode timeout before a delivery counts as
/// abandoned.
const CLAIM_GRACE: Duration = Duration::from_secs(60);

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub concurrency: usize,
    /// Consumer name in the queue's consumer group
    pub consumer_name: String,
    /// How long one dequeue call waits for work
    pub block_timeout: Duration,
    /// How often to scan for abandoned deliveries
    pub claim_interval: Duration,
    /// Minimum idle time before a delivery can be claimed (crash recovery).
    /// Live workers refresh their deliveries well within this window.
    pub claim_min_idle: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Artifact store root shared with the API
    pub storage_root: PathBuf,
    /// Transcoder settings
    pub transcoder: TranscoderConfig,
    /// Prometheus listener address, if metrics are exported
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let transcoder = TranscoderConfig::default();
        Self {
            concurrency: 2,
            consumer_name: format!("worker-{}", Uuid::new_v4()),
            block_timeout: Duration::from_millis(5000),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: default_claim_min_idle(&transcoder),
            shutdown_timeout: Duration::from_secs(30),
            storage_root: StorageConfig::default().root,
            transcoder,
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let transcoder = TranscoderConfig::from_env();
        let claim_min_idle = env_parse::<u64>("WORKER_CLAIM_MIN_IDLE_SECS")
            .map(Duration::from_secs)
            .unwrap_or_else(|| default_claim_min_idle(&transcoder));

        Self {
            concurrency: env_parse("WORKER_CONCURRENCY")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(2),
            consumer_name: std::env::var("WORKER_NAME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| format!("worker-{}", Uuid::new_v4())),
            block_timeout: Duration::from_millis(env_parse("WORKER_BLOCK_MS").unwrap_or(5000)),
            claim_interval: Duration::from_secs(
                env_parse("WORKER_CLAIM_INTERVAL_SECS")
                    .filter(|n: &u64| *n > 0)
                    .unwrap_or(30),
            ),
            claim_min_idle,
            shutdown_timeout: Duration::from_secs(
                env_parse("WORKER_SHUTDOWN_TIMEOUT_SECS").unwrap_or(30),
            ),
            storage_root: StorageConfig::from_env().root,
            transcoder,
            metrics_addr: env_parse("WORKER_METRICS_ADDR"),
        }
    }
}

/// Without a transcode timeout the window stays at an hour; holders keep
/// their deliveries fresh, so only dead workers lose work.
fn default_claim_min_idle(transcoder: &TranscoderConfig) -> Duration {
    transcoder
        .timeout
        .unwrap_or(Duration::from_secs(3600))
        .saturating_add(CLAIM_GRACE)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
