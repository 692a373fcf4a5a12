//! Application state.

use std::sync::Arc;

use tcode_media::{check_ffmpeg, FfmpegTranscoder, Transcoder};
use tcode_queue::{
    JobRegistry, QueueConfig, RedisConfig, RedisJobQueue, RedisJobRegistry, RedisPool, WorkQueue,
};
use tcode_storage::ArtifactStore;
use tracing::{info, warn};

use crate::config::ApiConfig;
use crate::services::{RetrievalService, SubmissionRouter};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<ArtifactStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub submission: SubmissionRouter,
    pub retrieval: RetrievalService,
}

impl AppState {
    /// Create application state backed by Redis and the local artifact store.
    ///
    /// Fails if the store can't be created or Redis stays unreachable after
    /// the configured connect retries.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store = ArtifactStore::new(config.storage_root.clone());
        store.init().await?;

        // Inline requests fail individually without FFmpeg; queued ones don't need it here
        match check_ffmpeg(&config.transcoder.program) {
            Ok(path) => info!("Inline transcodes use FFmpeg at {}", path.display()),
            Err(e) => warn!("{}; inline transcodes will fail", e),
        }

        let pool = RedisPool::connect(&RedisConfig::from_env()).await?;
        let queue = RedisJobQueue::new(pool.clone(), QueueConfig::from_env());
        queue.init().await?;
        let registry = RedisJobRegistry::new(pool);

        let transcoder = FfmpegTranscoder::new(store.clone(), config.transcoder.clone());

        Ok(Self::from_parts(
            config,
            Arc::new(store),
            Arc::new(registry),
            Arc::new(queue),
            Arc::new(transcoder),
        ))
    }

    /// Assemble state from already constructed backends.
    pub fn from_parts(
        config: ApiConfig,
        store: Arc<ArtifactStore>,
        registry: Arc<dyn JobRegistry>,
        queue: Arc<dyn WorkQueue>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let submission = SubmissionRouter::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&queue),
            transcoder,
            config.inline_max_bytes,
        );
        let retrieval = RetrievalService::new(Arc::clone(&store), registry);

        Self {
            config,
            store,
            queue,
            submission,
            retrieval,
        }
    }
}
