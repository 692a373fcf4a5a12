//! Transcoding worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tcode_media::{check_ffmpeg, FfmpegTranscoder};
use tcode_queue::{QueueConfig, RedisConfig, RedisJobQueue, RedisJobRegistry, RedisPool};
use tcode_storage::ArtifactStore;
use tcode_worker::{JobExecutor, TaskProcessor, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for rediss://)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting tcode-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        match tcode_worker::metrics::init_metrics(addr) {
            Ok(()) => info!("Serving metrics on {}", addr),
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    }

    match check_ffmpeg(&config.transcoder.program) {
        Ok(path) => info!("Using FFmpeg at {}", path.display()),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }

    let store = ArtifactStore::new(config.storage_root.clone());
    if let Err(e) = store.init().await {
        error!("Failed to initialize artifact store: {}", e);
        std::process::exit(1);
    }

    let pool = match RedisPool::connect(&RedisConfig::from_env()).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to connect to Redis: {}", e);
            std::process::exit(1);
        }
    };

    let queue = Arc::new(RedisJobQueue::new(pool.clone(), QueueConfig::from_env()));
    let registry = Arc::new(RedisJobRegistry::new(pool));
    let transcoder = Arc::new(FfmpegTranscoder::new(store, config.transcoder.clone()));

    let executor = Arc::new(JobExecutor::new(
        config,
        queue,
        TaskProcessor::new(registry, transcoder),
    ));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,redis=warn"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}
