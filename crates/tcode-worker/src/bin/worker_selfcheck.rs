//! Startup self-check: verifies storage, FFmpeg and Redis before the worker runs.

use tcode_media::check_ffmpeg;
use tcode_queue::{RedisConfig, RedisPool};
use tcode_storage::ArtifactStore;
use tcode_worker::{WorkerConfig, WorkerError, WorkerResult};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("worker-selfcheck: {}", e);
        std::process::exit(1);
    }
    println!("worker-selfcheck: ok");
}

async fn run() -> WorkerResult<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with storage_root={}",
        config.storage_root.display()
    );

    let store = ArtifactStore::new(config.storage_root.clone());
    store.init().await?;
    store.check_writable().await?;

    let ffmpeg = check_ffmpeg(&config.transcoder.program)?;
    println!("worker-selfcheck: ffmpeg at {}", ffmpeg.display());

    let mut redis = RedisConfig::from_env();
    redis.connect_retries = 0;
    RedisPool::connect(&redis)
        .await
        .map_err(|e| WorkerError::queue_failed(e.to_string()))?;

    Ok(())
}
