//! Transcode execution against the artifact store.
//!
//! One [`Transcoder`] instance is shared by the inline request path and the
//! queue workers, so both produce byte-identical artifacts for the same input
//! and parameters.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::histogram;
use tcode_models::{ArtifactRef, EncodeParams};
use tcode_storage::ArtifactStore;
use tracing::{info, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Histogram of transcode wall time, labelled by outcome.
pub const TRANSCODE_DURATION_SECONDS: &str = "tcode_transcode_duration_seconds";

/// Default per-transcode timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Transcoder configuration.
#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    /// FFmpeg binary (name on PATH or absolute path)
    pub program: String,
    /// Kill a transcode after this long; `None` waits forever
    pub timeout: Option<Duration>,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        }
    }
}

impl TranscoderConfig {
    /// Create config from environment variables.
    ///
    /// `TRANSCODE_TIMEOUT_SECS=0` disables the timeout.
    pub fn from_env() -> Self {
        let timeout_secs = std::env::var("TRANSCODE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Self {
            program: std::env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()),
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        }
    }
}

/// Converts one stored input into one stored output.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Transcode `input` into `output` with the given parameters.
    ///
    /// On success the output artifact exists in full. On failure nothing is
    /// published at `output`.
    async fn transcode(
        &self,
        input: &ArtifactRef,
        output: &ArtifactRef,
        params: &EncodeParams,
    ) -> MediaResult<ArtifactRef>;
}

/// [`Transcoder`] backed by the FFmpeg CLI.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    store: ArtifactStore,
    runner: FfmpegRunner,
}

impl FfmpegTranscoder {
    pub fn new(store: ArtifactStore, config: TranscoderConfig) -> Self {
        let mut runner = FfmpegRunner::new().with_program(config.program);
        if let Some(timeout) = config.timeout {
            runner = runner.with_timeout(timeout);
        }
        Self { store, runner }
    }

    /// Encode into a staging file private to this run, then publish it.
    async fn run_staged(
        &self,
        input: &ArtifactRef,
        output: &ArtifactRef,
        params: &EncodeParams,
    ) -> MediaResult<()> {
        if !self.store.exists(input).await {
            return Err(MediaError::InputNotFound(input.to_string()));
        }

        let staging = self.store.prepare_output(output).await?;
        let mut result = self.encode(input, &staging, params).await;
        if result.is_ok() {
            result = self.store.commit(output, &staging).await.map_err(MediaError::from);
        }

        if result.is_err() {
            self.store.discard_staged(&staging).await;
        }
        result
    }

    async fn encode(
        &self,
        input: &ArtifactRef,
        staging: &Path,
        params: &EncodeParams,
    ) -> MediaResult<()> {
        let cmd = FfmpegCommand::new(self.store.resolve(input), staging)
            .video_codec(&params.codec)
            .video_bitrate(&params.bitrate)
            .frame_size(&params.resolution);

        self.runner.run(&cmd).await?;

        if !tokio::fs::try_exists(staging).await.unwrap_or(false) {
            return Err(MediaError::MissingOutput(staging.to_path_buf()));
        }
        Ok(())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input: &ArtifactRef,
        output: &ArtifactRef,
        params: &EncodeParams,
    ) -> MediaResult<ArtifactRef> {
        let start = Instant::now();
        info!(
            "Transcoding {} -> {} ({} @ {}, {})",
            input, output, params.codec, params.bitrate, params.resolution
        );

        let result = self.run_staged(input, output, params).await;
        let elapsed = start.elapsed().as_secs_f64();

        match result {
            Ok(()) => {
                histogram!(TRANSCODE_DURATION_SECONDS, "outcome" => "success").record(elapsed);
                info!("Transcoded {} in {:.2}s", output, elapsed);
                Ok(output.clone())
            }
            Err(e) => {
                histogram!(TRANSCODE_DURATION_SECONDS, "outcome" => "failure").record(elapsed);
                warn!("Transcode of {} failed after {:.2}s: {}", input, elapsed, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn transcoder(store: &ArtifactStore, program: &str) -> FfmpegTranscoder {
        FfmpegTranscoder::new(
            store.clone(),
            TranscoderConfig {
                program: program.to_string(),
                timeout: Some(Duration::from_secs(10)),
            },
        )
    }

    fn no_staged_files(store: &ArtifactStore, output: &ArtifactRef) -> bool {
        let path = store.resolve(output);
        match std::fs::read_dir(path.parent().unwrap()) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
                .all(|name| !name.starts_with(".staging-")),
            Err(_) => true,
        }
    }

    #[cfg(unix)]
    fn script(dir: &std::path::Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-ffmpeg.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_transcode_commits_output() {
        let store_dir = TempDir::new().unwrap();
        let bin_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(store_dir.path());
        store.init().await.unwrap();

        // Args: -y -v error -i <input> ... <output>
        let program = script(bin_dir.path(), "for last; do :; done\ncp \"$5\" \"$last\"");
        let input = store.put("clip.mp4", b"fake video").await.unwrap();
        let output = store.output_ref("job-00000001", "clip.mp4").unwrap();

        let produced = transcoder(&store, &program)
            .transcode(&input, &output, &EncodeParams::default())
            .await
            .unwrap();

        assert_eq!(produced, output);
        assert_eq!(
            tokio::fs::read(store.resolve(&output)).await.unwrap(),
            b"fake video"
        );
        assert!(no_staged_files(&store, &output));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_transcode_publishes_nothing() {
        let store_dir = TempDir::new().unwrap();
        let bin_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(store_dir.path());
        store.init().await.unwrap();

        let program = script(
            bin_dir.path(),
            "for last; do :; done\necho partial > \"$last\"\necho 'Unknown encoder' >&2\nexit 1",
        );
        let input = store.put("clip.mp4", b"fake video").await.unwrap();
        let output = store.output_ref("job-00000002", "clip.mp4").unwrap();

        let err = transcoder(&store, &program)
            .transcode(&input, &output, &EncodeParams::default())
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::FfmpegFailed { .. }));
        assert!(err.detail().contains("Unknown encoder"));
        assert!(!store.exists(&output).await);
        assert!(no_staged_files(&store, &output));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_without_output_is_an_error() {
        let store_dir = TempDir::new().unwrap();
        let bin_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(store_dir.path());
        store.init().await.unwrap();

        let program = script(bin_dir.path(), "exit 0");
        let input = store.put("clip.mp4", b"fake video").await.unwrap();
        let output = store.output_ref("job-00000003", "clip.mp4").unwrap();

        let err = transcoder(&store, &program)
            .transcode(&input, &output, &EncodeParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::MissingOutput(_)));
        assert!(!store.exists(&output).await);
    }

    #[tokio::test]
    async fn test_missing_input() {
        let store_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(store_dir.path());
        store.init().await.unwrap();

        let input = ArtifactRef::new("inputs/nope/clip.mp4").unwrap();
        let output = store.output_ref("job-00000004", "clip.mp4").unwrap();
        let err = transcoder(&store, "ffmpeg")
            .transcode(&input, &output, &EncodeParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InputNotFound(_)));
    }
}
