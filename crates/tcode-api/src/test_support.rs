//! Transcoder doubles for router and service tests.

use async_trait::async_trait;
use tcode_media::{MediaError, MediaResult, Transcoder};
use tcode_models::{ArtifactRef, EncodeParams};
use tcode_storage::ArtifactStore;

/// Publishes the input bytes unchanged as the output.
pub struct CopyTranscoder {
    store: ArtifactStore,
}

impl CopyTranscoder {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Transcoder for CopyTranscoder {
    async fn transcode(
        &self,
        input: &ArtifactRef,
        output: &ArtifactRef,
        _params: &EncodeParams,
    ) -> MediaResult<ArtifactRef> {
        let staging = self.store.prepare_output(output).await?;
        tokio::fs::copy(self.store.resolve(input), &staging).await?;
        self.store.commit(output, &staging).await?;
        Ok(output.clone())
    }
}

/// Fails every call the way FFmpeg does on a bad codec.
pub struct FailingTranscoder;

#[async_trait]
impl Transcoder for FailingTranscoder {
    async fn transcode(
        &self,
        _input: &ArtifactRef,
        _output: &ArtifactRef,
        _params: &EncodeParams,
    ) -> MediaResult<ArtifactRef> {
        Err(MediaError::ffmpeg_failed(
            "FFmpeg exited with exit status: 1",
            Some("Unknown encoder 'bogus'".to_string()),
            Some(1),
        ))
    }
}

pub fn failing_transcoder() -> FailingTranscoder {
    FailingTranscoder
}
