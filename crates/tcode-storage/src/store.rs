//! Local filesystem artifact store.
//!
//! Layout under the root:
//!
//! ```text
//! inputs/<uuid>/<name>                 uploaded files, write-once
//! outputs/<scope>/transcoded_<name>    produced files, one scope per job
//! ```
//!
//! The root must be visible to both the API and the workers.

use std::path::{Path, PathBuf};

use tcode_models::ArtifactRef;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

const INPUTS_DIR: &str = "inputs";
const OUTPUTS_DIR: &str = "outputs";
const OUTPUT_PREFIX: &str = "transcoded_";
const STAGING_PREFIX: &str = ".staging-";

/// Byte budget for a stored name. Leaves room under the usual 255-byte
/// NAME_MAX for `.staging-<run>-transcoded_`.
const MAX_FILE_NAME_BYTES: usize = 220;

/// Longest suffix still treated as an extension when shortening a name.
const MAX_EXTENSION_BYTES: usize = 16;

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory shared by API and workers
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./videos"),
        }
    }
}

impl StorageConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            root: std::env::var("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| Self::default().root),
        }
    }
}

/// Reduce an uploaded file name to a safe single path segment.
///
/// Returns `None` when nothing usable remains.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return None;
    }

    Some(shorten_file_name(cleaned, MAX_FILE_NAME_BYTES))
}

/// Cut `name` to at most `max` bytes on a char boundary, shortening the stem
/// so the extension survives.
fn shorten_file_name(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= MAX_EXTENSION_BYTES => name.split_at(dot),
        _ => (name, ""),
    };

    let mut end = max.saturating_sub(ext.len()).min(stem.len());
    while !stem.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", stem[..end].trim_end(), ext)
}

/// Path-addressable, write-once artifact store.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory layout.
    pub async fn init(&self) -> StorageResult<()> {
        fs::create_dir_all(self.root.join(INPUTS_DIR)).await?;
        fs::create_dir_all(self.root.join(OUTPUTS_DIR)).await?;
        info!("Artifact store ready at {}", self.root.display());
        Ok(())
    }

    /// Filesystem path of an artifact.
    pub fn resolve(&self, artifact: &ArtifactRef) -> PathBuf {
        artifact
            .as_str()
            .split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    /// Store uploaded bytes under a fresh ID-namespaced key.
    ///
    /// Identical names never collide: every call gets its own directory.
    pub async fn put(&self, name: &str, bytes: &[u8]) -> StorageResult<ArtifactRef> {
        let name = sanitize_file_name(name).ok_or_else(|| StorageError::invalid_key(name))?;
        let artifact =
            ArtifactRef::from_segments([INPUTS_DIR, &Uuid::new_v4().to_string(), &name])?;
        let path = self.resolve(&artifact);
        let key = artifact.as_str().to_string();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::write_failed(&key, e))?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| StorageError::write_failed(&key, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| StorageError::write_failed(&key, e))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::write_failed(&key, e))?;

        debug!("Stored {} bytes at {}", bytes.len(), key);
        Ok(artifact)
    }

    /// Deterministic output key for `name` within `scope`.
    pub fn output_ref(&self, scope: &str, name: &str) -> StorageResult<ArtifactRef> {
        let name = sanitize_file_name(name).ok_or_else(|| StorageError::invalid_key(name))?;
        let file_name = format!("{}{}", OUTPUT_PREFIX, name);
        Ok(ArtifactRef::from_segments([OUTPUTS_DIR, scope, &file_name])?)
    }

    /// Create the output directory and pick a fresh staging path for one
    /// producer run.
    ///
    /// The staging file sits next to the final file and keeps its extension,
    /// so tools that pick a container from the extension behave the same.
    /// Each call gets its own path, so two runs of the same job never write
    /// into one file.
    pub async fn prepare_output(&self, artifact: &ArtifactRef) -> StorageResult<PathBuf> {
        let path = self.resolve(artifact);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::write_failed(artifact.as_str(), e))?;
        }

        let run = Uuid::new_v4().simple().to_string();
        Ok(path.with_file_name(format!(
            "{}{}-{}",
            STAGING_PREFIX,
            &run[..8],
            artifact.file_name()
        )))
    }

    /// Publish a staged output by atomic rename, replacing any earlier copy.
    pub async fn commit(&self, artifact: &ArtifactRef, staging: &Path) -> StorageResult<()> {
        if !is_file(staging).await {
            return Err(StorageError::not_found(staging.display().to_string()));
        }
        fs::rename(staging, self.resolve(artifact))
            .await
            .map_err(|e| StorageError::write_failed(artifact.as_str(), e))?;
        debug!("Committed {}", artifact);
        Ok(())
    }

    /// Remove a staged output left behind by a failed producer.
    pub async fn discard_staged(&self, staging: &Path) {
        if let Err(e) = fs::remove_file(staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", staging.display(), e);
            }
        }
    }

    /// Whether the artifact exists.
    pub async fn exists(&self, artifact: &ArtifactRef) -> bool {
        is_file(&self.resolve(artifact)).await
    }

    /// Size of the artifact in bytes.
    pub async fn len(&self, artifact: &ArtifactRef) -> StorageResult<u64> {
        match fs::metadata(self.resolve(artifact)).await {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Err(StorageError::not_found(artifact.as_str())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(artifact.as_str()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Open an artifact for streaming. Returns the file and its length.
    pub async fn open_for_read(&self, artifact: &ArtifactRef) -> StorageResult<(File, u64)> {
        let len = self.len(artifact).await?;
        let file = File::open(self.resolve(artifact)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::not_found(artifact.as_str())
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok((file, len))
    }

    /// Checks that the root accepts writes.
    pub async fn check_writable(&self) -> StorageResult<()> {
        let check_file = self.root.join(format!(".write-check-{}", Uuid::new_v4()));
        fs::write(&check_file, b"ok")
            .await
            .map_err(|e| StorageError::write_failed(check_file.display().to_string(), e))?;
        fs::remove_file(&check_file).await?;
        Ok(())
    }
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
