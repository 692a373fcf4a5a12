//! References into the artifact store.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A stored byte sequence addressed by a relative, `/`-separated key.
///
/// The key is relative to the store root, e.g. `inputs/<uuid>/clip.mp4`.
/// Construction validates the key so a reference can never escape the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactRef(String);

/// Rejected artifact key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid artifact reference: {0:?}")]
pub struct InvalidArtifactRef(pub String);

impl ArtifactRef {
    /// Build a reference from a key, validating it.
    pub fn new(key: impl Into<String>) -> Result<Self, InvalidArtifactRef> {
        let key = key.into();
        if is_valid_key(&key) {
            Ok(Self(key))
        } else {
            Err(InvalidArtifactRef(key))
        }
    }

    /// Join validated segments into a reference.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, InvalidArtifactRef>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let key = segments
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect::<Vec<_>>()
            .join("/");
        Self::new(key)
    }

    /// Get the key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment (the stored file name).
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

fn is_valid_key(key: &str) -> bool {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') || key.contains('\0') {
        return false;
    }
    key.split('/')
        .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ArtifactRef {
    type Error = InvalidArtifactRef;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ArtifactRef> for String {
    fn from(value: ArtifactRef) -> Self {
        value.0
    }
}
