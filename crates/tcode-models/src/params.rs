//! Encode parameters.
//!
//! The values are opaque to the service: they are passed straight through to
//! the transcoding tool, which owns any semantic validation. The only check
//! performed here is presence.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CODEC: &str = "libx264";
pub const DEFAULT_BITRATE: &str = "1000k";
pub const DEFAULT_RESOLUTION: &str = "1280x720";

/// Missing or empty encode parameter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamsError {
    #[error("Missing required parameter: {0}")]
    Missing(&'static str),
}

/// Target codec, bitrate and resolution for a transcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EncodeParams {
    /// Codec name, e.g. `libx264`
    pub codec: String,
    /// Target bitrate, e.g. `1000k`
    pub bitrate: String,
    /// Target resolution as `WxH`
    pub resolution: String,
}

impl EncodeParams {
    /// Create params, trimming whitespace and rejecting empty values.
    pub fn new(
        codec: impl Into<String>,
        bitrate: impl Into<String>,
        resolution: impl Into<String>,
    ) -> Result<Self, ParamsError> {
        Ok(Self {
            codec: required("codec", codec.into())?,
            bitrate: required("bitrate", bitrate.into())?,
            resolution: required("resolution", resolution.into())?,
        })
    }
}

impl Default for EncodeParams {
    fn default() -> Self {
        Self {
            codec: DEFAULT_CODEC.to_string(),
            bitrate: DEFAULT_BITRATE.to_string(),
            resolution: DEFAULT_RESOLUTION.to_string(),
        }
    }
}

fn required(field: &'static str, value: String) -> Result<String, ParamsError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ParamsError::Missing(field))
    } else {
        Ok(trimmed.to_string())
    }
}
