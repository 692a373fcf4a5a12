//! API configuration.

use std::path::PathBuf;

use tcode_media::TranscoderConfig;
use tcode_storage::StorageConfig;
use tracing::warn;

const MIB: u64 = 1024 * 1024;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Inline requests strictly below this many bytes run synchronously
    pub inline_max_bytes: u64,
    /// Max request body size
    pub max_upload_bytes: usize,
    /// Base URL used to build download links; derived from request headers
    /// when unset
    pub public_base_url: Option<String>,
    /// Artifact store root shared with the workers
    pub storage_root: PathBuf,
    /// Transcoder settings for the inline path
    pub transcoder: TranscoderConfig,
    /// Serve Prometheus metrics at `/metrics`
    pub metrics_enabled: bool,
    /// Environment (development/production)
    pub environment: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            inline_max_bytes: 10 * MIB,
            max_upload_bytes: 1024 * MIB as usize,
            public_base_url: None,
            storage_root: StorageConfig::default().root,
            transcoder: TranscoderConfig::default(),
            metrics_enabled: true,
            environment: "development".to_string(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8000),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|_| vec!["*".to_string()]),
            inline_max_bytes: std::env::var("INLINE_MAX_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10 * MIB),
            max_upload_bytes: std::env::var("MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024 * MIB as usize),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .ok()
                .and_then(|s| validate_base_url(&s)),
            storage_root: StorageConfig::from_env().root,
            transcoder: TranscoderConfig::from_env(),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Accept only absolute http(s) URLs; returns the URL without a trailing slash.
fn validate_base_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match url::Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {
            Some(raw.trim_end_matches('/').to_string())
        }
        _ => {
            warn!("Ignoring invalid PUBLIC_BASE_URL: {}", raw);
            None
        }
    }
}
