//! Configuration types shared across crates.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8199").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Public base URL used to build record links.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: false).
    #[serde(default)]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8199".to_string()
}

fn default_base_url() -> String {
    "http://localhost:8199".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            base_url: default_base_url(),
            metrics_enabled: false,
        }
    }
}

impl ServerConfig {
    /// Public URL of a record.
    pub fn record_url(&self, id: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), id)
    }
}

/// Record storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one file per record.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    /// Characters in a generated identifier. Never use less than 8.
    #[serde(default = "default_id_length")]
    pub id_length: usize,
    /// Characters in a generated mutation token.
    #[serde(default = "default_token_length")]
    pub token_length: usize,
    /// Optional `EXTENSION = MIME` table used to derive content types.
    #[serde(default = "default_mime_types")]
    pub mime_types: Option<PathBuf>,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("pastas")
}

fn default_id_length() -> usize {
    crate::DEFAULT_ID_LENGTH
}

fn default_token_length() -> usize {
    crate::MIN_TOKEN_LENGTH
}

fn default_mime_types() -> Option<PathBuf> {
    Some(PathBuf::from("mime.types"))
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            id_length: default_id_length(),
            token_length: default_token_length(),
            mime_types: default_mime_types(),
        }
    }
}

/// Ingestion limits and defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Maximum payload size in bytes.
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    /// Default time-to-live in seconds for new records (0 = never expire).
    #[serde(default)]
    pub default_expire_secs: u64,
    /// MIME type used when neither the client nor the filename supplies one.
    #[serde(default = "default_mime")]
    pub default_mime: String,
}

fn default_max_size() -> u64 {
    crate::DEFAULT_MAX_SIZE
}

fn default_mime() -> String {
    "application/octet-stream".to_string()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            default_expire_secs: 0,
            default_mime: default_mime(),
        }
    }
}

/// Expiration sweeper configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Seconds between sweep cycles (0 disables the sweeper).
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
    /// Clear the request throttle table on every cycle.
    #[serde(default = "default_clear_rate_limit")]
    pub clear_rate_limit: bool,
}

fn default_sweep_interval_secs() -> u64 {
    3600 // once per hour
}

fn default_clear_rate_limit() -> bool {
    true
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
            clear_rate_limit: default_clear_rate_limit(),
        }
    }
}

impl SweepConfig {
    /// Sweep interval, or `None` if the sweeper is disabled.
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

/// Per-client request throttle configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Minimum delay between two mutating requests of one client, in
    /// milliseconds (0 disables throttling).
    #[serde(default)]
    pub request_delay_ms: u64,
    /// Trusted proxy IP addresses/CIDR ranges.
    /// Only requests from these IPs will have X-Forwarded-For/X-Real-IP headers trusted.
    /// If empty, forwarded headers are never trusted (only direct connection IP is used).
    /// Use ["*"] to trust all proxies (NOT recommended for production).
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
}

impl RateLimitConfig {
    /// Minimum inter-request delay, or `None` if throttling is disabled.
    pub fn request_delay(&self) -> Option<Duration> {
        (self.request_delay_ms > 0).then(|| Duration::from_millis(self.request_delay_ms))
    }
}

/// Public listing configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PublicConfig {
    /// Number of records shown on the public page (0 disables the listing).
    #[serde(default)]
    pub max_entries: usize,
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Upload limits.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Expiration sweeper.
    #[serde(default)]
    pub sweep: SweepConfig,
    /// Request throttling.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Public listing.
    #[serde(default)]
    pub public: PublicConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Disables the sweeper, the MIME table file and
    /// throttling, and caps uploads at 1 MiB.
    pub fn for_testing() -> Self {
        Self {
            storage: StorageConfig {
                mime_types: None,
                ..Default::default()
            },
            upload: UploadConfig {
                max_size: 1024 * 1024,
                ..Default::default()
            },
            sweep: SweepConfig {
                interval_secs: 0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate the configuration.
    /// Returns warnings for configs that are insecure but allowed,
    /// and an error for configs that cannot work.
    pub fn validate(&self) -> crate::Result<Vec<String>> {
        let mut warnings = Vec::new();

        if self.storage.id_length == 0 {
            return Err(Error::Config("storage.id_length cannot be 0".to_string()));
        }
        if self.storage.token_length < crate::MIN_TOKEN_LENGTH {
            return Err(Error::Config(format!(
                "storage.token_length={} is below the minimum of {}",
                self.storage.token_length,
                crate::MIN_TOKEN_LENGTH
            )));
        }
        if self.upload.max_size == 0 {
            return Err(Error::Config("upload.max_size cannot be 0".to_string()));
        }

        if self.storage.id_length < crate::DEFAULT_ID_LENGTH {
            warnings.push(format!(
                "storage.id_length={} makes identifiers guessable. \
                 Recommended minimum: {} characters.",
                self.storage.id_length,
                crate::DEFAULT_ID_LENGTH
            ));
        }

        // Warn about trusting all proxies
        if self.rate_limit.trusted_proxies.len() == 1 && self.rate_limit.trusted_proxies[0] == "*"
        {
            warnings.push(
                "rate_limit.trusted_proxies=['*'] trusts ALL forwarded headers. \
                 This allows clients to spoof their IP address and bypass the throttle. \
                 Only use this setting in development or behind a trusted reverse proxy."
                    .to_string(),
            );
        }

        Ok(warnings)
    }
}
