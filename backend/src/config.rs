//! Configuration for the receipt tracker backend.

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,
    pub oidc: OidcConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OidcConfig {
    /// Issuer URL; JWKS is discovered from its `.well-known/openid-configuration`
    pub issuer: String,
    /// Expected `aud` claim. Audience is not checked when unset.
    #[serde(default)]
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database URL (`sqlite:` prefix optional)
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

/// Blob storage for uploaded receipt files.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding uploaded file contents.
    #[serde(default = "default_storage_dir")]
    pub dir: String,
    /// Externally reachable base URL used to build upload and retrieval URLs.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Lifetime of an issued upload URL.
    #[serde(default = "default_upload_url_ttl")]
    pub upload_url_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            public_url: default_public_url(),
            max_upload_bytes: default_max_upload_bytes(),
            upload_url_ttl_secs: default_upload_url_ttl(),
        }
    }
}

/// Which extractor performs receipt field extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionProvider {
    /// Returns fixed sample data after a delay.
    #[default]
    Simulated,
    /// Posts the document to an external extraction service.
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub provider: ExtractionProvider,
    /// Extraction service URL (required for the `http` provider).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Bearer token sent to the extraction service.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Upper bound for a single extraction call.
    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: u64,
    /// Maximum number of workflows running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Capacity of the in-memory trigger queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Artificial latency of the simulated extractor.
    #[serde(default = "default_simulated_delay")]
    pub simulated_delay_ms: u64,
    /// How often unfinished jobs are swept back into the queue.
    #[serde(default = "default_recovery_interval")]
    pub recovery_interval_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: ExtractionProvider::default(),
            endpoint: None,
            api_key: None,
            timeout_secs: default_extraction_timeout(),
            max_concurrent: default_max_concurrent(),
            queue_capacity: default_queue_capacity(),
            simulated_delay_ms: default_simulated_delay(),
            recovery_interval_secs: default_recovery_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per minute allowed per authenticated user.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins, comma-separated, or `*`.
    #[serde(default = "default_cors_origins")]
    pub origins: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: default_cors_origins(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_database_url() -> String {
    "sqlite:./data/receipts.db".to_string()
}
fn default_storage_dir() -> String {
    "./data/files".to_string()
}
fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_upload_url_ttl() -> u64 {
    3600
}
fn default_extraction_timeout() -> u64 {
    120
}
fn default_max_concurrent() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    256
}
fn default_simulated_delay() -> u64 {
    2000
}
fn default_recovery_interval() -> u64 {
    60
}
fn default_requests_per_minute() -> u32 {
    120
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_cors_origins() -> String {
    "*".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (RECEIPTS__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .set_default("host", default_host())?
            .set_default("port", default_port() as i64)?
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("RECEIPTS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Origins for the CORS layer; `None` means any origin.
    pub fn cors_origins(&self) -> Option<Vec<String>> {
        let origins = self.cors.origins.trim();
        if origins == "*" {
            return None;
        }
        Some(
            origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
        )
    }
}
