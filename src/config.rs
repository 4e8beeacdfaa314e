//! Configuration loading and types for bluestore.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  It is loaded once and handed to the client
//! explicitly; nothing in the crate reads settings from global state.

use serde::Deserialize;
use std::path::Path;

use crate::client::DEFAULT_BLOB_DOMAIN;
use crate::credentials::MAX_BLOCK_SIZE;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Storage account, container and block settings.
    #[serde(default)]
    pub azure: AzureConfig,

    /// Upload behaviour.
    #[serde(default)]
    pub upload: UploadConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Azure Blob Storage account configuration.
///
/// Field names match `bluestore.example.yaml`.
#[derive(Clone, Deserialize)]
pub struct AzureConfig {
    /// Storage account name.
    #[serde(default)]
    pub account: String,

    /// Base64 storage account access key.
    #[serde(default, alias = "access_key")]
    pub key: String,

    /// Target container name.
    #[serde(default)]
    pub container: String,

    /// Bytes per staged block.
    #[serde(default = "default_block_size")]
    pub block_size: i64,

    /// Blob service domain appended to the account name.
    #[serde(default = "default_blob_domain")]
    pub blob_domain: String,

    /// Custom domain used for public blob URLs instead of the account host.
    #[serde(default)]
    pub cname: String,

    /// Default `max-age` in seconds for uploads without an explicit
    /// Cache-Control (0 = none).
    #[serde(default)]
    pub cache_max_age: u64,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            key: String::new(),
            container: String::new(),
            block_size: default_block_size(),
            blob_domain: default_blob_domain(),
            cname: String::new(),
            cache_max_age: 0,
        }
    }
}

// The key never appears in logs.
impl std::fmt::Debug for AzureConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureConfig")
            .field("account", &self.account)
            .field("key", &"<redacted>")
            .field("container", &self.container)
            .field("block_size", &self.block_size)
            .field("blob_domain", &self.blob_domain)
            .field("cname", &self.cname)
            .field("cache_max_age", &self.cache_max_age)
            .finish()
    }
}

/// Upload settings.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Maximum number of Put Block requests in flight (1 = sequential).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ObservabilityConfig {
    /// Install the Prometheus recorder and print metrics after each command.
    #[serde(default)]
    pub metrics: bool,
}

// -- Defaults ----------------------------------------------------------------

fn default_block_size() -> i64 {
    MAX_BLOCK_SIZE as i64
}

fn default_blob_domain() -> String {
    DEFAULT_BLOB_DOMAIN.to_string()
}

fn default_concurrency() -> usize {
    1
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse configuration from YAML text.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.upload.concurrency == 0 {
        anyhow::bail!("upload.concurrency must be at least 1");
    }
    Ok(config)
}
