//! Runtime configuration for the attestation config API.
//!
//! Layering: built-in defaults, then the optional file named by
//! `ATTCFG_CONFIG_FILE`, then `ATTCFG__*` environment variables
//! (`__` separates nested keys, e.g. `ATTCFG__INVALIDATION__STRATEGY`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use attcfg_resilience::RetryPolicy;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_API_PREFIX: &str = "constellation/v1/attestation";
pub const DEFAULT_CACHE_WINDOW_SIZE: usize = 15;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("loading configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("environment variable {0} must be set")]
    MissingEnv(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationStrategy {
    /// Invalidate every key as soon as it is written.
    Eager,
    /// Collect keys and invalidate them in one request on flush.
    #[default]
    BatchOnFlush,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvalidationConfig {
    pub strategy: InvalidationStrategy,
    /// `0` means fire-and-forget.
    pub wait_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl InvalidationConfig {
    pub fn wait_timeout(&self) -> Duration { Duration::from_secs(self.wait_timeout_secs) }
    pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_interval_ms) }
}

impl Default for InvalidationConfig {
    fn default() -> Self { Self { strategy: InvalidationStrategy::BatchOnFlush, wait_timeout_secs: 600, poll_interval_ms: 5_000 } }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            ..RetryPolicy::default()
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self { Self { max_retries: 3, base_delay_ms: 200, max_delay_ms: 5_000 } }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub region: String,
    pub bucket: String,
    pub distribution_id: String,
    pub api_prefix: String,
    /// Public base URL the verifying fetcher reads from.
    pub cdn_url: String,
    pub dry_run: bool,
    pub cache_window_size: usize,
    pub invalidation: InvalidationConfig,
    /// Directory of the local sled bucket.
    pub storage_path: PathBuf,
    pub op_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            region: "eu-west-1".into(),
            bucket: "cdn-constellation-backend".into(),
            distribution_id: "E1H77EZTHC3NE4".into(),
            api_prefix: DEFAULT_API_PREFIX.into(),
            cdn_url: "https://cdn.confidential.cloud".into(),
            dry_run: false,
            cache_window_size: DEFAULT_CACHE_WINDOW_SIZE,
            invalidation: InvalidationConfig::default(),
            storage_path: PathBuf::from("attcfg-bucket"),
            op_timeout_secs: 60,
            retry: RetryConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Loads defaults, `ATTCFG_CONFIG_FILE` if set, then `ATTCFG__*` overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var("ATTCFG_CONFIG_FILE").ok().map(PathBuf::from);
        Self::load_with(file.as_deref())
    }

    pub fn load_with(file: Option<&Path>) -> Result<Self, ConfigError> {
        let d = ApiConfig::default();
        let mut builder = config::Config::builder()
            .set_default("region", d.region)?
            .set_default("bucket", d.bucket)?
            .set_default("distribution_id", d.distribution_id)?
            .set_default("api_prefix", d.api_prefix)?
            .set_default("cdn_url", d.cdn_url)?
            .set_default("dry_run", d.dry_run)?
            .set_default("cache_window_size", d.cache_window_size as u64)?
            .set_default("invalidation.strategy", "batch_on_flush")?
            .set_default("invalidation.wait_timeout_secs", d.invalidation.wait_timeout_secs)?
            .set_default("invalidation.poll_interval_ms", d.invalidation.poll_interval_ms)?
            .set_default("storage_path", d.storage_path.to_string_lossy().into_owned())?
            .set_default("op_timeout_secs", d.op_timeout_secs)?
            .set_default("retry.max_retries", d.retry.max_retries as u64)?
            .set_default("retry.base_delay_ms", d.retry.base_delay_ms)?
            .set_default("retry.max_delay_ms", d.retry.max_delay_ms)?;
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("ATTCFG").separator("__").try_parsing(true));
        let cfg: ApiConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_window_size == 0 { return Err(ConfigError::Invalid("cache_window_size must be at least 1".into())); }
        if self.bucket.trim().is_empty() { return Err(ConfigError::Invalid("bucket must not be empty".into())); }
        if self.api_prefix.trim_matches('/').is_empty() { return Err(ConfigError::Invalid("api_prefix must not be empty".into())); }
        if self.op_timeout_secs == 0 { return Err(ConfigError::Invalid("op_timeout_secs must be positive".into())); }
        Ok(())
    }

    pub fn op_timeout(&self) -> Duration { Duration::from_secs(self.op_timeout_secs) }
}

/// Signing material taken from the environment. Never logged.
#[derive(Clone)]
pub struct SigningConfig {
    pub private_key_pem: String,
    pub passphrase: String,
}

impl std::fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str("SigningConfig { .. }") }
}

impl SigningConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let private_key_pem = std::env::var("COSIGN_PRIVATE_KEY").map_err(|_| ConfigError::MissingEnv("COSIGN_PRIVATE_KEY"))?;
        let passphrase = std::env::var("COSIGN_PASSWORD").map_err(|_| ConfigError::MissingEnv("COSIGN_PASSWORD"))?;
        if private_key_pem.trim().is_empty() { return Err(ConfigError::MissingEnv("COSIGN_PRIVATE_KEY")); }
        Ok(Self { private_key_pem, passphrase })
    }
}

/// SPKI PEM of the key published objects are verified against, if configured.
pub fn public_key_from_env() -> Option<String> {
    std::env::var("ATTCFG_PUBLIC_KEY").ok().filter(|v| !v.trim().is_empty())
}
