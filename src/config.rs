//! Runtime configuration for asset-fetch-cache.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Cache budgets, upstream fetch settings and server knobs all live here.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fetch::coordinator::CancelPolicy;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "asset-fetch-cache", about = "Deduplicating in-memory asset cache server")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cache.count_limit must be at least 1")]
    ZeroCountLimit,

    #[error("fetch.max_body_bytes must be at least 1")]
    ZeroBodyLimit,

    #[error("fetch.timeout_secs must be at least 1")]
    ZeroTimeout,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,

    /// In-memory cache budgets.
    pub cache: CacheConfig,

    /// Upstream fetch settings.
    pub fetch: FetchConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Cache budget configuration. Both limits are fixed once the cache is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of resident entries.
    pub count_limit: usize,

    /// Maximum summed cost of resident entries (bytes for the HTTP source).
    pub total_cost_limit: u64,

    /// What happens to a fetch once every waiter has cancelled.
    pub cancel_policy: CancelPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            count_limit: 1024,
            total_cost_limit: 256 * 1024 * 1024, // 256 MB
            cancel_policy: CancelPolicy::ContinueFetch,
        }
    }
}

/// Upstream fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Largest response body accepted from upstream.
    pub max_body_bytes: u64,

    /// User-Agent header sent upstream.
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_body_bytes: 32 * 1024 * 1024, // 32 MB
            user_agent: concat!("asset-fetch-cache/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str::<Config>(&data)?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject budgets the cache cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.count_limit == 0 {
            return Err(ConfigError::ZeroCountLimit);
        }
        if self.fetch.max_body_bytes == 0 {
            return Err(ConfigError::ZeroBodyLimit);
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}
