//! Configuration management
//!
//! Loaded from a TOML file; every section and key falls back to its default.
//!
//! ```toml
//! [storage]
//! url = "http://siem-storage:9200"
//! dialect = "7.17"
//! timezone = "UTC"
//!
//! [query]
//! bucket_size = 33000
//!
//! [indices]
//! boundary_margin_days = 1
//! ```

use crate::error::{Error, Result};
use anyhow::Context;
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub indices: IndexConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StorageConfig {
    /// Base URL of the event store
    #[serde(default = "default_url")]
    pub url: String,

    /// Pinned dialect ("1.7", "7", "7.17" or a dialect name).
    /// Detected from `/_nodes` when absent.
    #[serde(default)]
    pub dialect: Option<String>,

    /// Timezone events are stored in: "UTC" or a fixed offset like "+03:00"
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Timeout factor for slow report queries
    #[serde(default = "default_timeout_multiplier")]
    pub timeout_multiplier: u32,
}

fn default_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_connection_timeout() -> u64 {
    60
}

fn default_timeout_multiplier() -> u32 {
    6
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            dialect: None,
            timezone: default_timezone(),
            connection_timeout_secs: default_connection_timeout(),
            timeout_multiplier: default_timeout_multiplier(),
        }
    }
}

impl StorageConfig {
    /// Parse the configured timezone into a fixed UTC offset
    pub fn timezone_offset(&self) -> Result<FixedOffset> {
        parse_timezone(&self.timezone)
    }

    /// Base per-request timeout
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Timeout for known-slow queries (base timeout times the multiplier)
    pub fn request_timeout(&self) -> Duration {
        self.connection_timeout() * self.timeout_multiplier.max(1)
    }
}

/// Parse "UTC"/"Z" or a `±HH:MM` offset
pub fn parse_timezone(tz: &str) -> Result<FixedOffset> {
    let tz = tz.trim();
    if tz.eq_ignore_ascii_case("utc") || tz.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0)
            .ok_or_else(|| Error::Configuration("invalid UTC offset".to_string()));
    }
    tz.parse::<FixedOffset>()
        .map_err(|e| Error::Configuration(format!("invalid timezone '{}': {}", tz, e)))
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct QueryConfig {
    /// Event timestamp field used for the range clause
    #[serde(default = "default_time_field")]
    pub time_field: String,

    /// Maximum buckets per terms aggregation level
    #[serde(default = "default_bucket_size")]
    pub bucket_size: usize,

    /// Events fetched per request when streaming raw events
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long the store keeps an event scroll open between batches
    #[serde(default = "default_scroll_keep_alive")]
    pub scroll_keep_alive: String,
}

fn default_time_field() -> String {
    "time".to_string()
}

fn default_bucket_size() -> usize {
    33_000
}

fn default_batch_size() -> usize {
    10_000
}

fn default_scroll_keep_alive() -> String {
    "1m".to_string()
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            time_field: default_time_field(),
            bucket_size: default_bucket_size(),
            batch_size: default_batch_size(),
            scroll_keep_alive: default_scroll_keep_alive(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct IndexConfig {
    #[serde(default = "default_legacy_prefix")]
    pub legacy_prefix: String,

    #[serde(default = "default_modern_prefix")]
    pub modern_prefix: String,

    /// Datastream whose backing indices hold events on rollover stores
    #[serde(default = "default_datastream")]
    pub datastream: String,

    /// Extra trailing days queried past the range's last calendar day
    #[serde(default)]
    pub boundary_margin_days: u32,
}

fn default_legacy_prefix() -> String {
    "ptsiem_events".to_string()
}

fn default_modern_prefix() -> String {
    "siem_events".to_string()
}

fn default_datastream() -> String {
    "siem_events".to_string()
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            legacy_prefix: default_legacy_prefix(),
            modern_prefix: default_modern_prefix(),
            datastream: default_datastream(),
            boundary_margin_days: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level filter string; `RUST_LOG` overrides it
    #[serde(default = "default_level")]
    pub level: String,

    /// Log output format: "pretty" or "json"
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Config::default()),
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Reject values that would only fail later, mid-query
    pub fn validate(&self) -> Result<()> {
        self.storage.timezone_offset()?;
        if let Some(dialect) = &self.storage.dialect {
            dialect.parse::<crate::Dialect>()?;
        }
        if self.query.bucket_size == 0 || self.query.batch_size == 0 {
            return Err(Error::Configuration(
                "bucket_size and batch_size must be positive".to_string(),
            ));
        }
        if self.query.scroll_keep_alive.trim().is_empty() {
            return Err(Error::Configuration(
                "scroll_keep_alive must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
