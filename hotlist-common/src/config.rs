//! Configuration management for the hotlist services.
//!
//! All hotlist binaries share one configuration file at `~/.hotlist/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (see below)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `TUSHARE_TOKEN` → tushare.token
//! - `HOTLIST_DB_PATH` → store.database_path
//! - `HOTLIST_FRESHNESS_SECS` → store.freshness_secs
//! - `HOTLIST_LOG_LEVEL` → observability.log_level
//! - `HOTLIST_LOG_FORMAT` → observability.log_format

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".hotlist"),
        |dirs| dirs.home_dir().join(".hotlist"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Tushare Pro vendor access
    #[serde(default)]
    pub tushare: TushareConfig,

    /// Snapshot store behaviour
    #[serde(default)]
    pub store: StoreConfig,

    /// Trading calendar fallback
    #[serde(default)]
    pub calendar: CalendarConfig,

    /// Ranking normalizer tables
    #[serde(default)]
    pub normalizer: NormalizerConfig,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("TUSHARE_TOKEN") {
            if !token.trim().is_empty() {
                self.tushare.token = Some(token.trim().to_string());
            }
        }
        if let Ok(path) = std::env::var("HOTLIST_DB_PATH") {
            self.store.database_path = Some(PathBuf::from(path));
        }
        if let Ok(secs) = std::env::var("HOTLIST_FRESHNESS_SECS") {
            if let Ok(s) = secs.parse() {
                self.store.freshness_secs = s;
            }
        }
        if let Ok(level) = std::env::var("HOTLIST_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("HOTLIST_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Resolved database path: explicit setting, else `~/.hotlist/snapshots.db`.
    pub fn database_path(&self) -> PathBuf {
        self.store
            .database_path
            .clone()
            .unwrap_or_else(|| config_dir().join("snapshots.db"))
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Observability (logging) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Tushare Pro API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TushareConfig {
    /// API token (prefer the `TUSHARE_TOKEN` environment variable)
    #[serde(default)]
    pub token: Option<String>,

    /// API endpoint
    #[serde(default = "default_tushare_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Client-side request budget per minute
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Retries on recoverable vendor errors
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for TushareConfig {
    fn default() -> Self {
        Self {
            token: None,
            base_url: default_tushare_url(),
            timeout_secs: default_timeout_secs(),
            requests_per_minute: default_requests_per_minute(),
            max_retries: default_max_retries(),
        }
    }
}

/// Snapshot store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite file; `None` means `~/.hotlist/snapshots.db`
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Keep snapshots in memory only
    #[serde(default)]
    pub in_memory: bool,

    /// Age after which a current-day snapshot is refetched
    #[serde(default = "default_freshness_secs")]
    pub freshness_secs: u64,

    /// Oldest trade date a query may address, counted back from today
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Longest calendar span a range query may cover
    #[serde(default = "default_max_range_days")]
    pub max_range_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            in_memory: false,
            freshness_secs: default_freshness_secs(),
            retention_days: default_retention_days(),
            max_range_days: default_max_range_days(),
        }
    }
}

/// Trading calendar configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Use the weekday calendar below instead of the vendor's `trade_cal`
    #[serde(default)]
    pub offline: bool,

    /// Exchange holidays that fall on weekdays (offline calendar only)
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
}

/// Ranking normalizer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Sector aliases: normalized platform name → canonical sector name
    #[serde(default)]
    pub sector_aliases: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
fn default_tushare_url() -> String {
    "http://api.tushare.pro".into()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_requests_per_minute() -> u32 {
    200
}
fn default_max_retries() -> u32 {
    2
}
fn default_freshness_secs() -> u64 {
    300
}
fn default_retention_days() -> u32 {
    365 * 3
}
fn default_max_range_days() -> u32 {
    120
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.observability.log_level, "info");
        assert_eq!(config.tushare.base_url, "http://api.tushare.pro");
        assert_eq!(config.store.freshness_secs, 300);
        assert!(config.tushare.token.is_none());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{
            "tushare": { "token": "abc" },
            "store": { "freshness_secs": 60 },
            "calendar": { "holidays": ["2024-10-01"] },
            "normalizer": { "sector_aliases": { "AI": "人工智能" } }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.tushare.token.as_deref(), Some("abc"));
        assert_eq!(config.tushare.max_retries, 2);
        assert_eq!(config.store.freshness_secs, 60);
        assert_eq!(config.store.retention_days, 365 * 3);
        assert_eq!(
            config.calendar.holidays,
            vec![NaiveDate::from_ymd_opt(2024, 10, 1).unwrap()]
        );
        assert_eq!(config.normalizer.sector_aliases["AI"], "人工智能");
    }

    #[test]
    fn test_observability_aliases() {
        let json = r#"{ "observability": { "level": "debug", "format": "json" } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "store": { "database_path": "/tmp/x.db" } }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.database_path(), PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn test_load_from_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
