//! Configuration management for the relay.
//!
//! Configuration is read from `~/.config/orgrelay/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::daemon::DaemonConfig;
use crate::fetcher::http_fetcher::{DEFAULT_MAX_REDIRECTS, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT};
use crate::notify::bus::DEFAULT_CHANNEL_CAPACITY;
use crate::notify::dispatcher::DEFAULT_QUEUE_CAPACITY;

pub const DEFAULT_WORKERS: usize = 10;

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database path; defaults to the platform data directory.
    pub database: Option<PathBuf>,
    pub sync: SyncConfig,
    pub retention: RetentionConfig,
    pub notifications: NotificationConfig,
    pub groups: GroupConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub interval: String,
    pub workers: usize,
    pub fetch_timeout_secs: u64,
    pub max_redirects: usize,
    pub user_agent: String,
    /// Register FOLLOW targets that are not yet known feeds.
    pub discover_follows: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: "1m".into(),
            workers: DEFAULT_WORKERS,
            fetch_timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            user_agent: DEFAULT_USER_AGENT.into(),
            discover_follows: true,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Result<Duration, ConfigError> {
        parse_duration("sync.interval", &self.interval)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub stale_feed_days: i64,
    pub cleanup_interval: String,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            stale_feed_days: 3,
            cleanup_interval: "3d".into(),
        }
    }
}

impl RetentionConfig {
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::days(self.stale_feed_days.max(0))
    }

    pub fn cleanup_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration("retention.cleanup_interval", &self.cleanup_interval)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Per-feed broadcast buffer; slower subscribers skip what they missed.
    pub channel_capacity: usize,
    pub queue_capacity: usize,
    pub keepalive_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            keepalive_secs: 30,
        }
    }
}

impl NotificationConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Group slugs this relay records; posts naming other groups keep no group.
    pub enabled: Vec<String>,
}

impl GroupConfig {
    pub fn is_enabled(&self, slug: &str) -> bool {
        self.enabled.iter().any(|g| g == slug)
    }
}

fn parse_duration(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    DaemonConfig::parse_interval(raw)
        .map(Duration::from_secs)
        .map_err(|message| ConfigError::Invalid {
            field: field.to_string(),
            message,
        })
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.sync.interval()?;
        config.retention.cleanup_interval()?;
        Ok(config)
    }

    /// Get the default config file path: `~/.config/orgrelay/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("orgrelay").join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    fn default_config_content() -> String {
        r##"# orgrelay configuration
#
# Intervals accept "30s", "5m", "6h", "3d" or plain seconds.

# SQLite database location (default: <data dir>/orgrelay/relay.db)
# database = "/var/lib/orgrelay/relay.db"

[sync]
# How often every registered feed is fetched
interval = "1m"

# Feeds fetched concurrently
workers = 10

# Per-fetch timeout; a timeout defers the feed to the next cycle
fetch_timeout_secs = 5

max_redirects = 10

# Register feeds found in FOLLOW lines
discover_follows = true

[retention]
# Feeds whose last successful fetch is older than this are removed.
# Feeds that were never fetched successfully are kept.
stale_feed_days = 3
cleanup_interval = "3d"

[notifications]
channel_capacity = 64
queue_capacity = 1024
keepalive_secs = 30

[groups]
# Slugs of groups hosted by this relay, e.g. ["emacs", "org-social"]
enabled = []
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: String, message: String },
}
