//! Configuration System
//!
//! Loads settings from a TOML file with environment variable overrides and
//! turns them into an [`EngineConfig`].

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::engine::EngineConfig;
use crate::query::Calendar;
use crate::storage::{JournalSync, Resolution, StorageConfig as StoreConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Series store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Journal file; unset keeps everything in memory
    #[serde(default)]
    pub journal: Option<String>,

    #[serde(default = "default_journal_sync")]
    pub journal_sync: String,

    #[serde(default = "default_auto_create")]
    pub auto_create_series: bool,
}

fn default_journal_sync() -> String {
    "batched".to_string()
}

fn default_auto_create() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            journal: None,
            journal_sync: default_journal_sync(),
            auto_create_series: default_auto_create(),
        }
    }
}

/// Time handling for queries
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    /// Calendar offset east of UTC used for hour/day/... conditions
    #[serde(default)]
    pub utc_offset_minutes: i32,

    #[serde(default = "default_resolution")]
    pub resolution: String,
}

fn default_resolution() -> String {
    "seconds".to_string()
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            resolution: default_resolution(),
        }
    }
}

/// Adapter session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_max_sessions() -> usize {
    1
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
        }
    }
}

/// Tag cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Register for adapter change notifications
    #[serde(default = "default_notifications")]
    pub notifications: bool,
}

fn default_notifications() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            notifications: default_notifications(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    /// Parse configuration text
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("edgeseries").join("config.toml")),
            Some(PathBuf::from("/etc/edgeseries/config.toml")),
            Some(PathBuf::from("./edgeseries.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `EDGESERIES_*` overrides read through `lookup`
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(journal) = lookup("EDGESERIES_JOURNAL") {
            self.storage.journal = Some(journal).filter(|j| !j.is_empty());
        }

        if let Some(offset) = lookup("EDGESERIES_UTC_OFFSET_MINUTES") {
            match offset.parse() {
                Ok(m) => self.query.utc_offset_minutes = m,
                Err(_) => tracing::warn!("Ignoring EDGESERIES_UTC_OFFSET_MINUTES={}", offset),
            }
        }

        if let Some(max) = lookup("EDGESERIES_MAX_SESSIONS") {
            match max.parse() {
                Ok(n) => self.session.max_sessions = n,
                Err(_) => tracing::warn!("Ignoring EDGESERIES_MAX_SESSIONS={}", max),
            }
        }

        if let Some(level) = lookup("EDGESERIES_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("EDGESERIES_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Validate and convert into the engine's runtime configuration
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let journal_sync = JournalSync::from_str(&self.storage.journal_sync).ok_or_else(|| {
            ConfigError::Invalid(format!("unknown journal_sync '{}'", self.storage.journal_sync))
        })?;
        let resolution = Resolution::from_str(&self.query.resolution).ok_or_else(|| {
            ConfigError::Invalid(format!("unknown resolution '{}'", self.query.resolution))
        })?;
        Calendar::with_offset_minutes(self.query.utc_offset_minutes, resolution)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.session.max_sessions == 0 {
            return Err(ConfigError::Invalid(
                "max_sessions must be at least 1".to_string(),
            ));
        }

        Ok(EngineConfig {
            storage: StoreConfig {
                journal: self.storage.journal.as_ref().map(PathBuf::from),
                journal_sync,
            },
            utc_offset_minutes: self.query.utc_offset_minutes,
            resolution,
            max_sessions: self.session.max_sessions,
            notifications: self.cache.notifications,
            auto_create_series: self.storage.auto_create_series,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Edgeseries Configuration
#
# Environment variables override these settings:
# - EDGESERIES_JOURNAL
# - EDGESERIES_UTC_OFFSET_MINUTES
# - EDGESERIES_MAX_SESSIONS
# - EDGESERIES_LOG_LEVEL
# - EDGESERIES_LOG_FORMAT

[storage]
# Journal file for persistence; leave unset to keep data in memory only
# journal = "/var/lib/edgeseries/edgeseries.journal"

# Journal sync: every_write, batched or none
journal_sync = "batched"

# Create a variable's series the first time it is sampled
auto_create_series = true

[query]
# Calendar offset east of UTC in minutes (hour/day/... conditions)
utc_offset_minutes = 0

# Timestamp resolution: seconds or milliseconds
resolution = "seconds"

[session]
# Adapter sessions open at once; further queries wait
max_sessions = 1

[cache]
# Register for adapter change notifications; false rebuilds tag entries per query
notifications = true

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
