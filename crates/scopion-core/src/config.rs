//! Configuration for the Scopion dashboard client
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//! - Validation

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Config file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete dashboard configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// API connection settings
    pub client: ClientSettings,

    /// Live feed settings
    pub feed: FeedSettings,

    /// Error notification settings
    pub notifications: NotificationSettings,

    /// Logging settings
    pub logging: LogSettings,
}

/// API connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Base URL of the Scopion server
    pub server_url: String,

    /// Timeout for request/response calls in milliseconds
    pub request_timeout_ms: u64,

    /// Connection timeout in milliseconds (also bounds opening the live stream)
    pub connect_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            request_timeout_ms: 10000,
            connect_timeout_ms: 5000,
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Live feed settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    /// Events requested by the snapshot fetch
    pub snapshot_limit: usize,

    /// Start with the live channel closed
    pub start_paused: bool,

    /// Re-fetch the snapshot this often in milliseconds (0 = never)
    pub refresh_interval_ms: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            snapshot_limit: crate::feed::FEED_CAPACITY,
            start_paused: false,
            refresh_interval_ms: 0,
        }
    }
}

impl FeedSettings {
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_ms > 0).then(|| Duration::from_millis(self.refresh_interval_ms))
    }
}

/// Error notification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Head of the feed rescanned for errors on each change
    pub recent_window: usize,

    /// Seconds a trace stays silenced after notifying
    pub cooldown_secs: u64,

    /// Maximum notifications kept
    pub capacity: usize,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            recent_window: crate::notifications::RECENT_WINDOW,
            cooldown_secs: crate::notifications::DEDUP_COOLDOWN.as_secs(),
            capacity: crate::notifications::NOTIFICATION_CAPACITY,
        }
    }
}

impl NotificationSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// Configuration loader
pub struct ConfigLoader {
    /// Path to config file (if specified via CLI)
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set the config path from CLI argument
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with the following precedence:
    /// 1. CLI --config flag
    /// 2. SCOPION_CONFIG environment variable
    /// 3. ~/.config/scopion/config.toml
    /// 4. /etc/scopion/config.toml
    /// 5. Default values
    pub fn load(&self) -> ConfigResult<DashboardConfig> {
        let mut config = match self.find_config_file() {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)?
            }
            None => {
                debug!("No config file found, using defaults");
                DashboardConfig::default()
            }
        };

        Self::apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        Self::validate(&config)?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!("CLI config path does not exist: {}", path.display());
        }

        if let Ok(env_path) = std::env::var("SCOPION_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            warn!("SCOPION_CONFIG path does not exist: {}", env_path);
        }

        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Some(path);
            }
        }

        #[cfg(unix)]
        {
            let path = PathBuf::from("/etc/scopion/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> ConfigResult<DashboardConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: DashboardConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply overrides read through `var` (the process environment in `load`)
    fn apply_env_overrides<F>(config: &mut DashboardConfig, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = var("SCOPION_SERVER_URL") {
            config.client.server_url = val;
        }
        if let Some(val) = var("SCOPION_LOG_LEVEL") {
            config.logging.level = val;
        }
        if let Some(val) = var("SCOPION_SNAPSHOT_LIMIT") {
            match val.parse() {
                Ok(limit) => config.feed.snapshot_limit = limit,
                Err(_) => warn!("Ignoring invalid SCOPION_SNAPSHOT_LIMIT: {}", val),
            }
        }
        if let Some(val) = var("SCOPION_START_PAUSED") {
            config.feed.start_paused = val.parse().unwrap_or(config.feed.start_paused);
        }
    }

    /// Validate configuration
    pub fn validate(config: &DashboardConfig) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                config.logging.level, valid_levels
            )));
        }

        let url = url::Url::parse(&config.client.server_url).map_err(|e| {
            ConfigError::ValidationError(format!(
                "Invalid server URL {}: {}",
                config.client.server_url, e
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "Server URL must be http or https, got {}",
                url.scheme()
            )));
        }

        if config.feed.snapshot_limit == 0 {
            return Err(ConfigError::ValidationError(
                "Snapshot limit cannot be 0".to_string(),
            ));
        }

        if config.notifications.recent_window == 0 || config.notifications.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "Notification window and capacity cannot be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to a file
    pub fn save(config: &DashboardConfig, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(config).map_err(|e| {
            ConfigError::ValidationError(format!("Failed to serialize config: {}", e))
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Write a default configuration to `path`
    ///
    /// An existing file is only replaced when `overwrite` is set.
    pub fn init(path: &Path, overwrite: bool) -> ConfigResult<DashboardConfig> {
        if path.exists() && !overwrite {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }

        let config = DashboardConfig::default();
        Self::save(&config, path)?;
        Ok(config)
    }

    /// Get the default config file path for the current platform
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("scopion").join("config.toml"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
