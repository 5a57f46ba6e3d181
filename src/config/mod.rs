//! Configuration management for localbooks.
//!
//! Configuration is read from `~/.config/localbooks/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.
//! Values stored with `localbooks settings set` take precedence over the
//! `[cache]` section at run time.

use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::LocalBooksError;
use crate::cache::ExpirationPolicy;
use crate::fetcher::{FetchSettings, RetryPolicy};

const APP_DIR: &str = "localbooks";

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database holding rules and settings
    pub database_path: Option<PathBuf>,
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub expiration_secs: u64,
    pub directory: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expiration_secs: 24 * 60 * 60,
            directory: None,
        }
    }
}

impl CacheConfig {
    pub fn expiration(&self) -> ExpirationPolicy {
        ExpirationPolicy::new(Duration::from_secs(self.expiration_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per attempt
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// First retry delay; doubles on every further retry
    pub backoff_ms: u64,
    /// Rotated per request; empty means the built-in browser list
    pub user_agents: Vec<String>,
    /// Pause between a batch worker's requests, jittered by ±50%
    pub request_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_retries: 3,
            backoff_ms: 500,
            user_agents: Vec::new(),
            request_delay_ms: 500,
        }
    }
}

impl FetchConfig {
    pub fn settings(&self) -> FetchSettings {
        let defaults = FetchSettings::default();
        FetchSettings {
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                backoff: Duration::from_millis(self.backoff_ms),
            },
            user_agents: if self.user_agents.is_empty() {
                defaults.user_agents
            } else {
                self.user_agents.clone()
            },
            connect_timeout: defaults.connect_timeout,
        }
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub workers: usize,
    pub chapter_timeout_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            chapter_timeout_secs: 60,
        }
    }
}

impl BatchConfig {
    pub fn chapter_timeout(&self) -> Duration {
        Duration::from_secs(self.chapter_timeout_secs.max(1))
    }
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

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path: `~/.config/localbooks/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join(APP_DIR).join("config.toml"))
    }

    /// Configured database path, else `<data dir>/localbooks/localbooks.db`.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("localbooks.db")),
        }
    }

    /// Configured cache directory, else `<data dir>/localbooks/cache`.
    pub fn cache_directory(&self) -> Result<PathBuf, ConfigError> {
        match &self.cache.directory {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("cache")),
        }
    }

    fn data_dir() -> Result<PathBuf, ConfigError> {
        let data_dir = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
        Ok(data_dir.join(APP_DIR))
    }

    /// Create a default config file with comments.
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

    /// Generate the default config file content with comments.
    fn default_config_content() -> &'static str {
        r##"# localbooks configuration
#
# Paths default to the platform data directory
# (e.g. ~/.local/share/localbooks on Linux).

# SQLite database holding rules and settings
# database_path = "/home/me/.local/share/localbooks/localbooks.db"

[cache]
# Serve stored novels and chapters before going to the network.
# Overridden by `localbooks settings set cache_enabled <true|false>`.
enabled = true

# Seconds before a cached entry is refreshed. Expired entries are still
# served when the refresh fails.
expiration_secs = 86400

# Where cached novels and chapters are stored
# directory = "/home/me/.local/share/localbooks/cache"

[fetch]
# Timeout per request attempt, in seconds
timeout_secs = 15

# Retries for timeouts, connection errors and 5xx responses.
# 4xx responses are never retried.
max_retries = 3

# Delay before the first retry in milliseconds, doubled on each retry
backoff_ms = 500

# Browser identities rotated across requests. Leave unset to use a
# built-in list of common desktop browsers.
# user_agents = ["Mozilla/5.0 ...", "Mozilla/5.0 ..."]

# Pause between consecutive chapter requests of one download worker, in
# milliseconds. Each pause is randomized between half and one and a half
# times this value. 0 disables it.
request_delay_ms = 500

[batch]
# Chapters downloaded concurrently by `localbooks download`
workers = 4

# Give up on a single chapter after this many seconds
chapter_timeout_secs = 60
"##
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Could not determine data directory")]
    NoDataDir,

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
}

impl From<ConfigError> for LocalBooksError {
    fn from(err: ConfigError) -> Self {
        LocalBooksError::Config(err.to_string())
    }
}
