use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::app::error::{LocalBooksError, Result};
use crate::cache::{CacheStore, ExpirationPolicy, FileCache};
use crate::config::Config;
use crate::extract::{CssEngine, ExtractionEngine};
use crate::fetcher::{Fetcher, HttpFetcher};
use crate::retrieval::{BatchScheduler, Orchestrator, RetrievalSettings};
use crate::store::{SettingsStore, SqliteStore};

pub const SETTING_CACHE_ENABLED: &str = "cache_enabled";
pub const SETTING_CACHE_EXPIRATION: &str = "cache_expiration";
pub const SETTING_CACHE_DIRECTORY: &str = "cache_directory";

/// Runtime settings understood by [`AppContext::set_setting`].
pub const KNOWN_SETTINGS: [&str; 3] = [
    SETTING_CACHE_ENABLED,
    SETTING_CACHE_EXPIRATION,
    SETTING_CACHE_DIRECTORY,
];

pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub cache: Arc<FileCache>,
    pub orchestrator: Orchestrator,
    pub batch: BatchScheduler,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        let db_path = config.database_path()?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Arc::new(SqliteStore::new(&db_path)?);

        let cache_dir = match store.get_setting(SETTING_CACHE_DIRECTORY)? {
            Some(dir) => PathBuf::from(dir),
            None => config.cache_directory()?,
        };
        let cache = Arc::new(FileCache::open(cache_dir)?);
        let fetcher: Arc<dyn Fetcher + Send + Sync> =
            Arc::new(HttpFetcher::new(&config.fetch.settings())?);

        Ok(Self::with_components(config, store, cache, fetcher))
    }

    /// In-memory database and a cache under `cache_dir`, for tests.
    pub fn in_memory(cache_dir: &Path, fetcher: Arc<dyn Fetcher + Send + Sync>) -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        let cache = Arc::new(FileCache::open(cache_dir)?);
        Ok(Self::with_components(Config::default(), store, cache, fetcher))
    }

    pub fn with_components(
        config: Config,
        store: Arc<SqliteStore>,
        cache: Arc<FileCache>,
        fetcher: Arc<dyn Fetcher + Send + Sync>,
    ) -> Self {
        let engine: Arc<dyn ExtractionEngine> = Arc::new(CssEngine::new());
        let orchestrator = Orchestrator::new(store.clone(), cache.clone(), fetcher, engine);
        let batch = BatchScheduler::with_workers(
            orchestrator.clone(),
            config.batch.workers,
            config.batch.chapter_timeout(),
        )
        .with_request_delay(config.fetch.request_delay());

        Self {
            config,
            store,
            cache,
            orchestrator,
            batch,
        }
    }

    /// Cache settings for the next operation: stored settings win over the
    /// config file.
    pub fn retrieval_settings(&self) -> Result<RetrievalSettings> {
        let cache_enabled = match self.store.get_setting(SETTING_CACHE_ENABLED)? {
            Some(value) => parse_bool(&value)?,
            None => self.config.cache.enabled,
        };
        let expiration = match self.store.get_setting(SETTING_CACHE_EXPIRATION)? {
            Some(value) => ExpirationPolicy::new(Duration::from_secs(parse_secs(&value)?)),
            None => self.config.cache.expiration(),
        };

        Ok(RetrievalSettings {
            cache_enabled,
            expiration,
        })
    }

    /// Validate and store a runtime setting. Setting the cache directory
    /// also relocates the cache.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            SETTING_CACHE_ENABLED => {
                let enabled = parse_bool(value)?;
                self.store.set_setting(key, &enabled.to_string())
            }
            SETTING_CACHE_EXPIRATION => {
                let secs = parse_secs(value)?;
                self.store.set_setting(key, &secs.to_string())
            }
            SETTING_CACHE_DIRECTORY => self.set_cache_directory(Path::new(value)),
            other => Err(LocalBooksError::Validation(format!(
                "Unknown setting `{}` (expected one of: {})",
                other,
                KNOWN_SETTINGS.join(", ")
            ))),
        }
    }

    /// Persist the new directory first, then move the cache. A failed move
    /// restores the previous setting.
    pub fn set_cache_directory(&self, path: &Path) -> Result<()> {
        let previous = self.store.get_setting(SETTING_CACHE_DIRECTORY)?;
        self.store
            .set_setting(SETTING_CACHE_DIRECTORY, &path.to_string_lossy())?;

        if let Err(e) = self.cache.set_directory(path) {
            let restored = match &previous {
                Some(value) => self.store.set_setting(SETTING_CACHE_DIRECTORY, value),
                None => self.store.delete_setting(SETTING_CACHE_DIRECTORY).map(|_| ()),
            };
            if let Err(restore_err) = restored {
                warn!("Failed to restore cache directory setting: {}", restore_err);
            }
            return Err(e);
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(LocalBooksError::Validation(format!(
            "Expected true or false, got `{}`",
            other
        ))),
    }
}

fn parse_secs(value: &str) -> Result<u64> {
    value.trim().parse::<u64>().map_err(|_| {
        LocalBooksError::Validation(format!(
            "Expected a number of seconds, got `{}`",
            value
        ))
    })
}
