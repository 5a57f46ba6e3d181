//! Local storage for extracted novels and chapters.
//!
//! Records are keyed by [`NovelKey`] and [`ChapterKey`] and carry a
//! `fetched_at` timestamp. Expiry is decided by the caller through
//! [`ExpirationPolicy`]: the store itself never drops a record because it is
//! old, so an expired entry stays available as a fallback.

mod file_cache;

pub use file_cache::FileCache;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::app::Result;
use crate::domain::{ChapterKey, ChapterRecord, NovelKey, NovelRecord};

/// Subdirectories created under every cache directory.
pub const CACHE_SUBDIRS: [&str; 2] = ["novels", "chapters"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheInfo {
    pub entry_count: u64,
    pub total_bytes: u64,
    pub directory: PathBuf,
}

pub trait CacheStore: Send + Sync {
    fn get_novel(&self, key: &NovelKey) -> Result<Option<NovelRecord>>;
    fn put_novel(&self, key: &NovelKey, record: &NovelRecord) -> Result<()>;
    fn get_chapter(&self, key: &ChapterKey) -> Result<Option<ChapterRecord>>;
    fn put_chapter(&self, key: &ChapterKey, record: &ChapterRecord) -> Result<()>;
    fn clear_all(&self) -> Result<()>;
    fn set_directory(&self, path: &Path) -> Result<()>;
    fn info(&self) -> Result<CacheInfo>;
}

/// Anything stamped with the time it was fetched.
pub trait Timestamped {
    fn fetched_at(&self) -> DateTime<Utc>;
}

impl Timestamped for NovelRecord {
    fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

impl Timestamped for ChapterRecord {
    fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

/// Freshness window for cached records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    pub max_age: Duration,
}

impl ExpirationPolicy {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    pub fn is_expired<T: Timestamped>(&self, record: &T) -> bool {
        self.is_expired_at(record, Utc::now())
    }

    pub fn is_expired_at<T: Timestamped>(&self, record: &T, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(record.fetched_at());
        match age.to_std() {
            Ok(age) => age > self.max_age,
            // fetched_at in the future (clock skew)
            Err(_) => false,
        }
    }
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(24 * 60 * 60))
    }
}
