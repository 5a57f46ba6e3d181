use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::NovelKey;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChapterKey {
    pub novel: NovelKey,
    pub chapter_id: String,
}

impl ChapterKey {
    pub fn new(novel: NovelKey, chapter_id: impl Into<String>) -> Self {
        Self {
            novel,
            chapter_id: chapter_id.into(),
        }
    }

    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.chapter_id.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A cached chapter body. Always written whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub chapter_id: String,
    pub title: String,
    pub chapter_url: String,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

impl ChapterRecord {
    /// Body split into paragraphs.
    pub fn paragraphs(&self) -> impl Iterator<Item = &str> {
        self.body.split("\n\n").filter(|p| !p.trim().is_empty())
    }
}
