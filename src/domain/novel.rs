use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identifies a novel: the rule that reads it plus its page URL on the source site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NovelKey {
    pub rule_id: i64,
    pub novel_url: String,
}

impl NovelKey {
    pub fn new(rule_id: i64, novel_url: impl Into<String>) -> Self {
        Self {
            rule_id,
            novel_url: novel_url.into(),
        }
    }

    /// Stable hex digest used to name on-disk cache entries.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.rule_id.to_le_bytes());
        hasher.update(self.novel_url.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Display for NovelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (rule {})", self.novel_url, self.rule_id)
    }
}

/// One entry of a novel's table of contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterEntry {
    pub id: String,
    pub index: usize,
    pub title: String,
    pub chapter_url: String,
}

impl ChapterEntry {
    pub fn new(novel_url: &str, index: usize, title: String, chapter_url: String) -> Self {
        Self {
            id: Self::generate_id(novel_url, &chapter_url),
            index,
            title,
            chapter_url,
        }
    }

    /// Deterministic chapter id from the novel and chapter URLs.
    pub fn generate_id(novel_url: &str, chapter_url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(novel_url.as_bytes());
        hasher.update(chapter_url.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Novel metadata and chapter list as extracted from the detail page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NovelRecord {
    pub key: NovelKey,
    pub title: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub cover: Option<String>,
    pub chapters: Vec<ChapterEntry>,
    pub fetched_at: DateTime<Utc>,
}

impl NovelRecord {
    pub fn chapter(&self, chapter_id: &str) -> Option<&ChapterEntry> {
        self.chapters.iter().find(|c| c.id == chapter_id)
    }
}

/// A hit from a rule's search page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub rule_id: i64,
    pub source: String,
    pub title: String,
    pub novel_url: String,
}
