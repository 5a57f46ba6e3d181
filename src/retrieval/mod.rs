//! Cache-first retrieval of novels, chapter lists and chapter bodies.
//!
//! Every read follows the same path: serve a fresh cache entry if there is
//! one, otherwise fetch and extract, write the result through to the cache
//! and return it. When a refresh fails and an expired entry exists, the
//! expired entry is served and marked [`Freshness::Stale`].

pub mod batch;

pub use batch::{BatchHandle, BatchProgress, BatchReport, BatchScheduler, ChapterFailure};

use std::fmt::Display;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::{LocalBooksError, Result};
use crate::cache::{CacheStore, ExpirationPolicy, Timestamped};
use crate::domain::{
    ChapterEntry, ChapterKey, ChapterRecord, NovelKey, NovelRecord, Rule, SearchResult,
};
use crate::extract::{
    clean_chapter_text, html_to_text, single_line, ExtractionEngine, ExtractionError, FieldMap, FieldSpec,
    LIST_TITLE, LIST_URL,
};
use crate::fetcher::Fetcher;
use crate::store::RuleStore;

/// Cache behaviour for one call, read from settings by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalSettings {
    /// When false the cache is neither read nor written.
    pub cache_enabled: bool,
    pub expiration: ExpirationPolicy,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            expiration: ExpirationPolicy::default(),
        }
    }
}

/// Where a retrieved value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Freshness {
    /// Fresh cache entry, no network call
    Cached,
    /// Fetched and extracted just now
    Fetched,
    /// Expired cache entry served because the refresh failed
    Stale { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Retrieved<T> {
    pub value: T,
    pub freshness: Freshness,
}

impl<T> Retrieved<T> {
    pub fn cached(value: T) -> Self {
        Self {
            value,
            freshness: Freshness::Cached,
        }
    }

    pub fn fetched(value: T) -> Self {
        Self {
            value,
            freshness: Freshness::Fetched,
        }
    }

    pub fn stale(value: T, reason: impl Into<String>) -> Self {
        Self {
            value,
            freshness: Freshness::Stale {
                reason: reason.into(),
            },
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.freshness, Freshness::Stale { .. })
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Retrieved<U> {
        Retrieved {
            value: f(self.value),
            freshness: self.freshness,
        }
    }
}

enum Lookup<T> {
    Fresh(T),
    Miss { stale: Option<T> },
}

/// Composes rule store, cache, fetcher and extraction engine.
///
/// Cheap to clone; batch workers each hold a copy.
#[derive(Clone)]
pub struct Orchestrator {
    rules: Arc<dyn RuleStore + Send + Sync>,
    cache: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher + Send + Sync>,
    engine: Arc<dyn ExtractionEngine>,
}

impl Orchestrator {
    pub fn new(
        rules: Arc<dyn RuleStore + Send + Sync>,
        cache: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher + Send + Sync>,
        engine: Arc<dyn ExtractionEngine>,
    ) -> Self {
        Self {
            rules,
            cache,
            fetcher,
            engine,
        }
    }

    /// Snapshot of a rule; later edits do not affect an operation holding it.
    pub fn rule(&self, rule_id: i64) -> Result<Rule> {
        self.rules.get_rule(rule_id)
    }

    /// Run a rule's search page for `keyword`. Results are never cached.
    pub async fn search(&self, rule_id: i64, keyword: &str) -> Result<Vec<SearchResult>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(LocalBooksError::Validation(
                "Search keyword must not be empty".into(),
            ));
        }

        let rule = self.rule(rule_id)?;
        let selector = rule
            .search_result_rule
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ExtractionError::MissingRule {
                field: "search_result_rule".into(),
            })?;
        let url = rule.search_page_url(keyword)?;
        info!(rule_id, %url, keyword, "Searching");

        let document = self.fetcher.fetch(&url).await?;
        let entries = match self.engine.extract_list(selector, &document) {
            Ok(entries) => entries,
            Err(ExtractionError::NoMatch { .. }) => {
                debug!(rule_id, keyword, "Search matched nothing");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        Ok(entries
            .into_iter()
            .filter_map(|entry| list_entry(&entry))
            .map(|(title, novel_url)| SearchResult {
                rule_id: rule.id,
                source: rule.name.clone(),
                title,
                novel_url,
            })
            .collect())
    }

    pub async fn novel_detail(
        &self,
        settings: RetrievalSettings,
        rule_id: i64,
        novel_url: &str,
        force_network: bool,
    ) -> Result<Retrieved<NovelRecord>> {
        let rule = self.rule(rule_id)?;
        let key = NovelKey::new(rule.id, novel_url);
        self.novel_with_rule(settings, &rule, &key, force_network)
            .await
    }

    /// The novel's table of contents. Shares the novel detail cache entry.
    pub async fn chapter_list(
        &self,
        settings: RetrievalSettings,
        rule_id: i64,
        novel_url: &str,
        force_network: bool,
    ) -> Result<Retrieved<Vec<ChapterEntry>>> {
        let novel = self
            .novel_detail(settings, rule_id, novel_url, force_network)
            .await?;
        Ok(novel.map(|record| record.chapters))
    }

    pub async fn chapter_content(
        &self,
        settings: RetrievalSettings,
        rule_id: i64,
        novel_url: &str,
        chapter_id: &str,
        force_network: bool,
    ) -> Result<Retrieved<ChapterRecord>> {
        let rule = self.rule(rule_id)?;
        let novel_key = NovelKey::new(rule.id, novel_url);
        let key = ChapterKey::new(novel_key.clone(), chapter_id);

        let stale = match self.lookup(settings, force_network, &key.chapter_id, || {
            self.cache.get_chapter(&key)
        })? {
            Lookup::Fresh(record) => return Ok(Retrieved::cached(record)),
            Lookup::Miss { stale } => stale,
        };

        let (title, chapter_url) = match &stale {
            Some(record) => (record.title.clone(), record.chapter_url.clone()),
            None => {
                let entry = self
                    .locate_chapter(settings, &rule, &novel_key, chapter_id)
                    .await?;
                (entry.title, entry.chapter_url)
            }
        };

        self.load_chapter(settings, &rule, &key, &title, &chapter_url, stale)
            .await
    }

    /// Chapter read path for an entry already known from the chapter list.
    pub(crate) async fn chapter_for_entry(
        &self,
        settings: RetrievalSettings,
        rule: &Rule,
        novel_key: &NovelKey,
        entry: &ChapterEntry,
    ) -> Result<Retrieved<ChapterRecord>> {
        let key = ChapterKey::new(novel_key.clone(), entry.id.clone());
        let stale = match self.lookup(settings, false, &entry.id, || self.cache.get_chapter(&key))? {
            Lookup::Fresh(record) => return Ok(Retrieved::cached(record)),
            Lookup::Miss { stale } => stale,
        };
        self.load_chapter(settings, rule, &key, &entry.title, &entry.chapter_url, stale)
            .await
    }

    pub(crate) async fn novel_with_rule(
        &self,
        settings: RetrievalSettings,
        rule: &Rule,
        key: &NovelKey,
        force_network: bool,
    ) -> Result<Retrieved<NovelRecord>> {
        let stale = match self.lookup(settings, force_network, key, || self.cache.get_novel(key))? {
            Lookup::Fresh(record) => return Ok(Retrieved::cached(record)),
            Lookup::Miss { stale } => stale,
        };

        let refreshed = self.fetch_novel(rule, key).await;
        self.settle(settings, key, refreshed, stale, |record| {
            self.cache.put_novel(key, record)
        })
    }

    /// Find a chapter in the novel's list, refreshing a cached list once if
    /// the id is not in it.
    async fn locate_chapter(
        &self,
        settings: RetrievalSettings,
        rule: &Rule,
        novel_key: &NovelKey,
        chapter_id: &str,
    ) -> Result<ChapterEntry> {
        let novel = self
            .novel_with_rule(settings, rule, novel_key, false)
            .await?;
        if let Some(entry) = novel.value.chapter(chapter_id) {
            return Ok(entry.clone());
        }
        if novel.freshness == Freshness::Fetched {
            return Err(LocalBooksError::ChapterNotFound(chapter_id.to_string()));
        }

        debug!(%novel_key, chapter_id, "Chapter not in cached list, refreshing novel");
        let novel = self
            .novel_with_rule(settings, rule, novel_key, true)
            .await?;
        novel
            .value
            .chapter(chapter_id)
            .cloned()
            .ok_or_else(|| LocalBooksError::ChapterNotFound(chapter_id.to_string()))
    }

    async fn load_chapter(
        &self,
        settings: RetrievalSettings,
        rule: &Rule,
        key: &ChapterKey,
        title: &str,
        chapter_url: &str,
        stale: Option<ChapterRecord>,
    ) -> Result<Retrieved<ChapterRecord>> {
        let refreshed = self.fetch_chapter(rule, key, title, chapter_url).await;
        self.settle(settings, &key.chapter_id, refreshed, stale, |record| {
            self.cache.put_chapter(key, record)
        })
    }

    fn lookup<T: Timestamped>(
        &self,
        settings: RetrievalSettings,
        force_network: bool,
        what: &dyn Display,
        read: impl FnOnce() -> Result<Option<T>>,
    ) -> Result<Lookup<T>> {
        if !settings.cache_enabled || force_network {
            return Ok(Lookup::Miss { stale: None });
        }

        Ok(match read()? {
            Some(record) if !settings.expiration.is_expired(&record) => {
                debug!(key = %what, "Cache hit");
                Lookup::Fresh(record)
            }
            Some(record) => {
                debug!(key = %what, fetched_at = %record.fetched_at(), "Cache entry expired");
                Lookup::Miss {
                    stale: Some(record),
                }
            }
            None => {
                debug!(key = %what, "Cache miss");
                Lookup::Miss { stale: None }
            }
        })
    }

    /// Persist a successful refresh, or fall back to the stale entry.
    fn settle<T>(
        &self,
        settings: RetrievalSettings,
        what: &dyn Display,
        refreshed: Result<T>,
        stale: Option<T>,
        persist: impl FnOnce(&T) -> Result<()>,
    ) -> Result<Retrieved<T>> {
        match refreshed {
            Ok(record) => {
                if settings.cache_enabled {
                    persist(&record)?;
                }
                Ok(Retrieved::fetched(record))
            }
            Err(err) if err.is_refresh_failure() => match stale {
                Some(record) => {
                    warn!(key = %what, error = %err, "Refresh failed, serving stale cache entry");
                    Ok(Retrieved::stale(record, err.to_string()))
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    async fn fetch_novel(&self, rule: &Rule, key: &NovelKey) -> Result<NovelRecord> {
        let document = self.fetcher.fetch(&key.novel_url).await?;

        let specs: Vec<FieldSpec> = [
            Some(FieldSpec::required("title", &rule.title_rule)),
            FieldSpec::optional("author", rule.author_rule.as_deref()),
            FieldSpec::optional("description", rule.description_rule.as_deref()),
            FieldSpec::optional("cover", rule.cover_rule.as_deref()),
        ]
        .into_iter()
        .flatten()
        .collect();
        let mut fields = self.engine.extract_fields(&specs, &document)?;

        let title = fields
            .remove("title")
            .map(|t| single_line(&t))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ExtractionError::NoMatch {
                selector: rule.title_rule.clone(),
            })?;

        let listed = match self.engine.extract_list(&rule.chapter_list_rule, &document) {
            Ok(entries) => entries,
            Err(ExtractionError::NoMatch { .. }) => {
                debug!(%key, "Novel page lists no chapters");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let mut chapters: Vec<ChapterEntry> = Vec::with_capacity(listed.len());
        for (chapter_title, chapter_url) in listed.iter().filter_map(list_entry) {
            let entry =
                ChapterEntry::new(&key.novel_url, chapters.len(), chapter_title, chapter_url);
            if chapters.iter().all(|c| c.id != entry.id) {
                chapters.push(entry);
            }
        }

        info!(%key, %title, chapters = chapters.len(), "Extracted novel");
        Ok(NovelRecord {
            key: key.clone(),
            title,
            author: fields.remove("author").map(|a| single_line(&a)),
            description: fields
                .remove("description")
                .map(|d| body_text(&d, rule.description_rule.as_deref().unwrap_or_default()))
                .filter(|d| !d.is_empty()),
            cover: fields.remove("cover"),
            chapters,
            fetched_at: Utc::now(),
        })
    }

    async fn fetch_chapter(
        &self,
        rule: &Rule,
        key: &ChapterKey,
        title: &str,
        chapter_url: &str,
    ) -> Result<ChapterRecord> {
        let document = self.fetcher.fetch(chapter_url).await?;
        let specs = [FieldSpec::required("content", &rule.chapter_content_rule)];
        let fields = self.engine.extract_fields(&specs, &document)?;

        let body = fields
            .get("content")
            .map(|raw| body_text(raw, &rule.chapter_content_rule))
            .unwrap_or_default();
        if body.is_empty() {
            return Err(ExtractionError::NoMatch {
                selector: rule.chapter_content_rule.clone(),
            }
            .into());
        }

        debug!(chapter_id = %key.chapter_id, bytes = body.len(), "Extracted chapter");
        Ok(ChapterRecord {
            chapter_id: key.chapter_id.clone(),
            title: title.to_string(),
            chapter_url: chapter_url.to_string(),
            body,
            fetched_at: Utc::now(),
        })
    }
}

/// Cleaned body text. Selectors ending in `@html` yield markup, which is
/// reduced to text first.
fn body_text(raw: &str, selector: &str) -> String {
    if selector.trim_end().ends_with("@html") {
        clean_chapter_text(&html_to_text(raw))
    } else {
        clean_chapter_text(raw)
    }
}

fn list_entry(entry: &FieldMap) -> Option<(String, String)> {
    let title = entry.get(LIST_TITLE)?;
    let url = entry.get(LIST_URL)?;
    Some((title.clone(), url.clone()))
}
