//! # localbooks
//!
//! Reads web novels from arbitrary sites through user-authored extraction
//! rules, keeping a local cache so chapters already read stay readable
//! offline.
//!
//! ## Architecture
//!
//! ```text
//! RuleStore ─┐
//!            ├─> Orchestrator ─> Fetcher ─> ExtractionEngine
//! CacheStore ┘        │
//!                     └─> BatchScheduler (bounded worker pool)
//! ```
//!
//! Reads are cache-first: a fresh cache entry is served without touching
//! the network, an expired one is refreshed, and if the refresh fails the
//! expired entry is served marked as stale.
//!
//! ## Quick Start
//!
//! ```bash
//! # Add a rule for a site
//! localbooks rule add example-books.toml
//!
//! # Search it, then read
//! localbooks search 1 "long road"
//! localbooks chapters 1 https://books.example.com/book/42/
//! localbooks read 1 https://books.example.com/book/42/ <chapter-id>
//!
//! # Download everything for offline reading
//! localbooks download 1 https://books.example.com/book/42/
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together all components:
/// rule store, cache, fetcher, orchestrator and batch scheduler.
pub mod app;

/// Local cache of extracted novels and chapters.
///
/// - [`CacheStore`](cache::CacheStore): storage operations
/// - [`FileCache`](cache::FileCache): JSON files with atomic replace
/// - [`ExpirationPolicy`](cache::ExpirationPolicy): freshness window
pub mod cache;

/// Command-line interface using clap.
pub mod cli;

/// Configuration loaded from `~/.config/localbooks/config.toml`.
pub mod config;

/// Core domain models.
///
/// - [`Rule`](domain::Rule): per-site extraction recipe
/// - [`NovelRecord`](domain::NovelRecord): novel metadata and chapter list
/// - [`ChapterRecord`](domain::ChapterRecord): chapter body
pub mod domain;

/// Selector evaluation against fetched pages.
pub mod extract;

/// HTTP fetching with timeouts and retries.
///
/// - [`Fetcher`](fetcher::Fetcher): Async trait for page fetching
/// - [`HttpFetcher`](fetcher::HttpFetcher): reqwest-based implementation
pub mod fetcher;

/// Cache-first retrieval and batch downloads.
pub mod retrieval;

/// SQLite persistence for rules and settings.
///
/// - [`RuleStore`](store::RuleStore) and [`SettingsStore`](store::SettingsStore)
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
pub mod store;
