#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use localbooks::cache::{CacheStore, FileCache};
use localbooks::domain::{Rule, RuleDraft};
use localbooks::extract::{CssEngine, ExtractionEngine};
use localbooks::fetcher::{Document, FetchError, Fetcher};
use localbooks::retrieval::Orchestrator;
use localbooks::store::{RuleStore, SqliteStore};

pub const SITE: &str = "https://books.example.com";
pub const NOVEL_URL: &str = "https://books.example.com/book/42/";

/// Serves canned pages and counts requests per URL.
#[derive(Default)]
pub struct StubFetcher {
    pages: Mutex<HashMap<String, String>>,
    failing: Mutex<HashMap<String, FetchError>>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
    delay: Option<Duration>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn serve(&self, url: &str, body: impl Into<String>) {
        self.failing.lock().unwrap().remove(url);
        self.pages.lock().unwrap().insert(url.to_string(), body.into());
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(
            url.to_string(),
            FetchError::Network {
                url: url.to_string(),
                message: "connection reset".into(),
            },
        );
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<Document, FetchError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.failing.lock().unwrap().get(url) {
            return Err(err.clone());
        }
        let body = self.pages.lock().unwrap().get(url).cloned();
        match body {
            Some(body) => Ok(Document::new(url, body)),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

pub fn rule_draft() -> RuleDraft {
    RuleDraft {
        name: "Example Books".into(),
        source_url: SITE.into(),
        search_url: format!("{}/search?q={{keyword}}", SITE),
        search_result_rule: Some(".result a".into()),
        cover_rule: Some("img.cover@src".into()),
        title_rule: "h1.title".into(),
        author_rule: Some(".author".into()),
        description_rule: Some(".intro".into()),
        chapter_list_rule: "#list a".into(),
        chapter_content_rule: "#content".into(),
    }
}

pub fn novel_page(title: &str, chapters: usize) -> String {
    let links: String = (1..=chapters)
        .map(|n| format!(r#"<dd><a href="/book/42/{n}.html">Chapter {n}</a></dd>"#))
        .collect();
    format!(
        r#"<html><body>
            <h1 class="title">{title}</h1>
            <p class="author">Jane Doe</p>
            <div class="intro">A long road.</div>
            <img class="cover" src="/covers/42.jpg">
            <dl id="list">{links}</dl>
        </body></html>"#
    )
}

pub fn chapter_url(n: usize) -> String {
    format!("{}/book/42/{}.html", SITE, n)
}

pub fn chapter_page(text: &str) -> String {
    format!(r#"<html><body><div id="content">{text}</div></body></html>"#)
}

pub struct Harness {
    pub _dir: tempfile::TempDir,
    pub store: Arc<SqliteStore>,
    pub cache: Arc<FileCache>,
    pub fetcher: Arc<StubFetcher>,
    pub orchestrator: Orchestrator,
    pub rule: Rule,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_fetcher(StubFetcher::new())
    }

    pub fn with_fetcher(fetcher: StubFetcher) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let cache = Arc::new(FileCache::open(dir.path().join("cache")).unwrap());
        let fetcher = Arc::new(fetcher);
        let engine: Arc<dyn ExtractionEngine> = Arc::new(CssEngine::new());
        let orchestrator = Orchestrator::new(
            store.clone(),
            cache.clone() as Arc<dyn CacheStore>,
            fetcher.clone(),
            engine,
        );
        let rule = store.create_rule(&rule_draft()).unwrap();

        Self {
            _dir: dir,
            store,
            cache,
            fetcher,
            orchestrator,
            rule,
        }
    }
}
