use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::app::{AppContext, LocalBooksError, Result};
use crate::cache::CacheStore;
use crate::domain::{RuleDraft, RulePatch};
use crate::retrieval::{BatchReport, Freshness, Retrieved};
use crate::store::{RuleSort, RuleStore, SettingsStore};

fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| {
        LocalBooksError::Validation(format!("Invalid rule file {}: {}", path.display(), e))
    })
}

fn freshness_note<T>(retrieved: &Retrieved<T>) -> String {
    match &retrieved.freshness {
        Freshness::Cached => "(from cache)".to_string(),
        Freshness::Fetched => "(fetched)".to_string(),
        Freshness::Stale { reason } => format!("(stale copy, refresh failed: {})", reason),
    }
}

pub fn add_rule(ctx: &AppContext, path: &Path) -> Result<()> {
    let draft: RuleDraft = read_toml(path)?;
    let rule = ctx.store.create_rule(&draft)?;
    println!("Added rule {}: {}", rule.id, rule.name);
    Ok(())
}

pub fn list_rules(ctx: &AppContext, page: u32, page_size: u32, sort_by: &str) -> Result<()> {
    let page = ctx
        .store
        .list_rules(page, page_size, RuleSort::parse_or_default(sort_by))?;

    if page.rules.is_empty() {
        println!("No rules");
        return Ok(());
    }

    for rule in &page.rules {
        println!("{:>4}  {}  {}", rule.id, rule.name, rule.source_url);
    }
    let pages = page.total.div_ceil(u64::from(page.page_size)).max(1);
    println!(
        "Page {} of {} ({} rules)",
        page.page, pages, page.total
    );
    Ok(())
}

pub fn show_rule(ctx: &AppContext, id: i64) -> Result<()> {
    let rule = ctx.store.get_rule(id)?;
    let optional = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".into());

    println!("Rule {}: {}", rule.id, rule.name);
    println!("  source_url:           {}", rule.source_url);
    println!("  search_url:           {}", rule.search_url);
    println!("  search_result_rule:   {}", optional(&rule.search_result_rule));
    println!("  title_rule:           {}", rule.title_rule);
    println!("  author_rule:          {}", optional(&rule.author_rule));
    println!("  description_rule:     {}", optional(&rule.description_rule));
    println!("  cover_rule:           {}", optional(&rule.cover_rule));
    println!("  chapter_list_rule:    {}", rule.chapter_list_rule);
    println!("  chapter_content_rule: {}", rule.chapter_content_rule);
    println!("  created:              {}", rule.created_at.to_rfc3339());
    println!("  updated:              {}", rule.updated_at.to_rfc3339());
    Ok(())
}

pub fn update_rule(ctx: &AppContext, id: i64, path: &Path) -> Result<()> {
    let patch: RulePatch = read_toml(path)?;
    let rule = ctx.store.update_rule(id, &patch)?;
    println!("Updated rule {}: {}", rule.id, rule.name);
    Ok(())
}

pub fn remove_rule(ctx: &AppContext, id: i64) -> Result<()> {
    ctx.store.delete_rule(id)?;
    println!("Removed rule {}", id);
    Ok(())
}

pub async fn search(ctx: &AppContext, rule_id: i64, keyword: &str) -> Result<()> {
    let results = ctx.orchestrator.search(rule_id, keyword).await?;

    if results.is_empty() {
        println!("No results for \"{}\"", keyword);
        return Ok(());
    }

    for result in results {
        println!("{}\n    {}", result.title, result.novel_url);
    }
    Ok(())
}

pub async fn show_novel(ctx: &AppContext, rule_id: i64, url: &str, network: bool) -> Result<()> {
    let settings = ctx.retrieval_settings()?;
    let novel = ctx
        .orchestrator
        .novel_detail(settings, rule_id, url, network)
        .await?;

    let record = &novel.value;
    println!("{} {}", record.title, freshness_note(&novel));
    if let Some(author) = &record.author {
        println!("Author: {}", author);
    }
    if let Some(cover) = &record.cover {
        println!("Cover: {}", cover);
    }
    println!("Chapters: {}", record.chapters.len());
    if let Some(description) = &record.description {
        println!("\n{}", description);
    }
    Ok(())
}

pub async fn list_chapters(ctx: &AppContext, rule_id: i64, url: &str, network: bool) -> Result<()> {
    let settings = ctx.retrieval_settings()?;
    let chapters = ctx
        .orchestrator
        .chapter_list(settings, rule_id, url, network)
        .await?;

    if chapters.value.is_empty() {
        println!("No chapters {}", freshness_note(&chapters));
        return Ok(());
    }

    for chapter in &chapters.value {
        println!("{:>5}  {}  {}", chapter.index + 1, chapter.id, chapter.title);
    }
    println!("{} chapters {}", chapters.value.len(), freshness_note(&chapters));
    Ok(())
}

pub async fn read_chapter(
    ctx: &AppContext,
    rule_id: i64,
    url: &str,
    chapter_id: &str,
    network: bool,
) -> Result<()> {
    let settings = ctx.retrieval_settings()?;
    let chapter = ctx
        .orchestrator
        .chapter_content(settings, rule_id, url, chapter_id, network)
        .await?;

    println!("{} {}\n", chapter.value.title, freshness_note(&chapter));
    println!("{}", chapter.value.body);
    Ok(())
}

pub async fn download(ctx: &AppContext, rule_id: i64, url: &str) -> Result<()> {
    let settings = ctx.retrieval_settings()?;
    let handle = ctx.batch.start(settings, rule_id, url).await?;
    let key = handle.key().clone();
    println!("Downloading {} chapters...", handle.progress().total);

    let progress = {
        let batch = ctx.batch.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(2));
            interval.tick().await;
            loop {
                interval.tick().await;
                match batch.status(&key) {
                    Some(p) => eprintln!("  {}/{} chapters done", p.completed(), p.total),
                    None => break,
                }
            }
        })
    };
    let interrupt = {
        let batch = ctx.batch.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() && batch.cancel(&key) {
                eprintln!("Cancelling, waiting for chapters in flight...");
            }
        })
    };

    let report = handle.wait().await;
    progress.abort();
    interrupt.abort();
    print_report(&report?);
    Ok(())
}

fn print_report(report: &BatchReport) {
    println!(
        "Download complete: {} downloaded, {} already cached, {} failed, {} cancelled (of {})",
        report.succeeded, report.already_cached, report.failed, report.cancelled, report.total
    );
    for failure in &report.failures {
        eprintln!("  {} {}: {}", failure.chapter_id, failure.title, failure.reason);
    }
}

pub fn cache_info(ctx: &AppContext) -> Result<()> {
    let info = ctx.cache.info()?;
    println!("Directory: {}", info.directory.display());
    println!("Entries:   {}", info.entry_count);
    println!("Size:      {}", format_bytes(info.total_bytes));
    Ok(())
}

pub fn set_cache_dir(ctx: &AppContext, path: &Path) -> Result<()> {
    let path = if path.is_relative() {
        std::env::current_dir()?.join(path)
    } else {
        path.to_path_buf()
    };
    ctx.set_cache_directory(&path)?;
    println!("Cache directory set to {}", path.display());
    Ok(())
}

pub fn clear_cache(ctx: &AppContext) -> Result<()> {
    ctx.cache.clear_all()?;
    println!("Cache cleared");
    Ok(())
}

pub fn show_settings(ctx: &AppContext) -> Result<()> {
    let settings = ctx.retrieval_settings()?;
    println!("cache_enabled    = {}", settings.cache_enabled);
    println!("cache_expiration = {}", settings.expiration.max_age.as_secs());
    println!("cache_directory  = {}", ctx.cache.directory()?.display());

    let stored = ctx.store.all_settings()?;
    if !stored.is_empty() {
        println!("\nStored overrides:");
        for (key, value) in stored {
            println!("  {} = {}", key, value);
        }
    }
    Ok(())
}

pub fn set_setting(ctx: &AppContext, key: &str, value: &str) -> Result<()> {
    ctx.set_setting(key, value)?;
    println!("{} = {}", key, value.trim());
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
