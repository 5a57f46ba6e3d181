use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::app::{LocalBooksError, Result};

/// Placeholder in `search_url` replaced by the search keyword.
pub const KEYWORD_PLACEHOLDER: &str = "{keyword}";

/// Extraction recipe for one source site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    pub source_url: String,
    pub search_url: String,
    pub search_result_rule: Option<String>,
    pub cover_rule: Option<String>,
    pub title_rule: String,
    pub author_rule: Option<String>,
    pub description_rule: Option<String>,
    pub chapter_list_rule: String,
    pub chapter_content_rule: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleDraft {
    pub name: String,
    pub source_url: String,
    pub search_url: String,
    pub search_result_rule: Option<String>,
    pub cover_rule: Option<String>,
    pub title_rule: String,
    pub author_rule: Option<String>,
    pub description_rule: Option<String>,
    pub chapter_list_rule: String,
    pub chapter_content_rule: String,
}

/// Partial update of a rule. `None` leaves a field untouched; for optional
/// selectors an empty string clears the field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulePatch {
    pub name: Option<String>,
    pub source_url: Option<String>,
    pub search_url: Option<String>,
    pub search_result_rule: Option<String>,
    pub cover_rule: Option<String>,
    pub title_rule: Option<String>,
    pub author_rule: Option<String>,
    pub description_rule: Option<String>,
    pub chapter_list_rule: Option<String>,
    pub chapter_content_rule: Option<String>,
}

impl RuleDraft {
    pub fn validate(&self) -> Result<()> {
        require("name", &self.name)?;
        require("title_rule", &self.title_rule)?;
        require("chapter_list_rule", &self.chapter_list_rule)?;
        require("chapter_content_rule", &self.chapter_content_rule)?;
        require_http_url("source_url", &self.source_url)?;
        require_http_url(
            "search_url",
            &self.search_url.replace(KEYWORD_PLACEHOLDER, "keyword"),
        )?;
        Ok(())
    }

    /// Drop blank optional selectors so they read as "field unavailable".
    pub fn normalized(mut self) -> Self {
        self.search_result_rule = non_blank(self.search_result_rule);
        self.cover_rule = non_blank(self.cover_rule);
        self.author_rule = non_blank(self.author_rule);
        self.description_rule = non_blank(self.description_rule);
        self
    }
}

impl Rule {
    pub fn to_draft(&self) -> RuleDraft {
        RuleDraft {
            name: self.name.clone(),
            source_url: self.source_url.clone(),
            search_url: self.search_url.clone(),
            search_result_rule: self.search_result_rule.clone(),
            cover_rule: self.cover_rule.clone(),
            title_rule: self.title_rule.clone(),
            author_rule: self.author_rule.clone(),
            description_rule: self.description_rule.clone(),
            chapter_list_rule: self.chapter_list_rule.clone(),
            chapter_content_rule: self.chapter_content_rule.clone(),
        }
    }

    /// Build the search page URL for `keyword`.
    pub fn search_page_url(&self, keyword: &str) -> Result<String> {
        let encoded: String = url::form_urlencoded::byte_serialize(keyword.as_bytes()).collect();
        if self.search_url.contains(KEYWORD_PLACEHOLDER) {
            let filled = self.search_url.replace(KEYWORD_PLACEHOLDER, &encoded);
            Url::parse(&filled)?;
            return Ok(filled);
        }

        let mut url = Url::parse(&self.search_url)?;
        url.query_pairs_mut().append_pair("keyword", keyword);
        Ok(url.to_string())
    }
}

impl RulePatch {
    pub fn is_empty(&self) -> bool {
        *self == RulePatch::default()
    }

    /// Merge the patch onto an existing draft.
    pub fn apply(&self, mut draft: RuleDraft) -> RuleDraft {
        fn set(target: &mut String, value: &Option<String>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }
        fn set_opt(target: &mut Option<String>, value: &Option<String>) {
            if let Some(v) = value {
                *target = Some(v.clone());
            }
        }

        set(&mut draft.name, &self.name);
        set(&mut draft.source_url, &self.source_url);
        set(&mut draft.search_url, &self.search_url);
        set(&mut draft.title_rule, &self.title_rule);
        set(&mut draft.chapter_list_rule, &self.chapter_list_rule);
        set(&mut draft.chapter_content_rule, &self.chapter_content_rule);
        set_opt(&mut draft.search_result_rule, &self.search_result_rule);
        set_opt(&mut draft.cover_rule, &self.cover_rule);
        set_opt(&mut draft.author_rule, &self.author_rule);
        set_opt(&mut draft.description_rule, &self.description_rule);
        draft.normalized()
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(LocalBooksError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn require_http_url(field: &str, value: &str) -> Result<()> {
    require(field, value)?;
    let url = Url::parse(value.trim())
        .map_err(|e| LocalBooksError::Validation(format!("{} is not a valid URL: {}", field, e)))?;
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(()),
        _ => Err(LocalBooksError::Validation(format!(
            "{} must be an http(s) URL",
            field
        ))),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
