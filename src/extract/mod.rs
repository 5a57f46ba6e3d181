//! Evaluation of a rule's selector strings against a fetched page.
//!
//! The engine is a strategy behind [`ExtractionEngine`]; rules are data, so a
//! single implementation serves every site. [`CssEngine`] is the bundled one.

mod clean;
mod css;

pub use clean::{clean_chapter_text, html_to_text, single_line};
pub use css::CssEngine;

use std::collections::BTreeMap;

use thiserror::Error;

use crate::fetcher::Document;

/// Named values pulled out of a document.
pub type FieldMap = BTreeMap<String, String>;

/// Keys produced by [`ExtractionEngine::extract_list`].
pub const LIST_TITLE: &str = "title";
pub const LIST_URL: &str = "url";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("Selector `{selector}` is invalid: {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("Selector `{selector}` matched nothing")]
    NoMatch { selector: String },

    #[error("Rule has no selector for {field}")]
    MissingRule { field: String },
}

/// One field to extract: its output name and the selector producing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub selector: String,
    /// A required field that matches nothing is an error rather than absent.
    pub required: bool,
}

impl FieldSpec {
    pub fn required(name: &str, selector: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, selector: Option<&str>) -> Option<Self> {
        selector.map(|selector| Self {
            name: name.to_string(),
            selector: selector.to_string(),
            required: false,
        })
    }
}

/// Deterministic for a given (selector, document) pair.
pub trait ExtractionEngine: Send + Sync {
    /// Every element matched by `selector` as a `{title, url}` map.
    fn extract_list(
        &self,
        selector: &str,
        document: &Document,
    ) -> Result<Vec<FieldMap>, ExtractionError>;

    /// The first match of each field, keyed by field name. Optional fields
    /// that match nothing are left out of the map.
    fn extract_fields(
        &self,
        specs: &[FieldSpec],
        document: &Document,
    ) -> Result<FieldMap, ExtractionError>;
}
