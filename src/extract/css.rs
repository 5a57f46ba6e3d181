use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::extract::{
    ExtractionEngine, ExtractionError, FieldMap, FieldSpec, LIST_TITLE, LIST_URL,
};
use crate::fetcher::Document;

/// CSS selector engine.
///
/// A selector string is a CSS selector with an optional output suffix:
///
/// - `h1.title` or `h1.title@text`: the element's text
/// - `#content@html`: the element's inner HTML
/// - `img.cover@src`: an attribute; `href` and `src` are made absolute
#[derive(Debug, Default, Clone)]
pub struct CssEngine;

impl CssEngine {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Output {
    Text,
    Html,
    Attr(String),
}

struct ParsedSelector {
    selector: Selector,
    output: Output,
}

fn parse(raw: &str) -> Result<ParsedSelector, ExtractionError> {
    let raw = raw.trim();
    let (css, output) = match raw.rsplit_once('@') {
        Some((css, suffix)) if !css.trim().is_empty() && is_attr_name(suffix) => {
            let output = match suffix {
                "text" => Output::Text,
                "html" => Output::Html,
                attr => Output::Attr(attr.to_string()),
            };
            (css.trim(), output)
        }
        _ => (raw, Output::Text),
    };

    let selector = Selector::parse(css).map_err(|e| ExtractionError::InvalidSelector {
        selector: raw.to_string(),
        message: e.to_string(),
    })?;
    Ok(ParsedSelector { selector, output })
}

fn is_attr_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':')
}

/// Text nodes of an element, each trimmed, one per line.
fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn resolve(base: Option<&Url>, value: &str) -> String {
    match base.and_then(|b| b.join(value).ok()) {
        Some(url) => url.to_string(),
        None => value.to_string(),
    }
}

fn output_of(element: &ElementRef<'_>, output: &Output, base: Option<&Url>) -> Option<String> {
    let value = match output {
        Output::Text => element_text(element),
        Output::Html => element.inner_html().trim().to_string(),
        Output::Attr(name) => {
            let raw = element.value().attr(name)?.trim();
            if name == "href" || name == "src" {
                resolve(base, raw)
            } else {
                raw.to_string()
            }
        }
    };
    (!value.is_empty()).then_some(value)
}

/// The element's own `href`, else that of its first descendant link.
fn link_of(element: &ElementRef<'_>, anchor: &Selector) -> Option<String> {
    element
        .value()
        .attr("href")
        .or_else(|| {
            element
                .select(anchor)
                .find_map(|a| a.value().attr("href"))
        })
        .map(str::trim)
        .filter(|href| !href.is_empty() && !href.starts_with("javascript:"))
        .map(str::to_string)
}

impl ExtractionEngine for CssEngine {
    fn extract_list(
        &self,
        selector: &str,
        document: &Document,
    ) -> Result<Vec<FieldMap>, ExtractionError> {
        let parsed = parse(selector)?;
        let anchor = Selector::parse("a[href]").map_err(|e| ExtractionError::InvalidSelector {
            selector: "a[href]".into(),
            message: e.to_string(),
        })?;
        let base = Url::parse(&document.url).ok();
        let html = Html::parse_document(&document.body);

        let entries: Vec<FieldMap> = html
            .select(&parsed.selector)
            .filter_map(|element| {
                let title = super::single_line(&element_text(&element));
                let href = link_of(&element, &anchor)?;
                if title.is_empty() {
                    return None;
                }
                let mut map = FieldMap::new();
                map.insert(LIST_TITLE.to_string(), title);
                map.insert(LIST_URL.to_string(), resolve(base.as_ref(), &href));
                Some(map)
            })
            .collect();

        if entries.is_empty() {
            return Err(ExtractionError::NoMatch {
                selector: selector.to_string(),
            });
        }
        Ok(entries)
    }

    fn extract_fields(
        &self,
        specs: &[FieldSpec],
        document: &Document,
    ) -> Result<FieldMap, ExtractionError> {
        let base = Url::parse(&document.url).ok();
        let html = Html::parse_document(&document.body);
        let mut fields = FieldMap::new();

        for spec in specs {
            let parsed = parse(&spec.selector)?;
            let value = html
                .select(&parsed.selector)
                .find_map(|element| output_of(&element, &parsed.output, base.as_ref()));

            match value {
                Some(value) => {
                    fields.insert(spec.name.clone(), value);
                }
                None if spec.required => {
                    return Err(ExtractionError::NoMatch {
                        selector: spec.selector.clone(),
                    });
                }
                None => {}
            }
        }

        Ok(fields)
    }
}
