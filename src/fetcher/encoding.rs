//! Charset detection for fetched pages.
//!
//! Order of precedence: byte order mark, `Content-Type` charset, a
//! `<meta charset>` declaration near the top of the document, then a guess
//! from the bytes themselves.

use std::sync::OnceLock;

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};
use regex::bytes::Regex;
use tracing::debug;

/// How far into the document a `<meta charset>` declaration is looked for.
const META_PRESCAN_BYTES: usize = 4096;

fn meta_charset_pattern() -> &'static Option<Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i-u)<meta[^>]*?charset\s*=\s*["']?\s*([a-z0-9_.:\-]+)"#).ok()
    })
}

/// Charset label from a `Content-Type` header value.
pub fn header_charset(content_type: &str) -> Option<&'static Encoding> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        Encoding::for_label(value.trim().trim_matches(|c| c == '"' || c == '\'').as_bytes())
    })
}

/// Charset declared by a `<meta>` tag in the head of the document.
pub fn meta_charset(body: &[u8]) -> Option<&'static Encoding> {
    let head = &body[..body.len().min(META_PRESCAN_BYTES)];
    let captures = meta_charset_pattern().as_ref()?.captures(head)?;
    Encoding::for_label(captures.get(1)?.as_bytes())
}

fn sniff(body: &[u8]) -> &'static Encoding {
    if std::str::from_utf8(body).is_ok() {
        return UTF_8;
    }
    let mut detector = EncodingDetector::new();
    detector.feed(body, true);
    detector.guess(None, true)
}

/// Decode a page body to UTF-8 text.
pub fn decode_body(body: &[u8], content_type: Option<&str>) -> String {
    let (encoding, source) = if let Some((encoding, _)) = Encoding::for_bom(body) {
        (encoding, "bom")
    } else if let Some(encoding) = content_type.and_then(header_charset) {
        (encoding, "header")
    } else if let Some(encoding) = meta_charset(body) {
        (encoding, "meta")
    } else {
        (sniff(body), "detected")
    };

    debug!(encoding = encoding.name(), source, "Decoding page");
    let (text, _, had_errors) = encoding.decode(body);
    if had_errors {
        debug!(encoding = encoding.name(), "Page contained malformed sequences");
    }
    text.into_owned()
}
