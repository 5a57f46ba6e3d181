use std::sync::OnceLock;

use regex::Regex;
use scraper::Html;

/// Boilerplate that mirror sites inject into chapter bodies.
const AD_PATTERNS: &[&str] = &[
    r"(?i)https?://\S+",
    r"(?i)www\.[\w-]+(\.[\w-]+)+\S*",
    r"[(（]?请在百度搜索[^)）]*[)）]?",
    r"天才一秒记住[^\s。]*",
    r"手机用户请访问\S*",
    r"本章未完，?请?点击下一页继续阅读",
    r"(?i)please bookmark this site\S*",
];

fn ad_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        AD_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// Normalize an extracted chapter body: strip known ad lines, trim every
/// line, drop blanks and separate paragraphs with one empty line.
pub fn clean_chapter_text(raw: &str) -> String {
    let patterns = ad_patterns();
    raw.lines()
        .map(|line| {
            let mut line = line.replace('\u{a0}', " ").replace('\u{3000}', " ");
            for re in patterns {
                if re.is_match(&line) {
                    line = re.replace_all(&line, "").into_owned();
                }
            }
            line.trim().to_string()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn block_breaks() -> Option<&'static Regex> {
    static BREAKS: OnceLock<Option<Regex>> = OnceLock::new();
    BREAKS
        .get_or_init(|| Regex::new(r"(?i)<br\s*/?>|</p\s*>|</div\s*>").ok())
        .as_ref()
}

/// Text of an HTML fragment, with line breaks where `<br>`, `</p>` and
/// `</div>` ended a line. Entities are decoded.
pub fn html_to_text(fragment: &str) -> String {
    let parsed = match block_breaks() {
        Some(re) => Html::parse_fragment(&re.replace_all(fragment, "$0\n")),
        None => Html::parse_fragment(fragment),
    };
    parsed.root_element().text().collect()
}

/// Collapse all whitespace runs to single spaces.
pub fn single_line(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
