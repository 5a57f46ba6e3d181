pub mod chapter;
pub mod novel;
pub mod rule;

pub use chapter::{ChapterKey, ChapterRecord};
pub use novel::{ChapterEntry, NovelKey, NovelRecord, SearchResult};
pub use rule::{Rule, RuleDraft, RulePatch, KEYWORD_PLACEHOLDER};
