pub mod sqlite;

use serde::Serialize;

use crate::app::Result;
use crate::domain::{Rule, RuleDraft, RulePatch};

pub use sqlite::SqliteStore;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 50;

/// Sortable rule columns. Unknown names fall back to [`RuleSort::UpdatedAt`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RuleSort {
    /// Most recently updated first
    #[default]
    UpdatedAt,
    /// Most recently created first
    CreatedAt,
    /// Alphabetical
    Name,
}

impl RuleSort {
    pub fn parse_or_default(s: &str) -> Self {
        match s.trim() {
            "created_at" => RuleSort::CreatedAt,
            "name" => RuleSort::Name,
            "updated_at" => RuleSort::UpdatedAt,
            other => {
                tracing::debug!("Unknown rule sort field {:?}, using updated_at", other);
                RuleSort::UpdatedAt
            }
        }
    }

    fn order_by(self) -> &'static str {
        match self {
            RuleSort::UpdatedAt => "updated_at DESC, id DESC",
            RuleSort::CreatedAt => "created_at DESC, id DESC",
            RuleSort::Name => "name COLLATE NOCASE ASC, id ASC",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RulePage {
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub rules: Vec<Rule>,
}

pub trait RuleStore {
    fn create_rule(&self, draft: &RuleDraft) -> Result<Rule>;
    fn get_rule(&self, id: i64) -> Result<Rule>;
    fn list_rules(&self, page: u32, page_size: u32, sort: RuleSort) -> Result<RulePage>;
    fn update_rule(&self, id: i64, patch: &RulePatch) -> Result<Rule>;
    fn delete_rule(&self, id: i64) -> Result<()>;
}

/// Key/value preferences shared with the reading client.
pub trait SettingsStore {
    fn get_setting(&self, key: &str) -> Result<Option<String>>;
    fn set_setting(&self, key: &str, value: &str) -> Result<()>;
    /// Returns false when the key was not set.
    fn delete_setting(&self, key: &str) -> Result<bool>;
    fn all_settings(&self) -> Result<Vec<(String, String)>>;
}
