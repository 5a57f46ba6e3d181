use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};

use crate::app::{LocalBooksError, Result};
use crate::domain::{Rule, RuleDraft, RulePatch};
use crate::store::{RulePage, RuleSort, RuleStore, SettingsStore, MAX_PAGE_SIZE};

const RULE_COLUMNS: &str = "id, name, source_url, search_url, search_result_rule, cover_rule, \
     title_rule, author_rule, description_rule, chapter_list_rule, chapter_content_rule, \
     created_at, updated_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn()?;
        migrations
            .to_latest(&mut conn)
            .map_err(|e| LocalBooksError::Config(format!("Database migration failed: {}", e)))?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            LocalBooksError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    fn timestamp(dt: DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<DateTime<Utc>>().ok())
    }

    fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<Rule> {
        Ok(Rule {
            id: row.get(0)?,
            name: row.get(1)?,
            source_url: row.get(2)?,
            search_url: row.get(3)?,
            search_result_rule: row.get(4)?,
            cover_rule: row.get(5)?,
            title_rule: row.get(6)?,
            author_rule: row.get(7)?,
            description_rule: row.get(8)?,
            chapter_list_rule: row.get(9)?,
            chapter_content_rule: row.get(10)?,
            created_at: row
                .get::<_, String>(11)
                .ok()
                .and_then(|s| Self::parse_datetime(&s))
                .unwrap_or_else(Utc::now),
            updated_at: row
                .get::<_, String>(12)
                .ok()
                .and_then(|s| Self::parse_datetime(&s))
                .unwrap_or_else(Utc::now),
        })
    }

    fn find_rule(conn: &Connection, id: i64) -> Result<Option<Rule>> {
        let rule = conn
            .query_row(
                &format!("SELECT {} FROM rules WHERE id = ?1", RULE_COLUMNS),
                params![id],
                Self::rule_from_row,
            )
            .optional()?;
        Ok(rule)
    }
}

impl RuleStore for SqliteStore {
    fn create_rule(&self, draft: &RuleDraft) -> Result<Rule> {
        draft.validate()?;
        let draft = draft.clone().normalized();
        let now = Self::timestamp(Utc::now());

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO rules (name, source_url, search_url, search_result_rule, cover_rule,
                 title_rule, author_rule, description_rule, chapter_list_rule,
                 chapter_content_rule, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                draft.name.trim(),
                draft.source_url.trim(),
                draft.search_url.trim(),
                draft.search_result_rule,
                draft.cover_rule,
                draft.title_rule,
                draft.author_rule,
                draft.description_rule,
                draft.chapter_list_rule,
                draft.chapter_content_rule,
                now
            ],
        )?;

        let id = conn.last_insert_rowid();
        tracing::info!(rule_id = id, name = %draft.name, "Created rule");
        Self::find_rule(&conn, id)?.ok_or(LocalBooksError::RuleNotFound(id))
    }

    fn get_rule(&self, id: i64) -> Result<Rule> {
        let conn = self.conn()?;
        Self::find_rule(&conn, id)?.ok_or(LocalBooksError::RuleNotFound(id))
    }

    fn list_rules(&self, page: u32, page_size: u32, sort: RuleSort) -> Result<RulePage> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = (page as i64 - 1) * page_size as i64;

        let conn = self.conn()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM rules", [], |row| row.get(0))?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM rules ORDER BY {} LIMIT ?1 OFFSET ?2",
            RULE_COLUMNS,
            sort.order_by()
        ))?;
        let rules = stmt
            .query_map(params![page_size as i64, offset], Self::rule_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(RulePage {
            total: total as u64,
            page,
            page_size,
            rules,
        })
    }

    fn update_rule(&self, id: i64, patch: &RulePatch) -> Result<Rule> {
        let conn = self.conn()?;
        let existing = Self::find_rule(&conn, id)?.ok_or(LocalBooksError::RuleNotFound(id))?;

        if patch.is_empty() {
            return Err(LocalBooksError::Validation("No fields to update".into()));
        }

        let merged = patch.apply(existing.to_draft()).normalized();
        merged.validate()?;

        conn.execute(
            "UPDATE rules SET name = ?1, source_url = ?2, search_url = ?3,
                 search_result_rule = ?4, cover_rule = ?5, title_rule = ?6, author_rule = ?7,
                 description_rule = ?8, chapter_list_rule = ?9, chapter_content_rule = ?10,
                 updated_at = ?11
             WHERE id = ?12",
            params![
                merged.name.trim(),
                merged.source_url.trim(),
                merged.search_url.trim(),
                merged.search_result_rule,
                merged.cover_rule,
                merged.title_rule,
                merged.author_rule,
                merged.description_rule,
                merged.chapter_list_rule,
                merged.chapter_content_rule,
                Self::timestamp(Utc::now()),
                id
            ],
        )?;

        tracing::info!(rule_id = id, "Updated rule");
        Self::find_rule(&conn, id)?.ok_or(LocalBooksError::RuleNotFound(id))
    }

    fn delete_rule(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM rules WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(LocalBooksError::RuleNotFound(id));
        }
        tracing::info!(rule_id = id, "Deleted rule");
        Ok(())
    }
}

impl SettingsStore for SqliteStore {
    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, value, Self::timestamp(Utc::now())],
        )?;
        Ok(())
    }

    fn delete_setting(&self, key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(deleted > 0)
    }

    fn all_settings(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
        let settings = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str) -> RuleDraft {
        RuleDraft {
            name: name.into(),
            source_url: "https://books.example.com".into(),
            search_url: "https://books.example.com/search?q={keyword}".into(),
            search_result_rule: Some(".result a".into()),
            cover_rule: Some("img.cover@src".into()),
            title_rule: "h1".into(),
            author_rule: None,
            description_rule: Some("  ".into()),
            chapter_list_rule: "#list a".into(),
            chapter_content_rule: "#content".into(),
        }
    }

    #[test]
    fn test_create_and_get_rule() {
        let store = SqliteStore::in_memory().unwrap();
        let created = store.create_rule(&draft("Alpha")).unwrap();

        let fetched = store.get_rule(created.id).unwrap();
        assert_eq!(fetched.name, "Alpha");
        assert_eq!(fetched.cover_rule, Some("img.cover@src".into()));
        // Blank optional selectors are stored as absent
        assert_eq!(fetched.description_rule, None);
        assert_eq!(fetched, created);
    }

    #[test]
    fn test_create_rejects_missing_title_rule() {
        let store = SqliteStore::in_memory().unwrap();
        let mut bad = draft("Broken");
        bad.title_rule = String::new();

        let err = store.create_rule(&bad).unwrap_err();
        assert!(matches!(err, LocalBooksError::Validation(_)));
        assert_eq!(
            store.list_rules(1, 10, RuleSort::default()).unwrap().total,
            0
        );
    }

    #[test]
    fn test_get_unknown_rule() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(matches!(
            store.get_rule(42),
            Err(LocalBooksError::RuleNotFound(42))
        ));
    }

    #[test]
    fn test_update_rule() {
        let store = SqliteStore::in_memory().unwrap();
        let created = store.create_rule(&draft("Alpha")).unwrap();

        let patch = RulePatch {
            name: Some("Beta".into()),
            author_rule: Some(".author".into()),
            ..Default::default()
        };
        let updated = store.update_rule(created.id, &patch).unwrap();
        assert_eq!(updated.name, "Beta");
        assert_eq!(updated.author_rule, Some(".author".into()));
        assert_eq!(updated.title_rule, "h1");
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(updated.created_at, created.created_at);
    }

    #[test]
    fn test_update_rejects_clearing_mandatory_field() {
        let store = SqliteStore::in_memory().unwrap();
        let created = store.create_rule(&draft("Alpha")).unwrap();

        let patch = RulePatch {
            chapter_content_rule: Some(String::new()),
            ..Default::default()
        };
        assert!(matches!(
            store.update_rule(created.id, &patch),
            Err(LocalBooksError::Validation(_))
        ));
        assert_eq!(store.get_rule(created.id).unwrap().chapter_content_rule, "#content");
    }

    #[test]
    fn test_update_clears_optional_selector() {
        let store = SqliteStore::in_memory().unwrap();
        let created = store.create_rule(&draft("Alpha")).unwrap();
        assert!(created.cover_rule.is_some());

        let patch = RulePatch {
            cover_rule: Some("  ".into()),
            ..Default::default()
        };
        let updated = store.update_rule(created.id, &patch).unwrap();
        assert!(updated.cover_rule.is_none());
    }

    #[test]
    fn test_update_and_delete_unknown_rule() {
        let store = SqliteStore::in_memory().unwrap();
        let patch = RulePatch {
            name: Some("x".into()),
            ..Default::default()
        };
        assert!(matches!(
            store.update_rule(7, &patch),
            Err(LocalBooksError::RuleNotFound(7))
        ));
        assert!(matches!(
            store.delete_rule(7),
            Err(LocalBooksError::RuleNotFound(7))
        ));
    }

    #[test]
    fn test_delete_rule() {
        let store = SqliteStore::in_memory().unwrap();
        let created = store.create_rule(&draft("Alpha")).unwrap();
        store.delete_rule(created.id).unwrap();
        assert!(store.get_rule(created.id).is_err());
    }

    #[test]
    fn test_list_pagination_and_sorting() {
        let store = SqliteStore::in_memory().unwrap();
        for name in ["charlie", "Alpha", "bravo"] {
            store.create_rule(&draft(name)).unwrap();
        }

        let by_name = store.list_rules(1, 10, RuleSort::Name).unwrap();
        let names: Vec<_> = by_name.rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "bravo", "charlie"]);
        assert_eq!(by_name.total, 3);

        let newest = store.list_rules(1, 2, RuleSort::CreatedAt).unwrap();
        assert_eq!(newest.rules.len(), 2);
        assert_eq!(newest.rules[0].name, "bravo");

        let second = store.list_rules(2, 2, RuleSort::CreatedAt).unwrap();
        assert_eq!(second.rules.len(), 1);
        assert_eq!(second.rules[0].name, "charlie");
    }

    #[test]
    fn test_list_clamps_page_and_size() {
        let store = SqliteStore::in_memory().unwrap();
        store.create_rule(&draft("Alpha")).unwrap();

        let page = store.list_rules(0, 500, RuleSort::UpdatedAt).unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, MAX_PAGE_SIZE);
        assert_eq!(page.rules.len(), 1);
    }

    #[test]
    fn test_unknown_sort_falls_back() {
        assert_eq!(RuleSort::parse_or_default("bogus"), RuleSort::UpdatedAt);
        assert_eq!(RuleSort::parse_or_default("name"), RuleSort::Name);
        assert_eq!(RuleSort::parse_or_default("created_at"), RuleSort::CreatedAt);
    }

    #[test]
    fn test_settings_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.get_setting("cache_enabled").unwrap(), None);

        store.set_setting("cache_enabled", "false").unwrap();
        store.set_setting("cache_enabled", "true").unwrap();
        store.set_setting("cache_expiration", "60").unwrap();

        assert_eq!(
            store.get_setting("cache_enabled").unwrap(),
            Some("true".into())
        );
        assert_eq!(store.all_settings().unwrap().len(), 2);
    }

    #[test]
    fn test_delete_setting() {
        let store = SqliteStore::in_memory().unwrap();
        store.set_setting("cache_directory", "/tmp/books").unwrap();

        assert!(store.delete_setting("cache_directory").unwrap());
        assert_eq!(store.get_setting("cache_directory").unwrap(), None);
        assert!(!store.delete_setting("cache_directory").unwrap());
    }
}
