use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::app::{LocalBooksError, Result};
use crate::cache::{CacheInfo, CacheStore, CACHE_SUBDIRS};
use crate::domain::{ChapterKey, ChapterRecord, NovelKey, NovelRecord};

/// JSON-file cache rooted at a relocatable directory.
///
/// Layout:
///
/// ```text
/// <dir>/novels/<novel-digest>.json
/// <dir>/chapters/<novel-digest>/<chapter-digest>.json
/// ```
///
/// Every record is written to a temp file next to its target and renamed into
/// place, so readers see either the previous record or the new one in full.
/// The directory is held behind a lock: record reads and writes take the
/// shared side for the duration of one local file operation, relocation and
/// clearing take the exclusive side. A write resolves the directory when it
/// runs, never when the surrounding retrieval started.
pub struct FileCache {
    root: RwLock<PathBuf>,
}

impl FileCache {
    pub fn open<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let dir = dir.into();
        prepare_dir(&dir)?;
        Ok(Self {
            root: RwLock::new(dir),
        })
    }

    pub fn directory(&self) -> Result<PathBuf> {
        Ok(self.read_root()?.clone())
    }

    fn read_root(&self) -> Result<RwLockReadGuard<'_, PathBuf>> {
        self.root
            .read()
            .map_err(|e| LocalBooksError::Cache(format!("cache lock poisoned: {}", e)))
    }

    fn write_root(&self) -> Result<RwLockWriteGuard<'_, PathBuf>> {
        self.root
            .write()
            .map_err(|e| LocalBooksError::Cache(format!("cache lock poisoned: {}", e)))
    }

    fn novel_path(root: &Path, key: &NovelKey) -> PathBuf {
        root.join("novels").join(format!("{}.json", key.digest()))
    }

    fn chapter_path(root: &Path, key: &ChapterKey) -> PathBuf {
        root.join("chapters")
            .join(key.novel.digest())
            .join(format!("{}.json", key.digest()))
    }
}

impl CacheStore for FileCache {
    fn get_novel(&self, key: &NovelKey) -> Result<Option<NovelRecord>> {
        let root = self.read_root()?;
        read_record(&Self::novel_path(&root, key))
    }

    fn put_novel(&self, key: &NovelKey, record: &NovelRecord) -> Result<()> {
        let root = self.read_root()?;
        write_record(&Self::novel_path(&root, key), record)?;
        debug!(novel = %key, "Cached novel record");
        Ok(())
    }

    fn get_chapter(&self, key: &ChapterKey) -> Result<Option<ChapterRecord>> {
        let root = self.read_root()?;
        read_record(&Self::chapter_path(&root, key))
    }

    fn put_chapter(&self, key: &ChapterKey, record: &ChapterRecord) -> Result<()> {
        let root = self.read_root()?;
        write_record(&Self::chapter_path(&root, key), record)?;
        debug!(novel = %key.novel, chapter_id = %key.chapter_id, "Cached chapter");
        Ok(())
    }

    fn clear_all(&self) -> Result<()> {
        let root = self.write_root()?;
        for sub in CACHE_SUBDIRS {
            let path = root.join(sub);
            match fs::remove_dir_all(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(cache_io("clear", &path, e)),
            }
        }
        prepare_dir(&root)?;
        info!(directory = %root.display(), "Cleared cache");
        Ok(())
    }

    fn set_directory(&self, path: &Path) -> Result<()> {
        if !path.is_absolute() {
            return Err(LocalBooksError::Validation(format!(
                "Cache directory must be an absolute path: {}",
                path.display()
            )));
        }
        // Prepare outside the lock; only the swap is exclusive.
        prepare_dir(path)?;

        let mut root = self.write_root()?;
        let previous = std::mem::replace(&mut *root, path.to_path_buf());
        info!(
            from = %previous.display(),
            to = %path.display(),
            "Relocated cache directory"
        );
        Ok(())
    }

    fn info(&self) -> Result<CacheInfo> {
        let root = self.read_root()?;
        let mut entry_count = 0;
        let mut total_bytes = 0;
        for sub in CACHE_SUBDIRS {
            let (count, bytes) = tally(&root.join(sub))?;
            entry_count += count;
            total_bytes += bytes;
        }
        Ok(CacheInfo {
            entry_count,
            total_bytes,
            directory: root.clone(),
        })
    }
}

/// Create the cache directory layout and check it is writable.
fn prepare_dir(dir: &Path) -> Result<()> {
    if dir.exists() && !dir.is_dir() {
        return Err(LocalBooksError::Validation(format!(
            "Cache path is not a directory: {}",
            dir.display()
        )));
    }
    for sub in CACHE_SUBDIRS {
        let path = dir.join(sub);
        fs::create_dir_all(&path).map_err(|e| cache_io("create", &path, e))?;
    }
    NamedTempFile::new_in(dir).map_err(|e| cache_io("write to", dir, e))?;
    Ok(())
}

fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(cache_io("read", path, e)),
    };
    let record = serde_json::from_slice(&bytes).map_err(|e| {
        LocalBooksError::Cache(format!("corrupt cache entry {}: {}", path.display(), e))
    })?;
    Ok(Some(record))
}

fn write_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| LocalBooksError::Cache(format!("invalid cache path {}", path.display())))?;
    fs::create_dir_all(parent).map_err(|e| cache_io("create", parent, e))?;

    let bytes = serde_json::to_vec(record)?;
    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| cache_io("write to", parent, e))?;
    tmp.write_all(&bytes).map_err(|e| cache_io("write", path, e))?;
    tmp.flush().map_err(|e| cache_io("write", path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| cache_io("write", path, e))?;
    tmp.persist(path)
        .map_err(|e| cache_io("replace", path, e.error))?;
    Ok(())
}

/// Count `.json` records and their total size below `dir`.
fn tally(dir: &Path) -> Result<(u64, u64)> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((0, 0)),
        Err(e) => return Err(cache_io("scan", dir, e)),
    };

    let mut count = 0;
    let mut bytes = 0;
    for entry in entries {
        let entry = entry.map_err(|e| cache_io("scan", dir, e))?;
        let path = entry.path();
        let meta = entry.metadata().map_err(|e| cache_io("scan", &path, e))?;
        if meta.is_dir() {
            let (c, b) = tally(&path)?;
            count += c;
            bytes += b;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            count += 1;
            bytes += meta.len();
        }
    }
    Ok((count, bytes))
}

fn cache_io(action: &str, path: &Path, err: io::Error) -> LocalBooksError {
    LocalBooksError::Cache(format!("failed to {} {}: {}", action, path.display(), err))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::domain::ChapterEntry;

    fn novel(key: &NovelKey, title: &str) -> NovelRecord {
        NovelRecord {
            key: key.clone(),
            title: title.into(),
            author: Some("Author".into()),
            description: None,
            cover: Some("https://x.com/cover.jpg".into()),
            chapters: vec![ChapterEntry::new(
                &key.novel_url,
                0,
                "Prologue".into(),
                format!("{}/0", key.novel_url),
            )],
            fetched_at: Utc::now(),
        }
    }

    fn chapter(id: &str, body: &str) -> ChapterRecord {
        ChapterRecord {
            chapter_id: id.into(),
            title: format!("title {}", body),
            chapter_url: format!("https://x.com/{}", id),
            body: body.into(),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn test_novel_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        let key = NovelKey::new(1, "https://x.com/book/1");
        let record = novel(&key, "Book");

        assert_eq!(cache.get_novel(&key).unwrap(), None);
        cache.put_novel(&key, &record).unwrap();
        assert_eq!(cache.get_novel(&key).unwrap(), Some(record));
    }

    #[test]
    fn test_chapter_roundtrip_and_replace() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        let key = ChapterKey::new(NovelKey::new(1, "https://x.com/book/1"), "c1");

        cache.put_chapter(&key, &chapter("c1", "old")).unwrap();
        let newer = chapter("c1", "new");
        cache.put_chapter(&key, &newer).unwrap();
        assert_eq!(cache.get_chapter(&key).unwrap(), Some(newer));
    }

    #[test]
    fn test_concurrent_puts_never_mix_records() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(FileCache::open(dir.path()).unwrap());
        let key = ChapterKey::new(NovelKey::new(1, "https://x.com/book/1"), "c1");
        let a = chapter("c1", &"a".repeat(64 * 1024));
        let b = chapter("c1", &"b".repeat(32 * 1024));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                let key = key.clone();
                let (a, b) = (a.clone(), b.clone());
                std::thread::spawn(move || {
                    let record = if i % 2 == 0 { &a } else { &b };
                    for _ in 0..20 {
                        cache.put_chapter(&key, record).unwrap();
                        let read = cache.get_chapter(&key).unwrap().unwrap();
                        assert!(read == a || read == b);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let last = cache.get_chapter(&key).unwrap().unwrap();
        assert!(last == a || last == b);
    }

    #[test]
    fn test_put_after_relocation_lands_in_new_directory() {
        let old_dir = tempfile::tempdir().unwrap();
        let new_dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(old_dir.path()).unwrap();
        let key = NovelKey::new(3, "https://x.com/book/3");
        let record = novel(&key, "Moved");

        cache.set_directory(new_dir.path()).unwrap();
        cache.put_novel(&key, &record).unwrap();

        assert_eq!(cache.directory().unwrap(), new_dir.path());
        assert_eq!(cache.get_novel(&key).unwrap(), Some(record));
        assert!(FileCache::novel_path(new_dir.path(), &key).exists());
        assert!(!FileCache::novel_path(old_dir.path(), &key).exists());
    }

    #[test]
    fn test_set_directory_requires_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        assert!(matches!(
            cache.set_directory(Path::new("relative/cache")),
            Err(LocalBooksError::Validation(_))
        ));
        assert_eq!(cache.directory().unwrap(), dir.path());
    }

    #[test]
    fn test_clear_all_and_info() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        let novel_key = NovelKey::new(1, "https://x.com/book/1");
        cache.put_novel(&novel_key, &novel(&novel_key, "Book")).unwrap();
        for id in ["c1", "c2"] {
            let key = ChapterKey::new(novel_key.clone(), id);
            cache.put_chapter(&key, &chapter(id, "body")).unwrap();
        }

        let info = cache.info().unwrap();
        assert_eq!(info.entry_count, 3);
        assert!(info.total_bytes > 0);
        assert_eq!(info.directory, dir.path());

        cache.clear_all().unwrap();
        let info = cache.info().unwrap();
        assert_eq!(info.entry_count, 0);
        assert_eq!(info.total_bytes, 0);
        assert_eq!(cache.get_novel(&novel_key).unwrap(), None);

        // Still usable after clearing
        cache.put_novel(&novel_key, &novel(&novel_key, "Again")).unwrap();
        assert_eq!(cache.info().unwrap().entry_count, 1);
    }

    #[test]
    fn test_corrupt_entry_is_cache_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        let key = NovelKey::new(1, "https://x.com/book/1");
        fs::write(FileCache::novel_path(dir.path(), &key), b"{not json").unwrap();

        assert!(matches!(
            cache.get_novel(&key),
            Err(LocalBooksError::Cache(_))
        ));
    }
}
