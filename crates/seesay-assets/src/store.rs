//! File-backed key/value store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};

use seesay_core::persistence::KeyValueStore;

/// A key/value store kept in a single JSON object on disk.
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename, so a crash never leaves a half-written file behind.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open `path`, starting empty when it does not exist or cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("ignoring corrupt store {}: {e}", path.display());
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!("cannot read store {}: {e}", path.display());
                BTreeMap::new()
            }
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of every stored entry.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use seesay_core::persistence::{Persistence, StorageKey};

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = JsonFileStore::open(&path);
        store.set("ageYears", "4").unwrap();
        store.set("page", "\"test\"").unwrap();
        store.remove("page").unwrap();

        let reopened = JsonFileStore::open(&path);
        assert_eq!(reopened.get("ageYears").as_deref(), Some("4"));
        assert_eq!(reopened.get("page"), None);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = JsonFileStore::open(&path);
        assert!(store.snapshot().is_empty());
        store.set("userId", "\"123456789\"").unwrap();
        assert_eq!(JsonFileStore::open(&path).snapshot().len(), 1);
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        JsonFileStore::open(&path).set("k", "v").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn backs_persistence_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let persistence = Persistence::new(Arc::new(JsonFileStore::open(&path)));
        persistence.save(StorageKey::CurrentIndex, &7usize);
        persistence.save(StorageKey::IdDigits, "123456789");

        let reopened = Persistence::new(Arc::new(JsonFileStore::open(&path)));
        assert_eq!(reopened.load::<usize>(StorageKey::CurrentIndex), Some(7));
        assert_eq!(
            reopened.load::<String>(StorageKey::IdDigits).as_deref(),
            Some("123456789")
        );

        reopened.clear_all();
        let store = JsonFileStore::open(&path);
        assert!(store.snapshot().is_empty());
        let cleared = Persistence::new(Arc::new(store));
        assert!(!cleared.contains(StorageKey::IdDigits));
        assert_eq!(cleared.load::<String>(StorageKey::IdDigits), None);
    }
}
