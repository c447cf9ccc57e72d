//! Key/value durability for resuming a session after an unplanned reload.
//!
//! Every stateful component writes its fields through a shared
//! [`Persistence`] handle on each mutation and reads them back once at
//! startup. Values are JSON-encoded. A missing or corrupt value falls back to
//! the field's default with a warning; write failures are logged and never
//! halt the session.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// The fixed set of keys the engine persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    AgeYears,
    AgeMonths,
    IdDigits,
    AgeConfirmed,
    AgeInvalid,
    CurrentIndex,
    CorrectAnswers,
    PartialAnswers,
    WrongAnswers,
    Permission,
    MicrophoneSkipped,
    AudioChunks,
    AudioUrl,
    RecPaused,
    DevMode,
    SessionRecordingActive,
    SessionRecordingUrl,
    SessionRecordingFinal,
    SessionRecordingChunks,
    Page,
}

impl StorageKey {
    /// Every key; `resetAll` clears exactly these.
    pub const ALL: [StorageKey; 20] = [
        StorageKey::AgeYears,
        StorageKey::AgeMonths,
        StorageKey::IdDigits,
        StorageKey::AgeConfirmed,
        StorageKey::AgeInvalid,
        StorageKey::CurrentIndex,
        StorageKey::CorrectAnswers,
        StorageKey::PartialAnswers,
        StorageKey::WrongAnswers,
        StorageKey::Permission,
        StorageKey::MicrophoneSkipped,
        StorageKey::AudioChunks,
        StorageKey::AudioUrl,
        StorageKey::RecPaused,
        StorageKey::DevMode,
        StorageKey::SessionRecordingActive,
        StorageKey::SessionRecordingUrl,
        StorageKey::SessionRecordingFinal,
        StorageKey::SessionRecordingChunks,
        StorageKey::Page,
    ];

    /// The key name in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKey::AgeYears => "ageYears",
            StorageKey::AgeMonths => "ageMonths",
            StorageKey::IdDigits => "idDigits",
            StorageKey::AgeConfirmed => "ageConfirmed",
            StorageKey::AgeInvalid => "ageInvalid",
            StorageKey::CurrentIndex => "currentIndex",
            StorageKey::CorrectAnswers => "correctAnswers",
            StorageKey::PartialAnswers => "partialAnswers",
            StorageKey::WrongAnswers => "wrongAnswers",
            StorageKey::Permission => "permission",
            StorageKey::MicrophoneSkipped => "microphoneSkipped",
            StorageKey::AudioChunks => "audioChunks",
            StorageKey::AudioUrl => "audioUrl",
            StorageKey::RecPaused => "recPaused",
            StorageKey::DevMode => "devMode",
            StorageKey::SessionRecordingActive => "sessionRecordingActive",
            StorageKey::SessionRecordingUrl => "sessionRecordingUrl",
            StorageKey::SessionRecordingFinal => "sessionRecordingFinal",
            StorageKey::SessionRecordingChunks => "sessionRecordingChunks",
            StorageKey::Page => "page",
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable string key/value store, like a browser's local storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;

    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// Process-local store. Survives engine rebuilds, not process restarts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// Typed, fault-tolerant access to the store, shared by all components.
#[derive(Clone)]
pub struct Persistence {
    store: Arc<dyn KeyValueStore>,
}

impl fmt::Debug for Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persistence").finish_non_exhaustive()
    }
}

impl Persistence {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// A handle over a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Read a value. `None` if absent or unreadable.
    pub fn load<T: DeserializeOwned>(&self, key: StorageKey) -> Option<T> {
        let raw = self.store.get(key.as_str())?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("ignoring corrupt value for {key}: {e}");
                None
            }
        }
    }

    /// Read a value, falling back to `default`.
    pub fn load_or<T: DeserializeOwned>(&self, key: StorageKey, default: T) -> T {
        self.load(key).unwrap_or(default)
    }

    /// Read a value, falling back to `T::default()`.
    pub fn load_or_default<T: DeserializeOwned + Default>(&self, key: StorageKey) -> T {
        self.load(key).unwrap_or_default()
    }

    pub fn save<T: Serialize + ?Sized>(&self, key: StorageKey, value: &T) {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!("failed to encode {key}: {e}");
                return;
            }
        };
        if let Err(e) = self.store.set(key.as_str(), &encoded) {
            tracing::warn!("failed to save {key}: {e:#}");
        }
    }

    pub fn remove(&self, key: StorageKey) {
        if let Err(e) = self.store.remove(key.as_str()) {
            tracing::warn!("failed to remove {key}: {e:#}");
        }
    }

    pub fn contains(&self, key: StorageKey) -> bool {
        self.store.get(key.as_str()).is_some()
    }

    /// Remove every key in [`StorageKey::ALL`].
    pub fn clear_all(&self) {
        for key in StorageKey::ALL {
            self.remove(key);
        }
        tracing::info!("cleared {} persisted keys", StorageKey::ALL.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn sample_value(key: StorageKey) -> Value {
        match key {
            StorageKey::AgeYears | StorageKey::AgeMonths => json!("4"),
            StorageKey::IdDigits => json!("123456789"),
            StorageKey::CurrentIndex => json!(17),
            StorageKey::CorrectAnswers | StorageKey::PartialAnswers | StorageKey::WrongAnswers => {
                json!(3)
            }
            StorageKey::AudioChunks | StorageKey::SessionRecordingChunks => json!(["AQID", "BAU="]),
            StorageKey::AudioUrl | StorageKey::SessionRecordingUrl => json!("blob:seesay/abc"),
            StorageKey::SessionRecordingFinal => json!({
                "audio": "data:audio/webm;base64,AQID",
                "mimeType": "audio/webm",
                "timestamp": 1700000000000_i64
            }),
            StorageKey::Page => json!("test"),
            _ => json!(true),
        }
    }

    #[test]
    fn every_key_round_trips() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let writer = Persistence::new(Arc::clone(&store));
        for key in StorageKey::ALL {
            writer.save(key, &sample_value(key));
        }

        let reader = Persistence::new(store);
        for key in StorageKey::ALL {
            assert_eq!(reader.load::<Value>(key), Some(sample_value(key)), "{key}");
        }
    }

    #[test]
    fn key_names_are_unique() {
        let names: std::collections::HashSet<_> =
            StorageKey::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names.len(), StorageKey::ALL.len());
    }

    #[test]
    fn corrupt_value_falls_back_to_default() {
        let store = Arc::new(MemoryStore::new());
        store.set("currentIndex", "{not json").unwrap();
        store.set("devMode", "\"yes\"").unwrap();

        let persistence = Persistence::new(store);
        assert_eq!(persistence.load_or(StorageKey::CurrentIndex, 0usize), 0);
        assert!(!persistence.load_or_default::<bool>(StorageKey::DevMode));
        assert_eq!(persistence.load::<u32>(StorageKey::WrongAnswers), None);
    }

    #[test]
    fn clear_all_removes_enumerated_keys_only() {
        let store = Arc::new(MemoryStore::new());
        store.set("unrelated", "1").unwrap();
        let persistence = Persistence::new(store.clone());
        for key in StorageKey::ALL {
            persistence.save(key, &sample_value(key));
        }
        assert_eq!(store.len(), 21);

        persistence.clear_all();
        assert_eq!(store.len(), 1);
        assert!(StorageKey::ALL.iter().all(|k| !persistence.contains(*k)));
    }
}
