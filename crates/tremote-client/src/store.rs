//! Durable storage for remote profiles and application preferences.
//!
//! The file store keeps everything in one JSON document at
//! `~/.tremote/profiles.json`:
//!
//! ```json
//! { "profiles": { "<id>": { ...profile... } }, "preferences": { "lastRemote": "<id>" } }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use tremote_core::wire::RpcMap;
use tremote_core::{RemoteError, RemoteProfile, RemoteResult};

use crate::listeners::lock;

/// Preference key naming the most recently bound profile.
pub const PREF_LAST_REMOTE: &str = "lastRemote";

pub trait ProfileStore: Send + Sync {
    fn load(&self, id: &str) -> RemoteResult<Option<RemoteProfile>>;
    fn persist(&self, profile: &RemoteProfile) -> RemoteResult<()>;
    /// Application preference lookup.
    fn get(&self, key: &str) -> RemoteResult<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> RemoteResult<()>;

    fn get_or(&self, key: &str, default: Value) -> RemoteResult<Value> {
        Ok(self.get(key)?.unwrap_or(default))
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    profiles: BTreeMap<String, RemoteProfile>,
    #[serde(default)]
    preferences: RpcMap,
}

/// In-process store.
#[derive(Default)]
pub struct MemoryProfileStore {
    document: Mutex<StoreDocument>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile_count(&self) -> usize {
        lock(&self.document).profiles.len()
    }
}

impl ProfileStore for MemoryProfileStore {
    fn load(&self, id: &str) -> RemoteResult<Option<RemoteProfile>> {
        Ok(lock(&self.document).profiles.get(id).cloned())
    }

    fn persist(&self, profile: &RemoteProfile) -> RemoteResult<()> {
        lock(&self.document)
            .profiles
            .insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    fn get(&self, key: &str) -> RemoteResult<Option<Value>> {
        Ok(lock(&self.document).preferences.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> RemoteResult<()> {
        lock(&self.document).preferences.insert(key.to_string(), value);
        Ok(())
    }
}

/// JSON file store. Every write rewrites the document via a temp file.
pub struct FileProfileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    guard: Mutex<()>,
}

impl FileProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    /// Store at the default location (`~/.tremote/profiles.json`).
    pub fn default_location() -> RemoteResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| RemoteError::Store("cannot determine home directory".into()))?;
        Ok(Self::new(home.join(".tremote").join("profiles.json")))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Every stored profile, sorted by id.
    pub fn list(&self) -> RemoteResult<Vec<RemoteProfile>> {
        let _guard = lock(&self.guard);
        Ok(self.read_document()?.profiles.into_values().collect())
    }

    fn read_document(&self) -> RemoteResult<StoreDocument> {
        if !self.path.exists() {
            return Ok(StoreDocument::default());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(StoreDocument::default());
        }
        serde_json::from_str(&content)
            .map_err(|e| RemoteError::Store(format!("{}: {e}", self.path.display())))
    }

    fn write_document(&self, document: &StoreDocument) -> RemoteResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "profile store written");
        Ok(())
    }

    fn modify(&self, f: impl FnOnce(&mut StoreDocument)) -> RemoteResult<()> {
        let _guard = lock(&self.guard);
        let mut document = self.read_document()?;
        f(&mut document);
        self.write_document(&document)
    }
}

impl ProfileStore for FileProfileStore {
    fn load(&self, id: &str) -> RemoteResult<Option<RemoteProfile>> {
        let _guard = lock(&self.guard);
        Ok(self.read_document()?.profiles.remove(id))
    }

    fn persist(&self, profile: &RemoteProfile) -> RemoteResult<()> {
        self.modify(|doc| {
            doc.profiles.insert(profile.id.clone(), profile.clone());
        })
    }

    fn get(&self, key: &str) -> RemoteResult<Option<Value>> {
        let _guard = lock(&self.guard);
        Ok(self.read_document()?.preferences.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> RemoteResult<()> {
        self.modify(|doc| {
            doc.preferences.insert(key.to_string(), value);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryProfileStore::new();
        let profile = RemoteProfile::direct("p1", "myhost", 9091);
        store.persist(&profile).unwrap();
        assert_eq!(store.load("p1").unwrap(), Some(profile));
        assert_eq!(store.load("p2").unwrap(), None);
        assert_eq!(store.get_or("missing", json!(3)).unwrap(), json!(3));
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("profiles.json");

        let store = FileProfileStore::new(&path);
        let mut profile = RemoteProfile::direct("p1", "myhost", 9091);
        profile.save_path_history = vec!["/data".into()];
        store.persist(&profile).unwrap();
        store.set(PREF_LAST_REMOTE, json!("p1")).unwrap();

        let reopened = FileProfileStore::new(&path);
        assert_eq!(reopened.load("p1").unwrap(), Some(profile));
        assert_eq!(reopened.get(PREF_LAST_REMOTE).unwrap(), Some(json!("p1")));
        assert_eq!(reopened.list().unwrap().len(), 1);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileProfileStore::new(dir.path().join("profiles.json"));
        assert_eq!(store.load("x").unwrap(), None);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        fs::write(&path, "{not json").unwrap();
        let store = FileProfileStore::new(&path);
        assert!(matches!(store.load("x"), Err(RemoteError::Store(_))));
    }
}
