//! Key/value storage abstraction.
//!
//! The [`KeyValueStore`] trait stands in for browser `localStorage` /
//! `sessionStorage`: a flat string-to-string map with last-writer-wins
//! semantics and no transactions. Two implementations are provided:
//!
//! - **[`InMemoryStore`]** — `HashMap` behind an `RwLock`; used for tests and
//!   for session-scoped state that should not outlive the process.
//! - **[`FileStore`]** — a single JSON object file on disk; used by the CLI so
//!   the visitor id and cached endpoint survive between invocations.
//!
//! Implementations must be `Send + Sync` so a store can be shared through an
//! `Arc` with spawned analytics tasks.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};

/// Shared store handle.
pub type SharedStore = Arc<dyn KeyValueStore>;

/// A flat string key/value store.
pub trait KeyValueStore: Send + Sync {
    /// Read a value. Absent keys return `Ok(None)`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, overwriting any previous one.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

// ============ In-memory ============

/// In-memory store for tests and session-scoped data.
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn shared() -> SharedStore {
        Arc::new(Self::new())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

// ============ File-backed ============

/// JSON-file store. The whole map is rewritten on every mutation.
///
/// The in-process lock serialises writers within one process only; two
/// processes writing the same file race and the last write wins.
pub struct FileStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read store file: {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse store file: {}", self.path.display()))
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create store directory: {}", parent.display())
                })?;
            }
        }
        let content = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write store file: {}", self.path.display()))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self
            .lock
            .read()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self
            .lock
            .write()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self
            .lock
            .write()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        let mut entries = self.load()?;
        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}
