//! Origin-scoped key/value stores
//!
//! Two independent stores back the engine: a durable one for route
//! aggregates and a per-session one for warm marks. Either may be missing
//! in locked-down environments, so every store is probed once at startup
//! and callers fall back to in-memory state when the probe fails.

use crate::{CoreError, Result};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Key written and removed by [`probe_store`]
pub const PROBE_KEY: &str = "__prewarm_probe__";

/// Minimal string key/value store
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value; deleting a missing key is not an error
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store, cleared when dropped
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Store that keeps nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStore;

impl KeyValueStore for NoopStore {
    fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// Durable store keeping one JSON document per key in a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Directory backing this store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{}.json", name))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp_path = path.with_extension("tmp");

        fs::write(&tmp_path, value)?;
        fs::rename(&tmp_path, &path)?;

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Check that a store accepts a write/read/delete cycle.
///
/// Returns the store back when usable, `None` otherwise. Failures are
/// logged and never propagated.
pub fn probe_store(
    store: Arc<dyn KeyValueStore>,
    label: &str,
) -> Option<Arc<dyn KeyValueStore>> {
    let outcome = store
        .set(PROBE_KEY, "1")
        .and_then(|_| store.get(PROBE_KEY))
        .and_then(|value| match value.as_deref() {
            Some("1") => store.remove(PROBE_KEY),
            _ => Err(CoreError::Unavailable(format!("{} did not retain probe", label))),
        });

    match outcome {
        Ok(()) => {
            debug!("{} store available", label);
            Some(store)
        }
        Err(e) => {
            warn!("{} store unavailable, continuing in memory: {}", label, e);
            None
        }
    }
}

/// Read and decode a JSON document.
///
/// A document that fails to decode is discarded and its key wiped, so a
/// corrupt entry can never poison later reads.
pub fn load_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!("Failed to read '{}': {}", key, e);
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Discarding malformed '{}': {}", key, e);
            if let Err(e) = store.remove(key) {
                warn!("Failed to wipe '{}': {}", key, e);
            }
            None
        }
    }
}

/// Encode and write a JSON document
pub fn save_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let data = serde_json::to_string(value)?;
    store.set(key, &data)
}
