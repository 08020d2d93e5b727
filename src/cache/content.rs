use super::{load_json_or_default, persist_json};
use crate::models::Fingerprint;
use crate::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

/// Fingerprint -> hosted URL, shared by all upload workers.
///
/// Lookups take a read lock on the in-memory map. `record` updates the map
/// and then rewrites the whole file while holding `persist_lock`, so two
/// workers finishing together cannot interleave their writes.
pub struct ContentCache {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
    persist_lock: Mutex<()>,
}

impl ContentCache {
    /// Opens the cache file, starting empty if it is missing or unreadable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries: BTreeMap<String, String> = load_json_or_default(&path);
        tracing::debug!(
            "Loaded {} cached uploads from {}",
            entries.len(),
            path.display()
        );
        Self {
            path,
            entries: RwLock::new(entries),
            persist_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(fingerprint.as_str())
            .cloned()
    }

    /// Records a successful upload and persists immediately.
    ///
    /// An existing entry is never replaced: the first URL recorded for a
    /// fingerprint wins.
    pub fn record(&self, fingerprint: &Fingerprint, hosted_url: &str) -> Result<()> {
        let _guard = self
            .persist_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let snapshot = {
            let mut entries = self
                .entries
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if entries.contains_key(fingerprint.as_str()) {
                return Ok(());
            }
            entries.insert(fingerprint.to_string(), hosted_url.to_string());
            entries.clone()
        };

        persist_json(&self.path, &snapshot)
    }

    /// Manual eviction of every entry. The pipeline never calls this.
    pub fn clear(&self) -> Result<usize> {
        let _guard = self
            .persist_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let removed = {
            let mut entries = self
                .entries
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let removed = entries.len();
            entries.clear();
            removed
        };
        persist_json(&self.path, &BTreeMap::<String, String>::new())?;
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
