//! Persistent caches for uploaded content
//!
//! The content cache maps image fingerprints to hosted URLs and is consulted
//! before every upload. The template cache is bookkeeping only: it records
//! what was uploaded under which name and is never used to skip an upload.
//! Both are plain JSON objects on disk and may be deleted at any time.

pub mod content;
pub mod template;

pub use content::ContentCache;
pub use template::{TemplateCache, TemplateRecord};

use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Reads a JSON map from disk. Missing or unparseable files yield `T::default()`.
pub(crate) fn load_json_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return T::default(),
    };
    match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Ignoring unreadable cache file {}: {}", path.display(), e);
            T::default()
        }
    }
}

/// Writes JSON through a sibling temp file and renames it into place, so a
/// reader never observes a half-written file.
pub(crate) fn persist_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let json = serde_json::to_string_pretty(value)?;
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(json.as_bytes())?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
