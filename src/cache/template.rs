use super::{load_json_or_default, persist_json};
use crate::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRecord {
    pub remote_template_id: String,
    pub html_hash: String,
    pub uploaded_at: DateTime<Local>,
    pub html_size_bytes: usize,
}

/// Template name -> what was last uploaded under that name.
pub struct TemplateCache {
    path: PathBuf,
    records: BTreeMap<String, TemplateRecord>,
}

impl TemplateCache {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = load_json_or_default(&path);
        Self { path, records }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, template_name: &str) -> Option<&TemplateRecord> {
        self.records.get(template_name)
    }

    pub fn record(&mut self, template_name: &str, remote_template_id: &str, html: &str) {
        self.records.insert(
            template_name.to_string(),
            TemplateRecord {
                remote_template_id: remote_template_id.to_string(),
                html_hash: html_hash(html),
                uploaded_at: Local::now(),
                html_size_bytes: html.len(),
            },
        );
    }

    pub fn save(&self) -> Result<()> {
        persist_json(&self.path, &self.records)
    }

    pub fn clear(&mut self) -> Result<usize> {
        let removed = self.records.len();
        self.records.clear();
        self.save()?;
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// First 16 hex chars of the SHA-256 of the document.
pub fn html_hash(html: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(html.as_bytes()));
    digest[..16].to_string()
}
