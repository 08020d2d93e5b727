//! Data models and structures
//!
//! Defines the asset descriptors, per-asset and per-document outcomes, the
//! batch summary, the Mailchimp wire types and the environment configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where in a newsletter an image appears. Reporting only.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UsageContext {
    Hero,
    #[default]
    Inline,
    Thumbnail,
    Footer,
}

/// Importance of an asset. Ordering is dispatch order: critical first.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    Important,
    #[default]
    Normal,
    Optional,
}

impl fmt::Display for UsageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UsageContext::Hero => "hero",
            UsageContext::Inline => "inline",
            UsageContext::Thumbnail => "thumbnail",
            UsageContext::Footer => "footer",
        };
        f.write_str(label)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Priority::Critical => "critical",
            Priority::Important => "important",
            Priority::Normal => "normal",
            Priority::Optional => "optional",
        };
        f.write_str(label)
    }
}

/// Hex SHA-256 of an asset's raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    pub fn of_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self::of_bytes(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(hex: String) -> Self {
        Self(hex)
    }
}

/// An image to consider for upload, as supplied by the caller.
#[derive(Debug, Clone)]
pub struct AssetRequest {
    pub path: PathBuf,
    pub original_reference: Option<String>,
    pub usage_context: UsageContext,
    pub priority: Priority,
}

impl AssetRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            original_reference: None,
            usage_context: UsageContext::default(),
            priority: Priority::default(),
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.original_reference = Some(reference.into());
        self
    }

    pub fn with_usage(mut self, usage_context: UsageContext) -> Self {
        self.usage_context = usage_context;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone)]
pub struct AssetDescriptor {
    pub source_path: PathBuf,
    pub usage_context: UsageContext,
    pub priority: Priority,
    pub fingerprint: Fingerprint,
    pub original_reference: Option<String>,
}

impl AssetDescriptor {
    /// Reads the file once to fingerprint it. Fails if the file is unreadable.
    pub fn new(
        source_path: impl Into<PathBuf>,
        usage_context: UsageContext,
        priority: Priority,
        original_reference: Option<String>,
    ) -> Result<Self> {
        let source_path = source_path.into();
        let fingerprint = Fingerprint::of_file(&source_path)?;
        Ok(Self {
            source_path,
            usage_context,
            priority,
            fingerprint,
            original_reference,
        })
    }

    pub fn from_request(request: &AssetRequest) -> Result<Self> {
        Self::new(
            request.path.clone(),
            request.usage_context,
            request.priority,
            request.original_reference.clone(),
        )
    }

    /// Short label used in log lines.
    pub fn display_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_path.display().to_string())
    }

    /// Keys under which this asset's hosted URL is published in the mapping.
    pub fn mapping_keys(&self) -> Vec<String> {
        let mut keys = vec![self.source_path.to_string_lossy().into_owned()];
        if let Some(reference) = &self.original_reference {
            if !keys.contains(reference) {
                keys.push(reference.clone());
            }
        }
        keys
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    Uploaded { hosted_url: String },
    Cached { hosted_url: String },
    Failed { error: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub asset: AssetDescriptor,
    pub status: OutcomeStatus,
    pub elapsed: Duration,
    pub final_size_bytes: u64,
}

impl UploadOutcome {
    pub fn uploaded(asset: AssetDescriptor, hosted_url: String, elapsed: Duration, size: u64) -> Self {
        Self {
            asset,
            status: OutcomeStatus::Uploaded { hosted_url },
            elapsed,
            final_size_bytes: size,
        }
    }

    pub fn cached(asset: AssetDescriptor, hosted_url: String) -> Self {
        Self {
            asset,
            status: OutcomeStatus::Cached { hosted_url },
            elapsed: Duration::ZERO,
            final_size_bytes: 0,
        }
    }

    pub fn failed(asset: AssetDescriptor, error: String, elapsed: Duration) -> Self {
        Self {
            asset,
            status: OutcomeStatus::Failed { error },
            elapsed,
            final_size_bytes: 0,
        }
    }

    pub fn skipped(asset: AssetDescriptor, reason: String) -> Self {
        Self {
            asset,
            status: OutcomeStatus::Skipped { reason },
            elapsed: Duration::ZERO,
            final_size_bytes: 0,
        }
    }

    pub fn hosted_url(&self) -> Option<&str> {
        match &self.status {
            OutcomeStatus::Uploaded { hosted_url } | OutcomeStatus::Cached { hosted_url } => {
                Some(hosted_url)
            }
            _ => None,
        }
    }

    pub fn success(&self) -> bool {
        self.hosted_url().is_some()
    }

    pub fn from_cache(&self) -> bool {
        matches!(self.status, OutcomeStatus::Cached { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            OutcomeStatus::Failed { error } => Some(error),
            OutcomeStatus::Skipped { reason } => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub cached_hits: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Descriptors collapsed onto another descriptor with the same bytes.
    pub duplicates: usize,
    pub elapsed: Duration,
    pub total_bytes: u64,
    /// Source path or original reference -> hosted URL.
    pub url_mapping: BTreeMap<String, String>,
    pub errors: Vec<String>,
}

impl BatchSummary {
    /// Folds outcomes into counts and the URL mapping. `aliases` are
    /// descriptors that were collapsed onto a representative fingerprint.
    pub fn from_outcomes(
        outcomes: &[UploadOutcome],
        aliases: &[AssetDescriptor],
        elapsed: Duration,
    ) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            duplicates: aliases.len(),
            elapsed,
            ..Self::default()
        };

        for outcome in outcomes {
            match &outcome.status {
                OutcomeStatus::Uploaded { .. } => summary.succeeded += 1,
                OutcomeStatus::Cached { .. } => summary.cached_hits += 1,
                OutcomeStatus::Failed { error } => {
                    summary.failed += 1;
                    summary
                        .errors
                        .push(format!("{}: {}", outcome.asset.display_name(), error));
                }
                OutcomeStatus::Skipped { reason } => {
                    summary.skipped += 1;
                    summary.errors.push(format!(
                        "{}: skipped ({})",
                        outcome.asset.display_name(),
                        reason
                    ));
                }
            }

            summary.total_bytes += outcome.final_size_bytes;

            if let Some(url) = outcome.hosted_url() {
                let sharing = aliases
                    .iter()
                    .filter(|alias| alias.fingerprint == outcome.asset.fingerprint);
                for descriptor in std::iter::once(&outcome.asset).chain(sharing) {
                    for key in descriptor.mapping_keys() {
                        summary.url_mapping.insert(key, url.to_string());
                    }
                }
            }
        }

        summary
    }

    pub fn is_consistent(&self) -> bool {
        self.succeeded + self.cached_hits + self.failed + self.skipped == self.total
    }

    pub fn url_for(&self, key: &str) -> Option<&str> {
        self.url_mapping.get(key).map(String::as_str)
    }
}

/// A rendered HTML document to upload as a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub html: String,
}

impl Document {
    pub fn new(name: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            html: html.into(),
        }
    }

    /// Names the document after its locale and the current local time.
    pub fn for_locale(html: String, country: &str, language_code: &str, locale: &str) -> Self {
        let name =
            crate::templates::template_name(country, language_code, locale, chrono::Local::now());
        Self { name, html }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateUploadOutcome {
    pub template_name: String,
    pub success: bool,
    pub remote_template_id: Option<String>,
    pub error: Option<String>,
    pub elapsed: Duration,
    pub html_size_bytes: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TemplateBatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub template_ids: BTreeMap<String, String>,
    pub errors: Vec<String>,
    pub elapsed: Duration,
}

impl TemplateBatchSummary {
    pub fn from_outcomes(outcomes: &[TemplateUploadOutcome]) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            ..Self::default()
        };
        for outcome in outcomes {
            summary.elapsed += outcome.elapsed;
            match (&outcome.remote_template_id, outcome.success) {
                (Some(id), true) => {
                    summary.succeeded += 1;
                    summary
                        .template_ids
                        .insert(outcome.template_name.clone(), id.clone());
                }
                _ => {
                    summary.failed += 1;
                    summary.errors.push(format!(
                        "{}: {}",
                        outcome.template_name,
                        outcome.error.as_deref().unwrap_or("unknown error")
                    ));
                }
            }
        }
        summary
    }
}

// Mailchimp API Request/Response models
#[derive(Debug, Serialize)]
pub struct FileUploadRequest<'a> {
    pub name: &'a str,
    pub file_data: String,
    #[serde(rename = "type")]
    pub file_type: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct FileUploadResponse {
    pub full_size_url: String,
}

#[derive(Debug, Serialize)]
pub struct TemplateRequest<'a> {
    pub name: &'a str,
    pub html: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct TemplateResponse {
    pub id: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MailchimpErrorBody {
    pub title: Option<String>,
    pub detail: Option<String>,
    pub errors: Option<serde_json::Value>,
}

// Configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub server_prefix: Option<String>,
    pub concurrency: usize,
    pub max_attempts: usize,
    pub upload_timeout: Duration,
    pub initial_backoff: Duration,
    pub image_cache_file: PathBuf,
    pub template_cache_file: PathBuf,
    pub compressed_dir: PathBuf,
    pub dry_run: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(e) if e.not_found() => {}
            Err(e) => return Err(e.into()),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let dry_run = lookup("DRY_RUN")
            .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let api_key = lookup("MAILCHIMP_API_KEY").filter(|v| !v.trim().is_empty());
        let server_prefix = lookup("MAILCHIMP_SERVER_PREFIX").filter(|v| !v.trim().is_empty());

        if !dry_run && (api_key.is_none() || server_prefix.is_none()) {
            return Err(Error::Config(
                "MAILCHIMP_API_KEY and MAILCHIMP_SERVER_PREFIX must be set".to_string(),
            ));
        }

        let parse_number = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| Error::Config(format!("{} must be a number, got '{}'", key, raw))),
                None => Ok(default),
            }
        };

        Ok(Self {
            api_key,
            server_prefix,
            concurrency: parse_number("UPLOAD_CONCURRENCY", 5)?.max(1) as usize,
            max_attempts: parse_number("UPLOAD_MAX_ATTEMPTS", 3)?.max(1) as usize,
            upload_timeout: Duration::from_secs(parse_number("UPLOAD_TIMEOUT_SECS", 30)?),
            initial_backoff: Duration::from_millis(parse_number("UPLOAD_BACKOFF_MS", 1000)?),
            image_cache_file: lookup("IMAGE_CACHE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("image_upload_cache.json")),
            template_cache_file: lookup("TEMPLATE_CACHE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("template_upload_cache.json")),
            compressed_dir: lookup("COMPRESSED_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("newsletter-uploader")),
            dry_run,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn descriptor(path: &str, bytes: &[u8], reference: Option<&str>) -> AssetDescriptor {
        AssetDescriptor {
            source_path: PathBuf::from(path),
            usage_context: UsageContext::Inline,
            priority: Priority::Normal,
            fingerprint: Fingerprint::of_bytes(bytes),
            original_reference: reference.map(str::to_string),
        }
    }

    #[test]
    fn test_priority_orders_critical_first() {
        let mut priorities = vec![
            Priority::Optional,
            Priority::Normal,
            Priority::Critical,
            Priority::Important,
        ];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![
                Priority::Critical,
                Priority::Important,
                Priority::Normal,
                Priority::Optional
            ]
        );
    }

    #[test]
    fn test_priority_serialization() {
        let json = serde_json::to_string(&Priority::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
        let usage: UsageContext = serde_json::from_str("\"footer\"").unwrap();
        assert_eq!(usage, UsageContext::Footer);
    }

    #[test]
    fn test_fingerprint_is_content_based() {
        assert_eq!(Fingerprint::of_bytes(b"abc"), Fingerprint::of_bytes(b"abc"));
        assert_ne!(Fingerprint::of_bytes(b"abc"), Fingerprint::of_bytes(b"abd"));
        assert_eq!(Fingerprint::of_bytes(b"abc").as_str().len(), 64);
    }

    #[test]
    fn test_descriptor_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.png");
        assert!(AssetDescriptor::new(&missing, UsageContext::Hero, Priority::Critical, None).is_err());

        let present = dir.path().join("logo.png");
        std::fs::write(&present, b"logo-bytes").unwrap();
        let asset =
            AssetDescriptor::new(&present, UsageContext::Footer, Priority::Optional, None).unwrap();
        assert_eq!(asset.fingerprint, Fingerprint::of_bytes(b"logo-bytes"));
        assert_eq!(asset.display_name(), "logo.png");
    }

    #[test]
    fn test_summary_maps_paths_references_and_aliases() {
        let hero = descriptor("/abs/hero.jpg", b"hero", Some("images/hero.jpg"));
        let alias = descriptor("/abs/copy-of-hero.jpg", b"hero", Some("images/copy.jpg"));
        let broken = descriptor("/abs/broken.jpg", b"broken", None);

        let outcomes = vec![
            UploadOutcome::uploaded(
                hero,
                "https://mcusercontent.com/hero.jpg".to_string(),
                Duration::from_millis(5),
                1200,
            ),
            UploadOutcome::failed(broken, "boom".to_string(), Duration::from_millis(1)),
        ];

        let summary = BatchSummary::from_outcomes(&outcomes, &[alias], Duration::from_secs(1));

        assert!(summary.is_consistent());
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.total_bytes, 1200);
        assert_eq!(summary.errors, vec!["broken.jpg: boom".to_string()]);

        let expected: HashMap<&str, &str> = [
            "/abs/hero.jpg",
            "images/hero.jpg",
            "/abs/copy-of-hero.jpg",
            "images/copy.jpg",
        ]
        .into_iter()
        .map(|key| (key, "https://mcusercontent.com/hero.jpg"))
        .collect();
        for (key, url) in expected {
            assert_eq!(summary.url_for(key), Some(url));
        }
        assert_eq!(summary.url_for("/abs/broken.jpg"), None);
    }

    #[test]
    fn test_template_batch_summary() {
        let outcomes = vec![
            TemplateUploadOutcome {
                template_name: "France_fr_fr-FR_20260101_120000".to_string(),
                success: true,
                remote_template_id: Some("101".to_string()),
                error: None,
                elapsed: Duration::from_millis(10),
                html_size_bytes: 300,
            },
            TemplateUploadOutcome {
                template_name: "Egypt_ar_ar-EG_20260101_120000".to_string(),
                success: false,
                remote_template_id: None,
                error: Some("Validation error: HTML content is empty".to_string()),
                elapsed: Duration::ZERO,
                html_size_bytes: 0,
            },
        ];

        let summary = TemplateBatchSummary::from_outcomes(&outcomes);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            summary.template_ids.get("France_fr_fr-FR_20260101_120000"),
            Some(&"101".to_string())
        );
        assert_eq!(summary.errors.len(), 1);
    }

    #[test]
    fn test_config_requires_credentials_unless_dry_run() {
        let err = Config::from_lookup(|_| None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let config = Config::from_lookup(|key| match key {
            "DRY_RUN" => Some("true".to_string()),
            _ => None,
        })
        .unwrap();
        assert!(config.dry_run);
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.upload_timeout, Duration::from_secs(30));
        assert_eq!(config.image_cache_file, PathBuf::from("image_upload_cache.json"));
    }

    #[test]
    fn test_config_reads_overrides() {
        let config = Config::from_lookup(|key| {
            let value = match key {
                "MAILCHIMP_API_KEY" => "key-us21",
                "MAILCHIMP_SERVER_PREFIX" => "us21",
                "UPLOAD_CONCURRENCY" => "0",
                "UPLOAD_MAX_ATTEMPTS" => "4",
                "UPLOAD_BACKOFF_MS" => "10",
                _ => return None,
            };
            Some(value.to_string())
        })
        .unwrap();

        assert_eq!(config.server_prefix.as_deref(), Some("us21"));
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.initial_backoff, Duration::from_millis(10));
    }

    #[test]
    fn test_config_rejects_non_numeric() {
        let err = Config::from_lookup(|key| match key {
            "DRY_RUN" => Some("1".to_string()),
            "UPLOAD_CONCURRENCY" => Some("many".to_string()),
            _ => None,
        })
        .unwrap_err();
        assert!(err.to_string().contains("UPLOAD_CONCURRENCY"));
    }
}
