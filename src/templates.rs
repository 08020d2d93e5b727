//! Template upload stage.
//!
//! Rewrites local image references to hosted URLs, validates each document
//! and uploads them one at a time. Uploads are sequential: the template API
//! does not tolerate concurrent writes on one account, and callers rely on
//! results coming back in document order.

use crate::cache::TemplateCache;
use crate::mailchimp::MailchimpService;
use crate::models::{Document, TemplateUploadOutcome};
use crate::retry::RetryPolicy;
use crate::{Error, Result};
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub const MAX_HTML_BYTES: usize = 10 * 1024 * 1024;

/// Host that hosted images are served from. Its absence is only a warning.
pub const EXPECTED_IMAGE_HOST: &str = "mcusercontent.com";

/// `{Country}_{lang}_{locale}_{YYYYMMDD_HHMMSS}`, with spaces and dashes in
/// the country replaced by underscores.
pub fn template_name(
    country: &str,
    language_code: &str,
    locale: &str,
    timestamp: DateTime<Local>,
) -> String {
    format!(
        "{}_{}_{}_{}",
        country.replace([' ', '-'], "_"),
        language_code,
        locale,
        timestamp.format("%Y%m%d_%H%M%S")
    )
}

/// Replaces image references with hosted URLs. Inline `data:image/` URIs
/// are replaced wherever they occur; everything else only inside `src`
/// attributes, so text that merely mentions a path is left alone.
pub fn rewrite_image_urls(html: &str, url_mapping: &BTreeMap<String, String>) -> String {
    let mut rewritten = html.to_string();
    for (reference, hosted_url) in url_mapping {
        if reference.is_empty() {
            continue;
        }
        if reference.starts_with("data:image/") {
            rewritten = rewritten.replace(reference.as_str(), hosted_url);
            continue;
        }
        for quote in ['"', '\''] {
            let from = format!("src={quote}{reference}{quote}");
            if rewritten.contains(&from) {
                let to = format!("src={quote}{hosted_url}{quote}");
                rewritten = rewritten.replace(&from, &to);
            }
        }
    }
    rewritten
}

pub fn validate_html(html: &str, max_bytes: usize) -> Result<()> {
    if html.trim().is_empty() {
        return Err(Error::Validation("HTML content is empty".to_string()));
    }
    if html.len() > max_bytes {
        return Err(Error::Validation(format!(
            "HTML content too large: {} bytes (max {})",
            html.len(),
            max_bytes
        )));
    }

    let lowered = html.to_ascii_lowercase();
    if !lowered.contains("<html") {
        return Err(Error::Validation(
            "HTML content missing <html> tag".to_string(),
        ));
    }
    if !lowered.contains("<body") {
        return Err(Error::Validation(
            "HTML content missing <body> tag".to_string(),
        ));
    }
    Ok(())
}

pub struct TemplateUploader {
    mailchimp: Arc<dyn MailchimpService>,
    cache: TemplateCache,
    retry: RetryPolicy,
    max_html_bytes: usize,
}

impl TemplateUploader {
    pub fn new(mailchimp: Arc<dyn MailchimpService>, cache: TemplateCache, retry: RetryPolicy) -> Self {
        Self {
            mailchimp,
            cache,
            retry,
            max_html_bytes: MAX_HTML_BYTES,
        }
    }

    pub fn with_max_html_bytes(mut self, max_html_bytes: usize) -> Self {
        self.max_html_bytes = max_html_bytes;
        self
    }

    pub fn cache(&self) -> &TemplateCache {
        &self.cache
    }

    /// Uploads every document in order and returns one outcome per document.
    /// The bookkeeping cache is written once at the end.
    pub async fn upload_documents(
        &mut self,
        documents: &[Document],
        url_mapping: &BTreeMap<String, String>,
    ) -> Vec<TemplateUploadOutcome> {
        if documents.is_empty() {
            warn!("No documents provided for template upload");
            return Vec::new();
        }

        info!("Uploading {} templates", documents.len());
        let started = Instant::now();

        let mut outcomes = Vec::with_capacity(documents.len());
        for document in documents {
            let html = rewrite_image_urls(&document.html, url_mapping);
            let outcome = self.upload_one(&document.name, &html).await;
            if let Some(id) = &outcome.remote_template_id {
                self.cache.record(&document.name, id, &html);
            }
            outcomes.push(outcome);
        }

        if let Err(e) = self.cache.save() {
            warn!(
                "Could not save template cache {}: {}",
                self.cache.path().display(),
                e
            );
        }

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        info!(
            "Template upload finished in {:.2}s: {}/{} succeeded",
            started.elapsed().as_secs_f32(),
            succeeded,
            documents.len()
        );
        outcomes
    }

    async fn upload_one(&self, name: &str, html: &str) -> TemplateUploadOutcome {
        let started = Instant::now();
        let failed = |error: String, started: Instant| TemplateUploadOutcome {
            template_name: name.to_string(),
            success: false,
            remote_template_id: None,
            error: Some(error),
            elapsed: started.elapsed(),
            html_size_bytes: html.len(),
        };

        if let Err(e) = validate_html(html, self.max_html_bytes) {
            error!("[{}] {}", name, e);
            return failed(e.to_string(), started);
        }
        if !html.contains(EXPECTED_IMAGE_HOST) {
            warn!("[{}] No {} image URLs found", name, EXPECTED_IMAGE_HOST);
        }

        info!("[{}] Uploading template ({} bytes)", name, html.len());
        let mailchimp = &self.mailchimp;
        let result = self
            .retry
            .run(name, move |_| mailchimp.upload_template(name, html))
            .await;

        match result {
            Ok(id) => {
                info!("[{}] Template uploaded (ID: {})", name, id);
                TemplateUploadOutcome {
                    template_name: name.to_string(),
                    success: true,
                    remote_template_id: Some(id),
                    error: None,
                    elapsed: started.elapsed(),
                    html_size_bytes: html.len(),
                }
            }
            Err(e) => {
                error!("[{}] Template upload failed: {}", name, e);
                failed(e.to_string(), started)
            }
        }
    }
}
