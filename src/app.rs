//! Application orchestration for one newsletter upload run.

use crate::cache::{ContentCache, TemplateCache};
use crate::image::{CompressionService, ImageCompressor};
use crate::mailchimp::{MailchimpClient, MailchimpService, MockMailchimpClient};
use crate::models::{
    AssetRequest, BatchSummary, Config, Document, TemplateBatchSummary, TemplateUploadOutcome,
};
use crate::templates::TemplateUploader;
use crate::uploader::{BatchUploader, UploadSettings};
use crate::{Error, Result};
use chrono::Local;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Everything a run produced: per-image results and per-document results.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub images: BatchSummary,
    pub templates: Vec<TemplateUploadOutcome>,
}

impl PipelineReport {
    pub fn template_summary(&self) -> TemplateBatchSummary {
        TemplateBatchSummary::from_outcomes(&self.templates)
    }
}

/// Runs image uploads and then template uploads against one account.
pub struct App {
    uploader: BatchUploader,
    templates: TemplateUploader,
    run_dir: Option<PathBuf>,
}

/// Injectable service bundle used to construct [`App`] in tests/harnesses.
pub struct AppServices {
    pub mailchimp: Arc<dyn MailchimpService>,
    pub compressor: Arc<dyn CompressionService>,
    pub content_cache: Arc<ContentCache>,
    pub template_cache: TemplateCache,
}

impl App {
    /// Build an app from concrete service dependencies.
    pub fn with_services(services: AppServices, settings: UploadSettings) -> Self {
        let templates = TemplateUploader::new(
            Arc::clone(&services.mailchimp),
            services.template_cache,
            settings.retry,
        );
        let uploader = BatchUploader::new(
            services.mailchimp,
            services.compressor,
            services.content_cache,
            settings,
        );
        Self {
            uploader,
            templates,
            run_dir: None,
        }
    }

    /// Construct an app from environment-derived configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let mailchimp: Arc<dyn MailchimpService> = if config.dry_run {
            info!("DRY_RUN enabled, uploads go to an in-memory mock");
            Arc::new(MockMailchimpClient::new())
        } else {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| Error::Config("MAILCHIMP_API_KEY is not set".to_string()))?;
            let server_prefix = config
                .server_prefix
                .as_deref()
                .ok_or_else(|| Error::Config("MAILCHIMP_SERVER_PREFIX is not set".to_string()))?;
            info!("Uploading to Mailchimp server {}", server_prefix);
            Arc::new(MailchimpClient::new(
                api_key,
                server_prefix,
                config.upload_timeout,
            )?)
        };

        let date = Local::now().format("%Y-%m-%d").to_string();
        let run_dir = config
            .compressed_dir
            .join(format!("{}_{}", date, Uuid::new_v4()));
        let compressor = ImageCompressor::new(&run_dir)?;
        info!("Compressed images will be written to {}", run_dir.display());

        let content_cache = Arc::new(ContentCache::open(&config.image_cache_file));
        info!(
            "Loaded {} cached image URLs from {}",
            content_cache.len(),
            config.image_cache_file.display()
        );

        let mut app = Self::with_services(
            AppServices {
                mailchimp,
                compressor: Arc::new(compressor),
                content_cache,
                template_cache: TemplateCache::open(&config.template_cache_file),
            },
            UploadSettings::from_config(config),
        );
        app.run_dir = Some(run_dir);
        Ok(app)
    }

    /// Uploads the images, then the documents with image references
    /// rewritten to the hosted URLs. Only a critical image that cannot be
    /// compressed aborts the run; in that case no template is uploaded.
    pub async fn run(
        &mut self,
        images: &[AssetRequest],
        documents: &[Document],
    ) -> Result<PipelineReport> {
        info!(
            "Starting run: {} images, {} documents",
            images.len(),
            documents.len()
        );

        let assets = self.uploader.prepare_assets(images);
        let processed = self.uploader.process(assets).await;
        self.remove_run_dir();
        let summary = match processed {
            Ok(summary) => summary,
            Err(e) => {
                error!("Image upload aborted: {}", e);
                return Err(e);
            }
        };
        info!(
            "Images: {} uploaded, {} cached, {} failed, {} skipped",
            summary.succeeded, summary.cached_hits, summary.failed, summary.skipped
        );

        let templates = self
            .templates
            .upload_documents(documents, &summary.url_mapping)
            .await;

        Ok(PipelineReport {
            images: summary,
            templates,
        })
    }

    /// Drops this run's compression directory once the image stage is over.
    /// Only an empty directory is removed.
    fn remove_run_dir(&self) {
        let Some(run_dir) = &self.run_dir else {
            return;
        };
        match std::fs::remove_dir(run_dir) {
            Ok(()) => debug!("Removed {}", run_dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!("Kept {}: {}", run_dir.display(), e),
        }
    }

    pub fn content_cache(&self) -> &ContentCache {
        self.uploader.cache()
    }

    pub fn template_cache(&self) -> &TemplateCache {
        self.templates.cache()
    }
}

/// Empties both on-disk caches. Returns how many image and template
/// entries were removed.
pub fn clear_caches(config: &Config) -> Result<(usize, usize)> {
    let images = ContentCache::open(&config.image_cache_file).clear()?;
    let templates = TemplateCache::open(&config.template_cache_file).clear()?;
    info!(
        "Cleared {} image entries and {} template entries",
        images, templates
    );
    Ok((images, templates))
}
