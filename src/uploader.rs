//! Batch image upload orchestration.
//!
//! [`BatchUploader::process`] runs four phases in order: drop missing files,
//! deduplicate and resolve from cache or compress, upload through a fixed
//! pool of workers, then fold everything into a [`BatchSummary`].

use crate::cache::ContentCache;
use crate::image::{detect_image_mime, CompressionService};
use crate::mailchimp::MailchimpService;
use crate::models::{
    AssetDescriptor, AssetRequest, BatchSummary, Config, Fingerprint, OutcomeStatus, Priority,
    UploadOutcome,
};
use crate::progress::ProgressTracker;
use crate::retry::RetryPolicy;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct UploadSettings {
    pub max_concurrent_uploads: usize,
    pub retry: RetryPolicy,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: 5,
            retry: RetryPolicy::default(),
        }
    }
}

impl UploadSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent_uploads: config.concurrency.max(1),
            retry: RetryPolicy::new(
                config.max_attempts,
                config.initial_backoff,
                config.upload_timeout,
            ),
        }
    }
}

/// A compressed, cache-miss asset waiting for a worker.
struct UploadJob {
    asset: AssetDescriptor,
    upload_path: PathBuf,
}

enum WorkerEvent {
    Status {
        asset: AssetDescriptor,
        status: String,
    },
    Finished(UploadOutcome),
}

pub struct BatchUploader {
    mailchimp: Arc<dyn MailchimpService>,
    compressor: Arc<dyn CompressionService>,
    cache: Arc<ContentCache>,
    settings: UploadSettings,
}

impl BatchUploader {
    pub fn new(
        mailchimp: Arc<dyn MailchimpService>,
        compressor: Arc<dyn CompressionService>,
        cache: Arc<ContentCache>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            mailchimp,
            compressor,
            cache,
            settings,
        }
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Builds descriptors from caller requests, dropping any whose file is
    /// missing or unreadable.
    pub fn prepare_assets(&self, requests: &[AssetRequest]) -> Vec<AssetDescriptor> {
        requests
            .iter()
            .filter_map(|request| {
                if !request.path.exists() {
                    warn!("Image not found, skipping: {}", request.path.display());
                    return None;
                }
                match AssetDescriptor::from_request(request) {
                    Ok(asset) => Some(asset),
                    Err(e) => {
                        warn!("Could not read {}, skipping: {}", request.path.display(), e);
                        None
                    }
                }
            })
            .collect()
    }

    /// Uploads a batch. Per-asset failures end up in the summary; the only
    /// error returned is a critical-priority asset that cannot be brought
    /// under the size limit, in which case nothing is uploaded.
    pub async fn process(&self, assets: Vec<AssetDescriptor>) -> Result<BatchSummary> {
        let started = Instant::now();

        let assets = normalize(assets);
        let (representatives, aliases) = deduplicate(assets);
        info!(
            "Processing {} unique images ({} duplicates collapsed)",
            representatives.len(),
            aliases.len()
        );

        let mut tracker = ProgressTracker::new(representatives.len());
        let mut outcomes = Vec::with_capacity(representatives.len());
        let mut jobs = Vec::new();

        for asset in representatives {
            if let Some(hosted_url) = self.cache.lookup(&asset.fingerprint) {
                tracker.mark_complete(&asset, true);
                outcomes.push(UploadOutcome::cached(asset, hosted_url));
                continue;
            }

            tracker.update_status(&asset, "compressing");
            match self.compressor.ensure_under_limit(&asset.source_path).await {
                Ok(upload_path) => {
                    tracker.update_status(&asset, "queued");
                    jobs.push(UploadJob { asset, upload_path });
                }
                Err(e) if e.is_critical() && asset.priority == Priority::Critical => {
                    error!(
                        "[{}] Critical image cannot be compressed, aborting batch: {}",
                        asset.display_name(),
                        e
                    );
                    for job in jobs {
                        discard_compressed(&job.asset.source_path, &job.upload_path).await;
                    }
                    return Err(e);
                }
                Err(e) => {
                    let reason = e.to_string();
                    tracker.mark_skipped(&asset, &reason);
                    outcomes.push(UploadOutcome::skipped(asset, reason));
                }
            }
        }

        outcomes.extend(self.upload_all(jobs, &mut tracker).await);
        tracker.log_summary();

        let summary = BatchSummary::from_outcomes(&outcomes, &aliases, started.elapsed());
        if !summary.is_consistent() {
            return Err(Error::Invariant(format!(
                "summary counts do not add up: {} + {} + {} + {} != {}",
                summary.succeeded, summary.cached_hits, summary.failed, summary.skipped, summary.total
            )));
        }
        Ok(summary)
    }

    async fn upload_all(
        &self,
        jobs: Vec<UploadJob>,
        tracker: &mut ProgressTracker,
    ) -> Vec<UploadOutcome> {
        if jobs.is_empty() {
            return Vec::new();
        }

        let worker_count = self.settings.max_concurrent_uploads.max(1).min(jobs.len());
        debug!("Dispatching {} uploads to {} workers", jobs.len(), worker_count);

        let mut pending: BTreeMap<Fingerprint, AssetDescriptor> = jobs
            .iter()
            .map(|job| (job.asset.fingerprint.clone(), job.asset.clone()))
            .collect();

        let (job_tx, job_rx) = mpsc::channel::<UploadJob>(jobs.len());
        for job in jobs {
            if job_tx.send(job).await.is_err() {
                break;
            }
        }
        drop(job_tx);

        let job_rx = Arc::new(Mutex::new(job_rx));
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<WorkerEvent>();

        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let worker = UploadWorker {
                id,
                mailchimp: Arc::clone(&self.mailchimp),
                compressor: Arc::clone(&self.compressor),
                cache: Arc::clone(&self.cache),
                retry: self.settings.retry,
            };
            let jobs = Arc::clone(&job_rx);
            let events = event_tx.clone();
            workers.push(tokio::spawn(worker.run(jobs, events)));
        }
        drop(event_tx);

        let mut outcomes = Vec::with_capacity(pending.len());
        while let Some(event) = event_rx.recv().await {
            match event {
                WorkerEvent::Status { asset, status } => tracker.update_status(&asset, status),
                WorkerEvent::Finished(outcome) => {
                    pending.remove(&outcome.asset.fingerprint);
                    match &outcome.status {
                        OutcomeStatus::Failed { error } => tracker.mark_failed(&outcome.asset, error),
                        _ => tracker.mark_complete(&outcome.asset, false),
                    }
                    outcomes.push(outcome);
                }
            }
        }

        for handle in workers {
            if let Err(e) = handle.await {
                error!("Upload worker terminated abnormally: {}", e);
            }
        }

        for (_, asset) in pending {
            let message = "upload worker stopped before reporting a result".to_string();
            tracker.mark_failed(&asset, &message);
            outcomes.push(UploadOutcome::failed(asset, message, Duration::ZERO));
        }

        outcomes
    }
}

struct UploadWorker {
    id: usize,
    mailchimp: Arc<dyn MailchimpService>,
    compressor: Arc<dyn CompressionService>,
    cache: Arc<ContentCache>,
    retry: RetryPolicy,
}

impl UploadWorker {
    async fn run(
        self,
        jobs: Arc<Mutex<mpsc::Receiver<UploadJob>>>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) {
        loop {
            let job = jobs.lock().await.recv().await;
            let job = match job {
                Some(job) => job,
                None => break,
            };
            let outcome = self.upload(job, &events).await;
            if events.send(WorkerEvent::Finished(outcome)).is_err() {
                break;
            }
        }
        debug!("Upload worker {} finished", self.id);
    }

    async fn upload(
        &self,
        job: UploadJob,
        events: &mpsc::UnboundedSender<WorkerEvent>,
    ) -> UploadOutcome {
        let UploadJob { asset, upload_path } = job;
        let source = asset.source_path.clone();
        let outcome = self.send(asset, &upload_path, events).await;
        discard_compressed(&source, &upload_path).await;
        outcome
    }

    async fn send(
        &self,
        asset: AssetDescriptor,
        upload_path: &Path,
        events: &mpsc::UnboundedSender<WorkerEvent>,
    ) -> UploadOutcome {
        let started = Instant::now();
        let label = asset.display_name();

        let size = match self.compressor.validate_under_limit(upload_path) {
            Ok(size) => size,
            Err(e) => return UploadOutcome::failed(asset, e.to_string(), started.elapsed()),
        };
        let data = match tokio::fs::read(upload_path).await {
            Ok(data) => data,
            Err(e) => {
                let message = format!("Failed to read {}: {}", upload_path.display(), e);
                return UploadOutcome::failed(asset, message, started.elapsed());
            }
        };

        let name = upload_name(&asset.source_path, upload_path);
        debug!(
            "[{}] Uploading {} bytes as {} ({}) on worker {}",
            label,
            size,
            name,
            detect_image_mime(&data).unwrap_or("unknown type"),
            self.id
        );

        let mailchimp = &self.mailchimp;
        let max_attempts = self.retry.max_attempts;
        let (asset_ref, name_ref, data_ref) = (&asset, name.as_str(), data.as_slice());
        let result = self
            .retry
            .run(&label, move |attempt| {
                let _ = events.send(WorkerEvent::Status {
                    asset: asset_ref.clone(),
                    status: format!("uploading (attempt {}/{})", attempt, max_attempts),
                });
                mailchimp.upload_image(name_ref, data_ref)
            })
            .await;

        match result {
            Ok(hosted_url) => {
                if let Err(e) = self.cache.record(&asset.fingerprint, &hosted_url) {
                    warn!("[{}] Uploaded but cache entry was not saved: {}", label, e);
                }
                UploadOutcome::uploaded(asset, hosted_url, started.elapsed(), size)
            }
            Err(e) => UploadOutcome::failed(asset, e.to_string(), started.elapsed()),
        }
    }
}

/// Removes a compressor output once it has been sent or given up on. A
/// source file passed through unchanged is left alone.
async fn discard_compressed(source: &Path, upload_path: &Path) {
    if upload_path == source {
        return;
    }
    if let Err(e) = tokio::fs::remove_file(upload_path).await {
        warn!(
            "Could not remove compressed file {}: {}",
            upload_path.display(),
            e
        );
    }
}

fn normalize(assets: Vec<AssetDescriptor>) -> Vec<AssetDescriptor> {
    assets
        .into_iter()
        .filter(|asset| {
            let exists = asset.source_path.exists();
            if !exists {
                warn!("Image not found, skipping: {}", asset.source_path.display());
            }
            exists
        })
        .collect()
}

/// Sorts critical-first (stable) and splits off descriptors whose
/// fingerprint was already seen. The first, highest-priority descriptor of
/// each fingerprint is the one uploaded.
fn deduplicate(mut assets: Vec<AssetDescriptor>) -> (Vec<AssetDescriptor>, Vec<AssetDescriptor>) {
    assets.sort_by_key(|asset| asset.priority);

    let mut seen = HashSet::new();
    let mut representatives = Vec::new();
    let mut aliases = Vec::new();
    for asset in assets {
        if seen.insert(asset.fingerprint.clone()) {
            representatives.push(asset);
        } else {
            debug!(
                "[{}] Same content as an earlier image, reusing its upload",
                asset.display_name()
            );
            aliases.push(asset);
        }
    }
    (representatives, aliases)
}

/// Source stem plus the extension of the file actually sent.
fn upload_name(source: &Path, uploaded: &Path) -> String {
    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    match uploaded.extension() {
        Some(ext) => format!("{}.{}", stem, ext.to_string_lossy()),
        None => stem,
    }
}
