//! Per-batch accounting used for log lines and snapshots.
//!
//! The orchestrator owns one [`ProgressTracker`] per `process` call. Workers
//! never touch it; their status events arrive through the result channel.

use crate::models::AssetDescriptor;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct ProgressTracker {
    total: usize,
    completed: usize,
    cached: usize,
    failed: usize,
    skipped: usize,
    in_flight: BTreeMap<String, String>,
    started: Instant,
}

/// Point-in-time view of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub cached: usize,
    pub failed: usize,
    pub skipped: usize,
    pub percent_done: f64,
    pub elapsed_secs: f64,
    /// Source path -> current status, for assets not yet finished.
    pub in_flight: BTreeMap<String, String>,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            cached: 0,
            failed: 0,
            skipped: 0,
            in_flight: BTreeMap::new(),
            started: Instant::now(),
        }
    }

    fn key(asset: &AssetDescriptor) -> String {
        asset.source_path.to_string_lossy().into_owned()
    }

    pub fn update_status(&mut self, asset: &AssetDescriptor, status: impl Into<String>) {
        let status = status.into();
        debug!("[{}] {}", asset.display_name(), status);
        self.in_flight.insert(Self::key(asset), status);
    }

    pub fn mark_complete(&mut self, asset: &AssetDescriptor, from_cache: bool) {
        self.in_flight.remove(&Self::key(asset));
        if from_cache {
            self.cached += 1;
            info!(
                "[{}] Resolved from cache ({})",
                asset.display_name(),
                self.position()
            );
        } else {
            self.completed += 1;
            info!("[{}] Uploaded ({})", asset.display_name(), self.position());
        }
    }

    pub fn mark_failed(&mut self, asset: &AssetDescriptor, error: &str) {
        self.in_flight.remove(&Self::key(asset));
        self.failed += 1;
        warn!(
            "[{}] Failed: {} ({})",
            asset.display_name(),
            error,
            self.position()
        );
    }

    pub fn mark_skipped(&mut self, asset: &AssetDescriptor, reason: &str) {
        self.in_flight.remove(&Self::key(asset));
        self.skipped += 1;
        warn!(
            "[{}] Skipped: {} ({})",
            asset.display_name(),
            reason,
            self.position()
        );
    }

    pub fn finished(&self) -> usize {
        self.completed + self.cached + self.failed + self.skipped
    }

    fn position(&self) -> String {
        format!("{}/{}", self.finished(), self.total)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let percent_done = if self.total == 0 {
            100.0
        } else {
            self.finished() as f64 * 100.0 / self.total as f64
        };
        ProgressSnapshot {
            total: self.total,
            completed: self.completed,
            cached: self.cached,
            failed: self.failed,
            skipped: self.skipped,
            percent_done,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            in_flight: self.in_flight.clone(),
        }
    }

    pub fn log_summary(&self) {
        info!(
            "Batch finished in {:.1}s: {} uploaded, {} cached, {} failed, {} skipped (of {})",
            self.started.elapsed().as_secs_f32(),
            self.completed,
            self.cached,
            self.failed,
            self.skipped,
            self.total
        );
        if !self.in_flight.is_empty() {
            warn!(
                "{} assets never reported a final state: {:?}",
                self.in_flight.len(),
                self.in_flight.keys().collect::<Vec<_>>()
            );
        }
    }
}
