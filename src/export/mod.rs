// src/export/mod.rs
//! Turning snapshots into file_sd target files
//!
//! Every cycle recomputes all files from the full snapshot, so a failed
//! write is simply retried by the next cycle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::certspotter::Issuance;
use crate::discovery::aggregate::Snapshot;
use crate::discovery::shutdown_requested;
use crate::metrics::MetricsSink;

pub mod filter;
pub mod router;
pub mod target;
pub mod writer;

pub use filter::FilterPolicy;
pub use router::{route, FileRoute};
pub use target::Target;
pub use writer::{write_targets, ExportError};

/// Outcome of one export cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub targets: usize,
    pub files_written: usize,
    pub files_failed: usize,
}

/// Filter, build and write targets for every configured file
pub struct Exporter {
    routes: Vec<FileRoute>,
    policy: FilterPolicy,
    metrics: Arc<dyn MetricsSink>,
}

impl Exporter {
    pub fn new(routes: Vec<FileRoute>, policy: FilterPolicy, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            routes,
            policy,
            metrics,
        }
    }

    /// Targets for every issuance the filter policy accepts at `now`
    pub fn targets(&self, issuances: &[Issuance], now: DateTime<Utc>) -> Vec<Target> {
        self.policy
            .apply(issuances, now)
            .into_iter()
            .map(Target::from_issuance)
            .collect()
    }

    /// Run one export cycle evaluated at `now`.
    ///
    /// Write failures are logged per file and do not stop the other files.
    pub async fn export_at(&self, issuances: &[Issuance], now: DateTime<Utc>) -> ExportReport {
        let targets = self.targets(issuances, now);
        debug!(
            "Got {} targets from {} issuances",
            targets.len(),
            issuances.len()
        );
        self.metrics.targets_discovered(targets.len());

        let mut report = ExportReport {
            targets: targets.len(),
            ..Default::default()
        };

        for (path, file_targets) in route(&targets, &self.routes) {
            debug!("Writing {} targets to {:?}", file_targets.len(), path);

            match write_targets(&path, &file_targets).await {
                Ok(()) => {
                    // A failed write keeps the gauge at the last written count
                    report.files_written += 1;
                    self.metrics
                        .targets_written(&path.to_string_lossy(), file_targets.len());
                }
                Err(e) => {
                    report.files_failed += 1;
                    error!("Error writing targets to {:?}: {}", path, e);
                }
            }
        }

        report
    }

    pub async fn export(&self, issuances: &[Issuance]) -> ExportReport {
        self.export_at(issuances, Utc::now()).await
    }

    /// Export every snapshot published by the aggregator.
    ///
    /// Snapshots arriving while a cycle runs collapse into the latest one.
    /// Stops when the aggregator closes its channel or on shutdown.
    pub async fn run(
        &self,
        mut snapshots: watch::Receiver<Snapshot>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!("Exporting targets to {} files", self.routes.len());

        loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        debug!("Snapshot channel closed");
                        break;
                    }
                }
                _ = shutdown_requested(&mut shutdown_rx) => break,
            }

            let snapshot = snapshots.borrow_and_update().clone();
            let report = self.export(&snapshot).await;
            debug!(
                "Export cycle finished: {} targets, {} files written, {} failed",
                report.targets, report.files_written, report.files_failed
            );
        }

        info!("Exporter stopped");
    }
}
