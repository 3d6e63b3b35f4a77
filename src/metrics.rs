//! Prometheus metrics for certspotter-sd
//!
//! Components receive an `Arc<dyn MetricsSink>` instead of touching
//! process-wide statics, so the pipeline runs in tests without a registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::discovery::shutdown_requested;

/// Domain label value used when metrics are not domain-scoped
const ALL_DOMAINS: &str = "all";

/// Receiver for counters and gauges emitted by the discovery pipeline
pub trait MetricsSink: Send + Sync {
    /// One upstream API response was received
    fn api_request(&self, endpoint: &str, method: &str, status: u16);

    /// A sweep for `domain` returned `count` issuances
    fn issuances_discovered(&self, domain: &str, count: usize);

    /// Number of targets built from the latest snapshot
    fn targets_discovered(&self, count: usize);

    /// Number of targets written to `filename` in the latest export
    fn targets_written(&self, filename: &str, count: usize);
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn api_request(&self, _endpoint: &str, _method: &str, _status: u16) {}
    fn issuances_discovered(&self, _domain: &str, _count: usize) {}
    fn targets_discovered(&self, _count: usize) {}
    fn targets_written(&self, _filename: &str, _count: usize) {}
}

/// Prometheus-backed sink with its own registry
pub struct PrometheusMetrics {
    registry: Registry,
    api_requests: IntCounterVec,
    issuances_discovered: IntCounterVec,
    targets_discovered: IntGauge,
    targets_written: IntGaugeVec,
    domain_labels: bool,
}

impl PrometheusMetrics {
    /// Create and register all metrics.
    ///
    /// With `domain_labels = false` every issuance counter is recorded
    /// under the single domain value `all`.
    pub fn new(domain_labels: bool) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let api_requests = IntCounterVec::new(
            Opts::new("certspotter_api_requests_total", "The total number of api requests"),
            &["endpoint", "method", "status"],
        )?;
        let issuances_discovered = IntCounterVec::new(
            Opts::new(
                "certspotter_issuances_discovered_total",
                "The total number of issuances discovered",
            ),
            &["domain"],
        )?;
        let targets_discovered = IntGauge::new(
            "certspotter_targets_discovered",
            "The current number of targets from issuances",
        )?;
        let targets_written = IntGaugeVec::new(
            Opts::new(
                "certspotter_targets_written",
                "The current number of targets written to file",
            ),
            &["filename"],
        )?;

        registry.register(Box::new(api_requests.clone()))?;
        registry.register(Box::new(issuances_discovered.clone()))?;
        registry.register(Box::new(targets_discovered.clone()))?;
        registry.register(Box::new(targets_written.clone()))?;

        Ok(Self {
            registry,
            api_requests,
            issuances_discovered,
            targets_discovered,
            targets_written,
            domain_labels,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            warn!("Failed to encode metrics: {}", e);
            return String::new();
        }

        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl MetricsSink for PrometheusMetrics {
    fn api_request(&self, endpoint: &str, method: &str, status: u16) {
        let status = status.to_string();
        self.api_requests
            .with_label_values(&[endpoint, method, status.as_str()])
            .inc();
    }

    fn issuances_discovered(&self, domain: &str, count: usize) {
        let domain = if self.domain_labels { domain } else { ALL_DOMAINS };
        self.issuances_discovered
            .with_label_values(&[domain])
            .inc_by(count as u64);
    }

    fn targets_discovered(&self, count: usize) {
        self.targets_discovered.set(count as i64);
    }

    fn targets_written(&self, filename: &str, count: usize) {
        self.targets_written
            .with_label_values(&[filename])
            .set(count as i64);
    }
}

/// Path served by the metrics endpoint
pub const METRICS_PATH: &str = "/metrics";

/// Router exposing the registry at `/metrics`
pub fn metrics_router(metrics: Arc<PrometheusMetrics>) -> Router {
    Router::new()
        .route(METRICS_PATH, get(metrics_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Arc<PrometheusMetrics>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        metrics.export(),
    )
}

/// Serve `/metrics` on `listener` until shutdown is requested
pub async fn serve_metrics(
    listener: TcpListener,
    metrics: Arc<PrometheusMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Serving metrics on http://{}{}", addr, METRICS_PATH);
    }

    axum::serve(listener, metrics_router(metrics))
        .with_graceful_shutdown(async move { shutdown_requested(&mut shutdown_rx).await })
        .await?;

    debug!("Metrics server stopped");
    Ok(())
}

/// Background task writing the registry to a textfile collector file, stops on shutdown
pub async fn metrics_exporter_task(
    metrics: Arc<PrometheusMetrics>,
    export_path: PathBuf,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_requested(&mut shutdown_rx) => break,
        }

        let metrics_text = metrics.export();

        if let Err(e) = write_textfile(&export_path, &metrics_text).await {
            warn!("Failed to write metrics to file {:?}: {}", export_path, e);
        } else {
            debug!("Metrics written to {:?}", export_path);
        }
    }

    debug!("Metrics exporter stopped");
}

/// Write to a temporary file first, then rename, so scrapers never see a partial file
async fn write_textfile(path: &Path, contents: &str) -> std::io::Result<()> {
    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, contents).await?;
    tokio::fs::rename(&temp_path, path).await
}
