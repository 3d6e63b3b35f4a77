// src/discovery/mod.rs
//! Discovery pipeline: one subscription per domain, merged into a single
//! aggregator whose snapshots drive the exporter.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tracing::{error, info};

pub mod aggregate;
pub mod fetcher;
pub mod merge;
pub mod rate_limit;

pub use aggregate::{Aggregator, Snapshot};
pub use fetcher::{Fetcher, FetcherConfig, Sweep};
pub use merge::merge;
pub use rate_limit::RateLimiter;

use crate::certspotter::{CertspotterClient, ClientConfig, GetIssuancesOptions, IssuanceSource};
use crate::config::{Config, DomainConfig};
use crate::export::{Exporter, FilterPolicy};
use crate::metrics::MetricsSink;

/// Resolves once shutdown is signalled or the signal sender is gone
pub async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

/// Wires fetchers, merge, aggregator and exporter together
pub struct Discovery {
    domains: Vec<DomainConfig>,
    fetcher: Arc<Fetcher>,
    exporter: Exporter,
}

impl Discovery {
    pub fn new(domains: Vec<DomainConfig>, fetcher: Arc<Fetcher>, exporter: Exporter) -> Self {
        Self {
            domains,
            fetcher,
            exporter,
        }
    }

    /// Build the pipeline against the real certspotter API
    pub fn from_config(config: &Config, metrics: Arc<dyn MetricsSink>) -> anyhow::Result<Self> {
        let client = CertspotterClient::new(
            ClientConfig {
                base_url: config.global.base_url.clone(),
                token: config.global.token.clone(),
                ..Default::default()
            },
            Arc::clone(&metrics),
        )?;

        Self::with_source(config, Arc::new(client), metrics)
    }

    /// Build the pipeline against any issuance source
    pub fn with_source(
        config: &Config,
        source: Arc<dyn IssuanceSource>,
        metrics: Arc<dyn MetricsSink>,
    ) -> anyhow::Result<Self> {
        let limiter = Arc::new(RateLimiter::new(
            config.global.rate_limit,
            rate_limit::DEFAULT_BURST,
        ));

        let fetcher = Arc::new(Fetcher::new(
            source,
            limiter,
            Arc::clone(&metrics),
            FetcherConfig {
                interval: Duration::from_secs(config.global.polling_interval_secs),
                retry_after_padding: Duration::from_secs(config.global.retry_after_padding_secs),
            },
        ));

        let exporter = Exporter::new(
            config.file_routes()?,
            FilterPolicy {
                exclude_precerts: config.global.exclude_precerts,
            },
            metrics,
        );

        Ok(Self::new(config.domains.clone(), fetcher, exporter))
    }

    /// Run until shutdown; returns after every spawned task has finished
    pub async fn run(self, shutdown_rx: watch::Receiver<bool>) {
        info!("Starting discovery for {} domains", self.domains.len());

        let mut handles = Vec::new();
        let mut subscriptions = Vec::new();

        for domain in &self.domains {
            let opts = GetIssuancesOptions::for_domain(&domain.domain, domain.include_subdomains);
            let (rx, handle) = Arc::clone(&self.fetcher).subscribe(opts, shutdown_rx.clone());
            subscriptions.push(rx);
            handles.push(handle);
        }

        let (merged, forwarders) = merge(subscriptions, shutdown_rx.clone());
        handles.extend(forwarders);

        let (snapshots, aggregator) = Aggregator::new().spawn(merged, shutdown_rx.clone());
        handles.push(aggregator);

        self.exporter.run(snapshots, shutdown_rx).await;

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Discovery task failed: {}", e);
            }
        }

        info!("Discovery stopped");
    }
}
