// src/main.rs
use anyhow::Context;
use certspotter_sd::cli::Cli;
use certspotter_sd::config::Config;
use certspotter_sd::discovery::Discovery;
use certspotter_sd::metrics::{
    metrics_exporter_task, serve_metrics, MetricsSink, NoopMetrics, PrometheusMetrics,
};
use certspotter_sd::version;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    if cli.version {
        println!("{}", version::print());
        return Ok(());
    }

    // Validate arguments
    cli.validate()?;

    // Load config file
    let config = Config::from_file(Path::new(&cli.config))?;

    // Initialize logging
    // Precedence: RUST_LOG, then CLI flags, then config
    let log_level = cli
        .log_level_override()
        .unwrap_or(config.logging.level.as_str());

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .init();

    tracing::info!("Starting {}...", version::user_agent());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Metrics are enabled by config or by --metrics-port / --metrics-file
    let metrics_enabled = config.metrics.enabled || cli.metrics_requested();

    let mut metrics_handles = Vec::new();
    let metrics: Arc<dyn MetricsSink> = if metrics_enabled {
        let prometheus = Arc::new(PrometheusMetrics::new(config.metrics.domain_labels)?);

        let mut listen_addr = config.metrics_listen_addr()?;
        if let Some(port) = cli.metrics_port {
            listen_addr.set_port(port);
        }
        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("Failed to bind metrics listener on {}", listen_addr))?;

        let server_metrics = Arc::clone(&prometheus);
        let server_shutdown = shutdown_rx.clone();
        metrics_handles.push(tokio::spawn(async move {
            if let Err(e) = serve_metrics(listener, server_metrics, server_shutdown).await {
                tracing::error!("Metrics server failed: {}", e);
            }
        }));

        // Textfile output is optional, next to the endpoint
        let metrics_export_path = cli
            .metrics_file
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| config.metrics.export_path.clone());

        if let Some(path) = metrics_export_path {
            let interval = Duration::from_secs(config.metrics.export_interval_secs);
            tracing::info!(
                "Metrics textfile export enabled: {:?} (interval: {}s)",
                path,
                interval.as_secs()
            );

            metrics_handles.push(tokio::spawn(metrics_exporter_task(
                Arc::clone(&prometheus),
                path,
                interval,
                shutdown_rx.clone(),
            )));
        }

        prometheus
    } else {
        Arc::new(NoopMetrics)
    };

    // Stop everything on Ctrl-C
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received shutdown signal, stopping...");
                shutdown_tx.send(true).ok();
            }
            Err(e) => {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                // Keep the sender alive, dropping it would read as shutdown
                std::future::pending::<()>().await;
            }
        }
    });

    let discovery = Discovery::from_config(&config, metrics)?;
    discovery.run(shutdown_rx).await;

    for handle in metrics_handles {
        handle.await.ok();
    }

    tracing::info!("Shutdown complete");

    Ok(())
}
