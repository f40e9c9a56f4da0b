//! Prometheus exporter for deCONZ/ConBee sensors.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use conbee_exporter::config::{ExporterConfig, api_key_from_env};
use conbee_exporter::{
    GatewayClient, GaugeRegistry, HttpServer, SensorFilter, SensorPoller, gateway, poller,
};

/// Prometheus exporter for deCONZ/ConBee sensors.
#[derive(Parser, Debug)]
#[command(name = "conbee-exporter")]
#[command(about = "Export deCONZ/ConBee sensor readings as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// Gateway address, e.g. 192.168.1.20:80. If unset, will try discovery.
    #[arg(long)]
    conbee_uri: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => ExporterConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => ExporterConfig::default(),
    };

    // CLI overrides
    if let Some(listen) = args.listen {
        config.prometheus.listen = listen;
    }
    if let Some(uri) = args.conbee_uri {
        config.gateway.url = Some(uri);
    }
    config.validate()?;

    let logging = config
        .logging
        .clone()
        .with_level_override(args.log_level.as_deref());
    conbee_common::init_tracing(&logging)?;

    info!("Starting ConBee exporter v{}", env!("CARGO_PKG_VERSION"));

    let api_key = api_key_from_env()?;
    let timeout = Duration::from_secs(config.gateway.timeout_secs);

    let gateway_url = match &config.gateway.url {
        Some(url) => url.clone(),
        None => gateway::discover(&config.gateway.discovery_url, timeout)
            .await
            .context("Issue when discovering gateways")?
            .url(),
    };

    let client = GatewayClient::new(&gateway_url, api_key, timeout)?;
    info!(gateway = %client.base_url(), "Using gateway");

    let listen_addr: SocketAddr = config
        .prometheus
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let registry = Arc::new(GaugeRegistry::new(
        config.prometheus.namespace.clone(),
        config.polling.max_series,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poller = SensorPoller::new(
        client,
        registry.clone(),
        SensorFilter::new(&config.filters),
        Duration::from_secs(config.polling.interval_secs),
    );
    let mut poller_task = tokio::spawn(poller.run(shutdown_rx.clone()));

    let http_server = HttpServer::new(
        registry.clone(),
        listen_addr,
        config.prometheus.path.clone(),
    );
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = wait_for_signal() => {}
        result = &mut poller_task => {
            let err = poller::unexpected_exit(result);
            error!(error = %err, "Sensor poller died, exiting");
            let _ = shutdown_tx.send(true);
            let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;
            return Err(err);
        }
    }

    shutdown_tx.send(true)?;

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = poller_task.await;
        let _ = http_task.await;
    })
    .await;

    let stats = registry.stats();
    info!(
        polls_completed = stats.polls_completed,
        polls_failed = stats.polls_failed,
        gauges = registry.gauge_count(),
        series = registry.series_count(),
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
