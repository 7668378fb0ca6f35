//! Fanout Server
//!
//! Streams a single event source to any number of Server-Sent Events clients.
//!
//! Every client connected to the event route receives each event published
//! after it connected. Slow clients lose events rather than slowing the
//! producer or each other.

use anyhow::Result;
use clap::Parser;
use fanout_core::Server;
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod config;
mod routes;
mod source;

use crate::config::{AppConfig, SourceKind};

#[derive(Parser, Debug)]
#[command(name = "fanout-server")]
#[command(about = "Server-Sent Events fanout broadcaster", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "fanout.yaml")]
    config: String,

    /// Listen address
    #[arg(short = 'l', long)]
    listen: Option<String>,

    /// Listen port
    #[arg(short = 'P', long)]
    port: Option<u16>,

    /// Per-subscriber queue capacity, in events
    #[arg(short, long)]
    buffer_size: Option<usize>,

    /// Event source
    #[arg(short, long, value_enum)]
    source: Option<SourceKind>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(cli.verbose);

    info!("Starting Fanout Server");

    // Load configuration
    let config = AppConfig::load(&cli.config, &cli)?;
    info!("Configuration loaded successfully");
    info!("Event route: {}", config.path);
    info!("Buffer size: {} events per subscriber", config.buffer_size);
    info!("Source: {:?}", config.source);

    // Initialize metrics
    let metrics_handle = init_metrics()?;

    let shutdown = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel(config.source_capacity);
    let server = Arc::new(Server::with_config(events_rx, config.fanout())?);

    let source = source::spawn(&config, events_tx, shutdown.clone());

    // The broadcast loop ending, for any reason, stops the HTTP server too
    let broadcast = {
        let server = Arc::clone(&server);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = server.start().await;
            shutdown.cancel();
            result
        })
    };

    let state = routes::AppState {
        server,
        metrics_handle,
    };
    let app = routes::create_router(state, &config.path);

    let addr: SocketAddr = format!("{}:{}", config.listen, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}{}", addr, config.path);

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            warn!("Shutdown signal received, stopping server...");
            shutdown.cancel();
        });
    }

    let graceful = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { graceful.cancelled().await })
        .await?;

    // Closing the source closes the event channel, which ends the broadcast loop
    shutdown.cancel();
    source.await?;

    match broadcast.await? {
        Ok(()) => info!("Server shutdown complete"),
        Err(e) => {
            error!("Broadcast loop failed: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("fanout_server=debug,fanout_core=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("fanout_server=info,fanout_core=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Initialize metrics exporter and return handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!(
        "fanout_events_total",
        "Total number of events taken from the source"
    );
    metrics::describe_counter!(
        "fanout_frames_delivered_total",
        "Frames accepted by subscriber queues"
    );
    metrics::describe_counter!(
        "fanout_frames_dropped_total",
        "Frames lost to full subscriber queues"
    );
    metrics::describe_counter!(
        "fanout_subscribers_registered_total",
        "Subscribers that have connected"
    );
    metrics::describe_counter!(
        "fanout_subscribers_deregistered_total",
        "Subscribers that have disconnected or been torn down"
    );
    metrics::describe_gauge!("fanout_subscribers", "Currently connected subscribers");

    info!("Metrics exporter initialized");
    Ok(handle)
}
