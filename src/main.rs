//! wxstation Binary Entry Point
//!
//! Runs the station ingestion pipeline and the HTTP server.
//! Core functionality is provided by the `wxstation` library crate.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Layer, filter::Targets, layer::SubscriberExt, util::SubscriberInitExt,
};
use wxstation::{
    Broker, Ingestor, LogSinks, LoopBuffer, StorageBuilder,
    config::AppConfig,
    server::{AppState, create_router},
    station,
};

/// wxstation - Weather Station Ingestion Server
#[derive(Parser, Debug)]
#[command(name = "wxstation", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long, env = "WXSTATION_CONFIG")]
    config: Option<String>,

    /// Server bind address (overrides config file)
    #[arg(long, env = "WXSTATION_SERVER_BIND")]
    server_bind: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, env = "WXSTATION_SERVER_PORT")]
    server_port: Option<u16>,

    /// Archive database path (overrides config file)
    #[arg(long, env = "WXSTATION_DB_PATH")]
    db_path: Option<String>,

    /// Station device (overrides config file)
    #[arg(short, long, env = "WXSTATION_DEVICE")]
    device: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Enable trace logging
    #[arg(long, conflicts_with = "debug")]
    trace: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    let crate_level = if cli.trace {
        "trace"
    } else if cli.debug {
        "debug"
    } else {
        "info"
    };
    let log_sinks = LogSinks::new();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer().with_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| format!("info,wxstation={crate_level}").into()),
            ),
        )
        .with(
            log_sinks.clone().with_filter(
                Targets::new()
                    .with_target("wxstation", Level::TRACE)
                    .with_default(Level::INFO),
            ),
        )
        .init();

    tracing::info!("wxstation - Weather Station Ingestion Server");

    // Load configuration from file
    let mut config = match cli.config.as_deref() {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            AppConfig::load(path)?
        }
        None => {
            tracing::info!("No configuration file given, using defaults");
            AppConfig::default()
        }
    };

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(bind) = cli.server_bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.server_port {
        config.server.port = port;
    }
    if let Some(path) = cli.db_path {
        config.database.path = path;
    }
    if let Some(device) = cli.device {
        config.station.device = device;
    }
    config.validate()?;

    tracing::info!(
        "Server: {}:{}, Database: {}, Device: {}",
        config.server.bind,
        config.server.port,
        config.database.path,
        config.station.device,
    );

    // Build storage layer
    let handles = StorageBuilder::new(&config.database.path)
        .channel_capacity(config.database.channel_capacity)
        .checkpoint_interval(config.database.checkpoint_interval()?)
        .build()?;

    tracing::info!("Storage initialized");

    let broker = Broker::new(config.broker.queue_depth, config.broker.subscriber_capacity);
    let loops = Arc::new(LoopBuffer::new(config.loop_buffer.capacity));
    let mut driver = station::open(&config.station)?;

    // Start ingestion; a failure also stops the web server
    let shutdown = CancellationToken::new();
    let ingestor = Ingestor::new(
        handles.writer.clone(),
        handles.reader.clone(),
        Arc::clone(&loops),
        broker.clone(),
    );
    let ingest_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let result = ingestor.run(driver.as_mut(), shutdown.clone()).await;
            if result.is_err() {
                shutdown.cancel();
            }
            result
        }
    });

    // Create web server state
    let app_state = AppState {
        reader: handles.reader.clone(),
        loops,
        broker,
        log_sinks,
        min_samples: config.loop_buffer.min_samples,
        stale_age: config.loop_buffer.stale_age,
        shutdown: shutdown.clone(),
    };

    // Build Axum router
    let app = create_router(app_state);

    // Parse bind address
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    tracing::info!("Web server listening on: http://{}", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    // Start server with graceful shutdown
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await?;

    shutdown.cancel();
    let outcome = ingest_task.await;

    tracing::info!("Shutting down storage...");
    if let Err(e) = handles.shutdown() {
        tracing::error!("Failed to shutdown storage: {}", e);
    }

    match outcome {
        Ok(Ok(stats)) => {
            tracing::info!(
                archived = stats.archived,
                accepted = stats.accepted,
                rejected = stats.rejected,
                "Shutdown complete"
            );
            Ok(())
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Ingestion failed");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "Ingestion task panicked");
            std::process::exit(1);
        }
    }
}

/// Resolve on Ctrl+C, SIGTERM, or when `shutdown` is cancelled elsewhere.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
        _ = shutdown.cancelled() => {
            tracing::info!("Ingestion stopped, shutting down web server");
        }
    }

    shutdown.cancel();
}
