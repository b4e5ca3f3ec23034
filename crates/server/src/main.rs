use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use streamvault_core::{
    load_config, validate_config, DownloadOrchestrator, Extractor, JobStore, ScheduleStore,
    SqliteJobStore, SqliteScheduleStore, YtDlpExtractor,
};

use streamvault_server::api::ws::{build_stats_update, WsMessage};
use streamvault_server::api::{create_router, WsBroadcaster};
use streamvault_server::metrics;
use streamvault_server::state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("STREAMVAULT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    // Log a stable fingerprint so deployments can be told apart in logs.
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!("Configuration loaded (hash {})", &config_hash[..16]);
    info!("Database path: {:?}", config.database.path);
    info!("Downloads dir: {:?}", config.orchestrator.downloads_dir);

    tokio::fs::create_dir_all(&config.orchestrator.downloads_dir)
        .await
        .context("Failed to create downloads directory")?;

    // Create SQLite stores (shared database file)
    let job_store: Arc<dyn JobStore> = Arc::new(
        SqliteJobStore::new(&config.database.path).context("Failed to create job store")?,
    );
    info!("Job store initialized");

    let schedule_store: Arc<dyn ScheduleStore> = Arc::new(
        SqliteScheduleStore::new(&config.database.path)
            .context("Failed to create schedule store")?,
    );
    info!("Schedule store initialized");

    // Create yt-dlp extractor
    let extractor: Arc<dyn Extractor> =
        Arc::new(YtDlpExtractor::new(config.extractor.clone()));
    info!("Extractor initialized (binary: {})", config.extractor.binary);

    // Create and start the orchestrator
    let orchestrator = Arc::new(DownloadOrchestrator::new(
        config.orchestrator.clone(),
        Arc::clone(&job_store),
        Arc::clone(&schedule_store),
        extractor,
    ));
    orchestrator.start().await;
    info!("Download orchestrator started");

    // Create WebSocket broadcaster for real-time updates
    let ws_broadcaster = WsBroadcaster::default();
    info!("WebSocket broadcaster initialized");

    // Forward orchestrator events to WebSocket clients as stats snapshots.
    let pump_handle = tokio::spawn(pump_events(
        Arc::clone(&orchestrator),
        ws_broadcaster.clone(),
    ));

    // Create app state and router
    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&orchestrator),
        ws_broadcaster,
    ));
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Stop orchestrator
    info!("Server shutting down...");
    orchestrator.stop().await;
    pump_handle.abort();
    info!("Download orchestrator stopped");

    Ok(())
}

/// Turn every job change into a full stats snapshot for WebSocket clients.
async fn pump_events(orchestrator: Arc<DownloadOrchestrator>, broadcaster: WsBroadcaster) {
    let mut events = orchestrator.events();
    loop {
        match events.recv().await {
            Ok(_) => match build_stats_update(&orchestrator) {
                Ok(msg) => {
                    if let WsMessage::StatsUpdate { ref stats, .. } = msg {
                        metrics::update_job_gauges(stats);
                        metrics::DOWNLOADS_ACTIVE.set(stats.downloading);
                    }
                    broadcaster.broadcast(msg);
                }
                Err(e) => warn!("Failed to build stats snapshot: {}", e),
            },
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                // Snapshots are self-contained, so skipping events is fine.
                warn!("Event pump lagged, skipped {} events", n);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
