//! Tally Server - HTTP API for metric collection

mod api;
mod config;

use clap::Parser;
use config::{Cli, ServerConfig};
use std::sync::Arc;
use tally_core::storage::{Storage, WalStorage};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::resolve(&cli, |key| std::env::var(key).ok())?;

    info!("Starting Tally server...");
    info!("WAL file: {:?}", config.file_storage_path);
    info!(
        "Store interval: {:?} (restore: {})",
        config.store_interval, config.restore
    );

    // Initialize storage engine
    let storage: Arc<dyn Storage> = Arc::new(WalStorage::open(
        &config.file_storage_path,
        config.storage_options(),
    )?);

    let state = api::AppState::new(storage.clone(), config.request_timeout);
    let shutdown = state.shutdown.clone();
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.address).await?;
    info!("Tally server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    storage.close().await?;
    info!("Tally server stopped");

    Ok(())
}

/// Resolve on Ctrl-C and release requests still waiting for storage
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
    shutdown.cancel();
}
