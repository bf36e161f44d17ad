//! PulseKV server binary.
//!
//! Binds the listener, spawns one task per client and stops on Ctrl+C.

use pulsekv::commands::CommandHandler;
use pulsekv::config::ServerConfig;
use pulsekv::connection::{handle_connection, ConnectionStats};
use pulsekv::storage::{ExpirySweeper, StorageEngine};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = ServerConfig::default();
    info!(version = pulsekv::VERSION, "Starting PulseKV");

    // Shared by every connection
    let storage = Arc::new(StorageEngine::new());

    let _sweeper = config
        .active_expiry
        .then(|| ExpirySweeper::start(Arc::clone(&storage), config.expiry.clone()));

    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!(address = %config.bind_address(), "Listening");

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    tokio::select! {
        _ = accept_loop(listener, Arc::clone(&storage), Arc::clone(&stats)) => {}
        _ = shutdown => {}
    }

    let store = storage.stats();
    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        keys = store.keys,
        expired = store.expired,
        "Server shutdown complete"
    );
    Ok(())
}

/// Accepts clients forever. A failed accept is logged and skipped.
async fn accept_loop(listener: TcpListener, storage: Arc<StorageEngine>, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = CommandHandler::new(Arc::clone(&storage));
                tokio::spawn(handle_connection(stream, addr, handler, Arc::clone(&stats)));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}
