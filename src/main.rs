//! blockshared - coordination server for real-time collaborative block editing.
//!
//! Clients join a named room over a WebSocket and jointly edit a shared
//! block document under per-block exclusive locks, with presence and
//! fan-out coordinated through a shared state store.

mod bus;
mod config;
mod db;
mod error;
mod http;
mod locks;
mod metrics;
mod network;
mod presence;
mod state;
mod store;

use crate::config::Config;
use crate::db::Database;
use crate::network::Gateway;
use crate::state::Hub;
use crate::store::Store;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Resolve the configuration path from CLI arguments.
/// Supports `-c <path>`, `--config <path>`, or a bare path.
/// Falls back to `config.toml` when no argument is provided.
fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);

    let raw_path = match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("Missing path after {}", flag);
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "config.toml".to_string(),
    };

    match std::fs::canonicalize(Path::new(&raw_path)) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(_) => raw_path,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first (before tracing, so we can use log_format)
    let config_path = resolve_config_path();

    let config = Config::load(&config_path).map_err(|e| {
        eprintln!("ERROR: Failed to load config from {}: {}", config_path, e);
        e
    })?;

    // Initialize tracing based on config
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match config.server.log_format {
        crate::config::LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .init();
        }
        crate::config::LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .init();
        }
    }

    // Validate configuration
    if let Err(errors) = crate::config::validate(&config) {
        for err in &errors {
            error!(error = %err, "Configuration validation failed");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    info!(
        server = %config.server.name,
        listen = %config.listen.address,
        http = %config.http.address,
        backend = %config.store.backend,
        "Starting blockshared"
    );

    // Connect the shared state store (backend per config)
    let store = store::connect(&config.store).await?;

    // Open the room record database
    let db = Database::new(&config.database.path).await?;

    // Create the Hub (shared state)
    let hub = Arc::new(Hub::new(&config, store, db));
    info!("Hub initialized");

    // Spawn signal handler for graceful shutdown
    {
        let shutdown_tx = hub.shutdown_tx.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigint =
                signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT - initiating graceful shutdown"),
                _ = sigterm.recv() => info!("Received SIGTERM - initiating graceful shutdown"),
            }

            // Broadcast shutdown signal to all tasks
            let _ = shutdown_tx.send(());
        });
    }

    // Start presence sweeper task: prunes stale entries in every room so
    // ghost users vanish even in rooms nobody is reading.
    {
        let hub = Arc::clone(&hub);
        let interval_secs = config.rooms.presence_ttl_secs;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut shutdown_rx = hub.shutdown_tx.subscribe();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match hub.store.scan_prefix("online:").await {
                            Ok(keys) => {
                                for key in keys {
                                    let Some(room_id) = key.strip_prefix("online:") else {
                                        continue;
                                    };
                                    if let Err(e) = hub.presence.prune(room_id).await {
                                        tracing::warn!(room = %room_id, error = %e, "Presence sweep failed");
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Presence sweep scan failed");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });
    }
    info!("Presence sweeper task started");

    // Initialize metrics and start the HTTP collaborator
    metrics::init();
    {
        let hub = Arc::clone(&hub);
        let addr = config.http.address;
        let default_max_users = config.rooms.default_max_users;
        tokio::spawn(async move {
            http::run_http_server(addr, hub, default_max_users).await;
        });
    }
    info!(port = config.http.address.port(), "HTTP collaborator started");

    // Start the Gateway
    let gateway = Gateway::bind(config.listen.address, Arc::clone(&hub)).await?;
    gateway.run().await?;

    info!("Gateway stopped, waiting for sessions to finish...");
    // Give sessions a moment to run their cleanup and close sockets
    tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;

    Ok(())
}
