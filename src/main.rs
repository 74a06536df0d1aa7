//! razwire - framed echo server
//!
//! Answers pings with twice their value and echoes every other frame back to
//! the peer that sent it, over TCP or UDP.

use razwire_server::{Config, EchoHandler, Server, CONFIG_ENV};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if RAZWIRE_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var(CONFIG_ENV) {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Err(e.into());
    }

    tracing::info!("Starting razwire echo server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Transport: {}", config.network.transport);
    tracing::info!("  Packet capacity: {} bytes", config.protocol.packet_capacity);
    tracing::info!("  Byte order: {:?}", config.protocol.byte_order);
    tracing::info!("  Max peers: {}", config.network.max_peers);

    let mut server = Server::bind(config.server_config()).map_err(|e| {
        tracing::error!("Failed to start server: {}", e);
        e
    })?;
    let stats = server.stats();

    // Spawn shutdown signal handler
    let shutdown = Arc::new(AtomicBool::new(false));
    let signal_flag = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        signal_flag.store(true, Ordering::Release);
    });

    // The receive loop blocks on socket readiness, so it runs on a dedicated worker.
    let worker = tokio::task::spawn_blocking(move || server.run(&shutdown, &mut EchoHandler));
    worker.await??;

    let summary = stats.snapshot();
    tracing::info!(
        "Server stopped: {} peers served, {} frames in, {} frames out",
        summary.peers_accepted,
        summary.frames_received,
        summary.frames_sent
    );
    Ok(())
}
