//! Fazbear Multiplayer Server
//!
//! Reads configuration from the environment and serves WebSocket clients
//! until Ctrl+C.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fazbear::{GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env().context("Failed to read configuration")?;

    info!("Fazbear Server v{}", VERSION);
    info!("Tick Rate: {} Hz", config.tick_rate);
    info!("Default Lobby Capacity: {}", config.lobby_capacity);

    let server = Arc::new(GameServer::new(config));

    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl+C received, shutting down");
                signal_server.shutdown();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    server.run().await.context("Server failed")?;

    info!("Server stopped");
    Ok(())
}
