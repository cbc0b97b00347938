//! Single-Room WebSocket Chat Relay - Entry Point
//!
//! Loads configuration, starts the relay and serves until SIGINT/SIGTERM.

use std::env;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_relay::{server, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_relay=info")),
        )
        .init();

    let mut config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    // Bind address from command line overrides CHAT_HOST/CHAT_PORT
    if let Some(addr) = env::args().nth(1) {
        config.bind_address = addr;
    }

    info!(
        self_suppress = config.self_suppress,
        wire_format = %config.client.wire_format,
        mailbox_capacity = config.client.mailbox_capacity,
        "Configuration loaded"
    );

    server::run(config).await?;

    Ok(())
}
