//! # banter
//!
//! Realtime presence and message-relay server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! banter
//!
//! # Run with a config file in the working directory
//! banter   # reads banter.toml if present
//!
//! # Run with environment variables
//! BANTER_PORT=8080 BANTER_HOST=0.0.0.0 banter
//! ```

use anyhow::Result;
use banter_server::{config::Config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "banter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;

    tracing::info!("Starting banter relay on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
