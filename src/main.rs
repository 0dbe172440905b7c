mod classifier;
mod config;
mod forward;
mod monitor;
mod platform;
mod shutdown;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::classifier::Classifier;
use crate::config::Config;
use crate::forward::Forwarder;
use crate::monitor::Monitor;
use crate::platform::telegram::TelegramSource;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,alert_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; the file is optional when the environment has everything
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Monitored chat: {}", config.telegram.channel);
    info!("  Destination chat: {}", config.forward.chat_id);
    info!("  Forward timeout: {:?}", config.forward.timeout());

    let classifier = Classifier::new()?;
    let forwarder = Forwarder::new(&config.forward)?;
    let source = TelegramSource::new(&config.telegram);

    let state = Monitor::new(classifier, forwarder)
        .run(source, shutdown::shutdown_signal())
        .await?;

    info!(
        "Monitor stopped after {} messages and {} alerts",
        state.messages_processed, state.alerts_detected
    );
    Ok(())
}
