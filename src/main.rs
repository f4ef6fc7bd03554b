mod config;
mod openai;
mod platform;
mod transcript;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::Bot;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::openai::{Completion, OpenAiClient};
use crate::transcript::TranscriptStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relaybot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // .env is optional; variables already in the environment win
    dotenvy::dotenv().ok();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Model: {}", config.openai.model);
    info!("  Transcripts: {}", config.transcripts.directory.display());
    info!("  WhatsApp enabled: {}", config.whatsapp.enabled);

    let store = Arc::new(TranscriptStore::new(config.transcripts.directory.clone()));
    let completion: Arc<dyn Completion> = Arc::new(OpenAiClient::new(config.openai.clone()));

    // Ctrl-C flips the shutdown flag; both adapters watch it
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let bot = Bot::new(&config.telegram.bot_token);
    let telegram = tokio::spawn(log_exit(
        "Telegram",
        platform::telegram::run(bot, Arc::clone(&store), Arc::clone(&completion), shutdown_rx.clone()),
    ));

    let whatsapp = if config.whatsapp.enabled {
        Some(tokio::spawn(log_exit(
            "WhatsApp",
            platform::whatsapp::run(
                config.whatsapp.clone(),
                Arc::clone(&store),
                Arc::clone(&completion),
                shutdown_rx,
            ),
        )))
    } else {
        None
    };

    telegram.await?;
    if let Some(handle) = whatsapp {
        handle.await?;
    }

    Ok(())
}

/// Adapters run as detached tasks while the other one may never finish, so
/// their failures are logged the moment they exit instead of when the join
/// handle is awaited.
async fn log_exit(adapter: &'static str, task: impl std::future::Future<Output = Result<()>>) {
    if let Err(e) = task.await {
        error!("{} adapter failed: {:#}", adapter, e);
    }
}
