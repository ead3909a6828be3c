mod broadcast;
mod commands;
mod config;
mod message_log;
mod platform;
mod reply;
mod router;
mod scheduler;
mod store;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::Bot;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::broadcast::BroadcastEngine;
use crate::config::Config;
use crate::message_log::MessageLog;
use crate::platform::telegram::{self, TelegramTransport};
use crate::platform::Transport;
use crate::router::Relay;
use crate::scheduler::delayed::DelayScheduler;
use crate::scheduler::jobs::BroadcastJobStore;
use crate::scheduler::Scheduler;
use crate::store::Store;

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

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Admin: {}", config.telegram.admin_id);
    info!("  Database: {}", config.storage.database_path.display());
    info!("  Staged broadcast file: {}", config.broadcast.staged_file.display());

    let store = Store::open(&config.storage.database_path)?;
    let log = MessageLog::new(config.storage.log_file.clone());
    info!("Message log at: {}", log.path().display());

    let bot = Bot::new(&config.telegram.bot_token);
    let transport: Arc<dyn Transport> = Arc::new(TelegramTransport::new(bot.clone()));
    let engine = Arc::new(BroadcastEngine::new(Arc::clone(&transport), store.clone()));

    // Delayed broadcasts, including any left pending by a previous run
    let scheduler = Scheduler::new().await?;
    scheduler.start().await?;
    let timers = DelayScheduler::new(
        scheduler.clone(),
        BroadcastJobStore::new(store.connection()),
        Arc::clone(&engine),
        &config.broadcast.scheduled_prefix,
    );
    timers.recover().await?;

    let relay = Arc::new(Relay::new(
        config.telegram.admin_id,
        store,
        log,
        engine,
        timers,
        transport,
        config.broadcast.staged_file.clone(),
    ));

    info!("Bot is starting...");
    match &config.webhook {
        Some(webhook) => telegram::run_webhook(bot, relay, webhook).await?,
        None => telegram::run_polling(bot, relay).await?,
    }

    scheduler.shutdown().await?;
    Ok(())
}
