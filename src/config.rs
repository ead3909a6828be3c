use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default = "default_storage_config")]
    pub storage: StorageConfig,
    #[serde(default = "default_broadcast_config")]
    pub broadcast: BroadcastConfig,
    /// When present the bot receives updates through a webhook instead of long polling.
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    pub admin_id: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BroadcastConfig {
    /// File whose content `/broadcast` sends to every user
    #[serde(default = "default_staged_file")]
    pub staged_file: PathBuf,
    /// Prepended to every scheduled broadcast body
    #[serde(default = "default_scheduled_prefix")]
    pub scheduled_prefix: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    /// Public URL Telegram posts updates to
    pub url: String,
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("users.db")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("logs.txt")
}

fn default_staged_file() -> PathBuf {
    PathBuf::from("message.txt")
}

fn default_scheduled_prefix() -> String {
    "⏰ Scheduled message:\n".to_string()
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8443))
}

fn default_storage_config() -> StorageConfig {
    StorageConfig {
        database_path: default_db_path(),
        log_file: default_log_file(),
    }
}

fn default_broadcast_config() -> BroadcastConfig {
    BroadcastConfig {
        staged_file: default_staged_file(),
        scheduled_prefix: default_scheduled_prefix(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::parse(&content)?;

        // An empty token falls back to the environment so it can stay out of the file.
        if config.telegram.bot_token.is_empty() {
            config.telegram.bot_token = std::env::var("BOT_TOKEN").context(
                "telegram.bot_token is empty and BOT_TOKEN is not set in the environment",
            )?;
        }

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }
}
