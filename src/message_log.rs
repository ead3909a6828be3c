use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::store::User;

/// Append-only record of every message received from ordinary users
pub struct MessageLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl MessageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, user: &User, text: &str) -> Result<()> {
        let line = format_line(user, text, chrono::Local::now());

        // One writer at a time so concurrent lines never interleave
        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open message log: {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to write message log: {}", self.path.display()))?;
        file.flush().await?;
        Ok(())
    }
}

fn format_line<Tz>(user: &User, text: &str, at: chrono::DateTime<Tz>) -> String
where
    Tz: chrono::TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!(
        "[{}] {} ({}): {}\n",
        at.format("%Y-%m-%d %H:%M:%S%.6f"),
        user.id,
        user.username.as_deref().unwrap_or("-"),
        text
    )
}
