use anyhow::{Context, Result};

use super::Store;

/// A known user of the bot. Recorded once and never updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl User {
    /// A user known only by id
    #[cfg(test)]
    pub fn with_id(id: u64) -> Self {
        Self {
            id,
            username: None,
            first_name: None,
            last_name: None,
        }
    }

    /// One-line summary used by the `/users` listing
    pub fn describe(&self) -> String {
        let mut line = self.id.to_string();
        if let Some(username) = &self.username {
            line.push_str(&format!(" @{}", username));
        }
        for name in [&self.first_name, &self.last_name].into_iter().flatten() {
            line.push(' ');
            line.push_str(name);
        }
        line
    }
}

impl Store {
    /// Record a user unless the id is already known.
    /// Returns `true` only for the caller whose write created the row.
    pub async fn insert_user_if_absent(&self, user: &User) -> Result<bool> {
        let conn = self.conn.lock().await;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO users (user_id, username, first_name, last_name)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    user.id as i64,
                    user.username,
                    user.first_name,
                    user.last_name,
                ],
            )
            .context("Failed to insert user")?;
        Ok(inserted == 1)
    }

    /// All known users, oldest first
    pub async fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT user_id, username, first_name, last_name
                 FROM users ORDER BY created_at ASC, user_id ASC",
            )
            .context("Failed to prepare user listing")?;
        let users = stmt
            .query_map([], |row| {
                Ok(User {
                    id: row.get::<_, i64>(0)? as u64,
                    username: row.get(1)?,
                    first_name: row.get(2)?,
                    last_name: row.get(3)?,
                })
            })
            .context("Failed to map user rows")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to collect users")?;
        Ok(users)
    }

    /// Snapshot of every known user id
    pub async fn list_user_ids(&self) -> Result<Vec<u64>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT user_id FROM users ORDER BY created_at ASC, user_id ASC")
            .context("Failed to prepare user id listing")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .context("Failed to map user ids")?
            .map(|id| id.map(|id| id as u64))
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to collect user ids")?;
        Ok(ids)
    }

    pub async fn count_users(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT count(*) FROM users", [], |row| row.get(0))
            .context("Failed to count users")?;
        Ok(count as usize)
    }
}
