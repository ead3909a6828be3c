use anyhow::{Context, Result};
use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A delayed broadcast as recorded in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastJob {
    pub id: String,
    /// Who asked for it; used to report the outcome, not for authorization
    pub requester_id: Option<u64>,
    pub body: String,
    /// Unix seconds
    pub fire_at: i64,
    pub status: String,
}

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_FIRED: &str = "fired";

#[derive(Clone)]
pub struct BroadcastJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl BroadcastJobStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub async fn create(&self, job: &BroadcastJob) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO scheduled_broadcasts (id, requester_id, body, fire_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                job.id,
                job.requester_id.map(|id| id as i64),
                job.body,
                job.fire_at,
                job.status,
            ],
        )
        .context("Failed to insert scheduled broadcast")?;
        Ok(())
    }

    /// Move a job from pending to fired.
    /// Returns `false` if it already fired, so only one caller ever runs it.
    pub async fn mark_fired(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE scheduled_broadcasts SET status = ?1 WHERE id = ?2 AND status = ?3",
                rusqlite::params![STATUS_FIRED, id, STATUS_PENDING],
            )
            .context("Failed to update scheduled broadcast status")?;
        Ok(changed == 1)
    }

    pub async fn remove(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let removed = conn
            .execute(
                "DELETE FROM scheduled_broadcasts WHERE id = ?1",
                rusqlite::params![id],
            )
            .context("Failed to delete scheduled broadcast")?;
        Ok(removed == 1)
    }

    /// Drop every job that has already fired
    pub async fn prune_fired(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let pruned = conn
            .execute(
                "DELETE FROM scheduled_broadcasts WHERE status = ?1",
                rusqlite::params![STATUS_FIRED],
            )
            .context("Failed to prune fired broadcasts")?;
        Ok(pruned)
    }

    pub async fn list_pending(&self) -> Result<Vec<BroadcastJob>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, requester_id, body, fire_at, status
                 FROM scheduled_broadcasts WHERE status = ?1
                 ORDER BY fire_at ASC",
            )
            .context("Failed to prepare pending broadcast query")?;
        let jobs = stmt
            .query_map(rusqlite::params![STATUS_PENDING], |row| {
                Ok(BroadcastJob {
                    id: row.get(0)?,
                    requester_id: row.get::<_, Option<i64>>(1)?.map(|id| id as u64),
                    body: row.get(2)?,
                    fire_at: row.get(3)?,
                    status: row.get(4)?,
                })
            })
            .context("Failed to map rows")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to collect rows")?;
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn make_job(id: &str, fire_at: i64) -> BroadcastJob {
        BroadcastJob {
            id: id.to_string(),
            requester_id: Some(1),
            body: "Say hello!".to_string(),
            fire_at,
            status: STATUS_PENDING.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_list_pending() {
        let store = Store::open_in_memory().unwrap();
        let jobs = BroadcastJobStore::new(store.connection());

        jobs.create(&make_job("later", 2_000)).await.unwrap();
        jobs.create(&make_job("sooner", 1_000)).await.unwrap();

        let pending = jobs.list_pending().await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["sooner", "later"]);
        assert_eq!(pending[0].requester_id, Some(1));
    }

    #[tokio::test]
    async fn test_mark_fired_only_once() {
        let store = Store::open_in_memory().unwrap();
        let jobs = BroadcastJobStore::new(store.connection());
        jobs.create(&make_job("job-1", 1_000)).await.unwrap();

        assert!(jobs.mark_fired("job-1").await.unwrap());
        assert!(!jobs.mark_fired("job-1").await.unwrap());
        assert!(jobs.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_fired_unknown_job() {
        let store = Store::open_in_memory().unwrap();
        let jobs = BroadcastJobStore::new(store.connection());
        assert!(!jobs.mark_fired("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_keeps_pending_jobs() {
        let store = Store::open_in_memory().unwrap();
        let jobs = BroadcastJobStore::new(store.connection());
        jobs.create(&make_job("done", 1_000)).await.unwrap();
        jobs.create(&make_job("waiting", 2_000)).await.unwrap();
        jobs.mark_fired("done").await.unwrap();

        assert_eq!(jobs.prune_fired().await.unwrap(), 1);
        assert_eq!(jobs.prune_fired().await.unwrap(), 0);

        let pending = jobs.list_pending().await.unwrap();
        assert_eq!(pending, vec![make_job("waiting", 2_000)]);
        // A removed job can no longer be claimed
        assert!(!jobs.mark_fired("done").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove() {
        let store = Store::open_in_memory().unwrap();
        let jobs = BroadcastJobStore::new(store.connection());
        jobs.create(&make_job("job-1", 1_000)).await.unwrap();

        assert!(jobs.remove("job-1").await.unwrap());
        assert!(!jobs.remove("job-1").await.unwrap());
        assert!(jobs.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_job_without_requester() {
        let store = Store::open_in_memory().unwrap();
        let jobs = BroadcastJobStore::new(store.connection());
        let job = BroadcastJob {
            requester_id: None,
            ..make_job("anon", 5)
        };
        jobs.create(&job).await.unwrap();

        assert_eq!(jobs.list_pending().await.unwrap(), vec![job]);
    }
}
