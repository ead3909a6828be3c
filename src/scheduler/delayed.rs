use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::jobs::{BroadcastJob, BroadcastJobStore, STATUS_PENDING};
use super::Scheduler;
use crate::broadcast::{BroadcastEngine, DeliveryOutcome};

/// Longest accepted delay: one year
pub const MAX_DELAY_SECS: u64 = 365 * 24 * 60 * 60;

/// One-shot delayed broadcasts. Each job fires at most once, no sooner than
/// its delay, against the user directory as it is at fire time.
#[derive(Clone)]
pub struct DelayScheduler {
    scheduler: Scheduler,
    jobs: BroadcastJobStore,
    engine: Arc<BroadcastEngine>,
    prefix: Arc<str>,
}

impl DelayScheduler {
    pub fn new(
        scheduler: Scheduler,
        jobs: BroadcastJobStore,
        engine: Arc<BroadcastEngine>,
        prefix: &str,
    ) -> Self {
        Self {
            scheduler,
            jobs,
            engine,
            prefix: Arc::from(prefix),
        }
    }

    /// Record and register a delayed broadcast. Returns as soon as the job is registered.
    pub async fn schedule(
        &self,
        requester_id: Option<u64>,
        delay_secs: u64,
        body: String,
    ) -> Result<BroadcastJob> {
        anyhow::ensure!(!body.trim().is_empty(), "Scheduled broadcast body is empty");
        anyhow::ensure!(
            delay_secs <= MAX_DELAY_SECS,
            "Delay of {}s exceeds the {}s limit",
            delay_secs,
            MAX_DELAY_SECS
        );
        let fire_at = i64::try_from(delay_secs)
            .ok()
            .and_then(|delay| chrono::Utc::now().timestamp().checked_add(delay))
            .context("Scheduled broadcast time is out of range")?;

        let job = BroadcastJob {
            id: Uuid::new_v4().to_string(),
            requester_id,
            body,
            fire_at,
            status: STATUS_PENDING.to_string(),
        };
        self.jobs.create(&job).await?;

        // A row without a registered job would fire on the next restart
        if let Err(e) = self
            .register(job.clone(), Duration::from_secs(delay_secs))
            .await
        {
            if let Err(cleanup) = self.jobs.remove(&job.id).await {
                error!("Failed to drop unregistered broadcast {}: {:#}", job.id, cleanup);
            }
            return Err(e);
        }
        Ok(job)
    }

    /// Re-register every job still pending from a previous run.
    /// Overdue jobs fire right away.
    pub async fn recover(&self) -> Result<usize> {
        let pruned = self.jobs.prune_fired().await?;
        if pruned > 0 {
            debug!("Pruned {} fired scheduled broadcast(s)", pruned);
        }

        let pending = self.jobs.list_pending().await?;
        let now = chrono::Utc::now().timestamp();
        for job in &pending {
            let remaining = job.fire_at.saturating_sub(now).clamp(0, MAX_DELAY_SECS as i64) as u64;
            self.register(job.clone(), Duration::from_secs(remaining))
                .await?;
        }
        if !pending.is_empty() {
            info!("Recovered {} pending scheduled broadcast(s)", pending.len());
        }
        Ok(pending.len())
    }

    async fn register(&self, job: BroadcastJob, delay: Duration) -> Result<()> {
        let name = format!("broadcast-{}", job.id);
        let this = self.clone();
        let job = Arc::new(job);
        self.scheduler
            .add_one_shot_job(delay, &name, move || {
                let this = this.clone();
                let job = Arc::clone(&job);
                Box::pin(async move { this.fire(&job).await })
            })
            .await?;
        Ok(())
    }

    async fn fire(&self, job: &BroadcastJob) {
        match self.jobs.mark_fired(&job.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Scheduled broadcast {} already fired", job.id);
                return;
            }
            Err(e) => {
                error!("Failed to claim scheduled broadcast {}: {:#}", job.id, e);
                return;
            }
        }

        let body = format!("{}{}", self.prefix, job.body);
        let report = match self.engine.broadcast_to_all(&body).await {
            Ok(report) => report,
            Err(e) => {
                error!("Scheduled broadcast {} failed: {:#}", job.id, e);
                return;
            }
        };

        // Claimed rows stay until the fan-out ends; recover() prunes any left by a crash
        if let Err(e) = self.jobs.remove(&job.id).await {
            warn!("Failed to remove fired broadcast {}: {:#}", job.id, e);
        }

        if let Some(requester) = job.requester_id {
            let notice = format!(
                "⏰ Scheduled message delivered to {} users.",
                report.delivered
            );
            if let DeliveryOutcome::Failed(e) = self.engine.send_one(requester, &notice).await {
                warn!("Could not notify {} about scheduled broadcast: {}", requester, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Store, User};
    use crate::testing::{eventually, MockTransport};

    const PREFIX: &str = "⏰ Scheduled message:\n";

    async fn setup() -> (Arc<MockTransport>, Store, DelayScheduler) {
        let transport = Arc::new(MockTransport::new());
        let store = Store::open_in_memory().unwrap();
        let engine = Arc::new(BroadcastEngine::new(transport.clone(), store.clone()));
        let scheduler = Scheduler::new().await.unwrap();
        scheduler.start().await.unwrap();
        let delayed = DelayScheduler::new(
            scheduler,
            BroadcastJobStore::new(store.connection()),
            engine,
            PREFIX,
        );
        (transport, store, delayed)
    }

    async fn stored_jobs(store: &Store) -> i64 {
        let conn = store.connection();
        let conn = conn.lock().await;
        let count = conn
            .query_row("SELECT count(*) FROM scheduled_broadcasts", [], |row| {
                row.get(0)
            })
            .unwrap();
        count
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_recipients_are_read_at_fire_time() {
        let (transport, store, delayed) = setup().await;
        store.insert_user_if_absent(&User::with_id(10)).await.unwrap();

        delayed.schedule(Some(1), 1, "hi".to_string()).await.unwrap();
        store.insert_user_if_absent(&User::with_id(20)).await.unwrap();

        let expected = format!("{}hi", PREFIX);
        assert!(eventually(|| transport.sent_to(20) == vec![expected.clone()]).await);
        assert_eq!(transport.sent_to(10), vec![expected.clone()]);
        assert!(
            eventually(|| transport.sent_to(1)
                == vec!["⏰ Scheduled message delivered to 2 users.".to_string()])
            .await
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_does_not_fire_early() {
        let (transport, store, delayed) = setup().await;
        store.insert_user_if_absent(&User::with_id(10)).await.unwrap();

        delayed.schedule(None, 3, "later".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(transport.sent().is_empty());

        assert!(eventually(|| transport.sent_to(10).len() == 1).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_zero_delay_fires() {
        let (transport, store, delayed) = setup().await;
        store.insert_user_if_absent(&User::with_id(10)).await.unwrap();

        delayed.schedule(None, 0, "now".to_string()).await.unwrap();

        assert!(eventually(|| transport.sent_to(10).len() == 1).await);

        // The row goes away once the fan-out is done
        let mut rows = stored_jobs(&store).await;
        for _ in 0..50 {
            if rows == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            rows = stored_jobs(&store).await;
        }
        assert_eq!(rows, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_out_of_range_delay_leaves_nothing_behind() {
        let (transport, store, delayed) = setup().await;
        store.insert_user_if_absent(&User::with_id(10)).await.unwrap();

        for delay in [MAX_DELAY_SECS + 1, i64::MAX as u64, u64::MAX] {
            assert!(delayed
                .schedule(Some(1), delay, "far future".to_string())
                .await
                .is_err());
        }
        assert_eq!(stored_jobs(&store).await, 0);

        // Nothing is waiting to go out after a restart either
        assert_eq!(delayed.recover().await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_longest_delay_is_accepted() {
        let (transport, store, delayed) = setup().await;
        store.insert_user_if_absent(&User::with_id(10)).await.unwrap();

        let job = delayed
            .schedule(None, MAX_DELAY_SECS, "next year".to_string())
            .await
            .unwrap();

        assert!(job.fire_at > chrono::Utc::now().timestamp());
        let jobs = BroadcastJobStore::new(store.connection());
        assert_eq!(jobs.list_pending().await.unwrap(), vec![job]);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_recover_prunes_fired_jobs() {
        let (transport, store, delayed) = setup().await;
        let jobs = BroadcastJobStore::new(store.connection());
        jobs.create(&BroadcastJob {
            id: "interrupted".to_string(),
            requester_id: None,
            body: "sent before the crash".to_string(),
            fire_at: chrono::Utc::now().timestamp() - 60,
            status: STATUS_PENDING.to_string(),
        })
        .await
        .unwrap();
        jobs.mark_fired("interrupted").await.unwrap();

        assert_eq!(delayed.recover().await.unwrap(), 0);
        assert_eq!(stored_jobs(&store).await, 0);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_empty_body_is_rejected() {
        let (_transport, store, delayed) = setup().await;
        assert!(delayed.schedule(None, 5, "  ".to_string()).await.is_err());

        let jobs = BroadcastJobStore::new(store.connection());
        assert!(jobs.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_recovered_job_fires_once() {
        let (transport, store, delayed) = setup().await;
        store.insert_user_if_absent(&User::with_id(10)).await.unwrap();

        let jobs = BroadcastJobStore::new(store.connection());
        jobs.create(&BroadcastJob {
            id: "left-over".to_string(),
            requester_id: None,
            body: "from before the restart".to_string(),
            fire_at: chrono::Utc::now().timestamp() - 60,
            status: STATUS_PENDING.to_string(),
        })
        .await
        .unwrap();

        // Registering twice must still deliver only once
        assert_eq!(delayed.recover().await.unwrap(), 1);
        assert_eq!(delayed.recover().await.unwrap(), 1);

        assert!(eventually(|| !transport.sent_to(10).is_empty()).await);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(transport.sent_to(10).len(), 1);
        assert!(jobs.list_pending().await.unwrap().is_empty());
        assert_eq!(stored_jobs(&store).await, 0);
    }
}
