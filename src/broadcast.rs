use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::platform::{DeliveryError, Transport};
use crate::store::Store;

/// Result of one delivery attempt
#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(DeliveryError),
}

impl From<Result<(), DeliveryError>> for DeliveryOutcome {
    fn from(result: Result<(), DeliveryError>) -> Self {
        match result {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => DeliveryOutcome::Failed(e),
        }
    }
}

/// Aggregate of a fan-out. Individual failures are only counted, never reported.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub delivered: usize,
}

impl BroadcastReport {
    fn record(&mut self, outcome: &DeliveryOutcome) {
        self.attempted += 1;
        if matches!(outcome, DeliveryOutcome::Delivered) {
            self.delivered += 1;
        }
    }
}

/// Why staged broadcast content could not be used
#[derive(Debug, thiserror::Error)]
pub enum StagedMessageError {
    #[error("staged message file not found")]
    Missing,
    #[error("staged message file is empty")]
    Empty,
    #[error("failed to read staged message file: {0}")]
    Io(#[from] std::io::Error),
}

/// Read externally staged broadcast content, trimmed.
pub async fn read_staged_message(path: &Path) -> Result<String, StagedMessageError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StagedMessageError::Missing)
        }
        Err(e) => return Err(e.into()),
    };

    let body = content.trim();
    if body.is_empty() {
        return Err(StagedMessageError::Empty);
    }
    Ok(body.to_string())
}

/// Sends one body to many users, isolating each delivery from the others
pub struct BroadcastEngine {
    transport: Arc<dyn Transport>,
    store: Store,
}

impl BroadcastEngine {
    pub fn new(transport: Arc<dyn Transport>, store: Store) -> Self {
        Self { transport, store }
    }

    /// Attempt exactly one send per recipient, in order.
    pub async fn broadcast(&self, body: &str, recipients: &[u64]) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for &recipient in recipients {
            let outcome = self.send_one(recipient, body).await;
            if let DeliveryOutcome::Failed(e) = &outcome {
                debug!("Broadcast to {} skipped: {}", recipient, e);
            }
            report.record(&outcome);
        }
        report
    }

    /// Broadcast to the directory as it is right now. Users added while the
    /// fan-out runs are not included.
    pub async fn broadcast_to_all(&self, body: &str) -> Result<BroadcastReport> {
        let recipients = self.store.list_user_ids().await?;
        info!("Broadcasting to {} recipient(s)", recipients.len());
        let report = self.broadcast(body, &recipients).await;
        info!(
            "Broadcast finished: {}/{} delivered",
            report.delivered, report.attempted
        );
        Ok(report)
    }

    pub async fn send_one(&self, recipient: u64, body: &str) -> DeliveryOutcome {
        self.transport.send_text(recipient, body).await.into()
    }
}
