//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use crate::platform::{DeliveryError, Transport};

/// Records every outbound call; sends to ids in `failing` return `Blocked`.
#[derive(Default)]
pub struct MockTransport {
    pub sent: Mutex<Vec<(u64, String)>>,
    pub forwarded: Mutex<Vec<(u64, i64, i32)>>,
    failing: Mutex<HashSet<u64>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, user_id: u64) {
        self.failing.lock().unwrap().insert(user_id);
    }

    pub fn sent(&self) -> Vec<(u64, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, user_id: u64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| *to == user_id)
            .map(|(_, text)| text)
            .collect()
    }

    pub fn forwarded(&self) -> Vec<(u64, i64, i32)> {
        self.forwarded.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&self, to: u64, text: &str) -> Result<(), DeliveryError> {
        if self.failing.lock().unwrap().contains(&to) {
            return Err(DeliveryError::Blocked);
        }
        self.sent.lock().unwrap().push((to, text.to_string()));
        Ok(())
    }

    async fn forward(&self, to: u64, from_chat: i64, message_id: i32) -> Result<(), DeliveryError> {
        if self.failing.lock().unwrap().contains(&to) {
            return Err(DeliveryError::Unreachable);
        }
        self.forwarded
            .lock()
            .unwrap()
            .push((to, from_chat, message_id));
        Ok(())
    }
}

/// Poll `check` for up to ten seconds
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    false
}
