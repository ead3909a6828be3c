pub mod telegram;

use async_trait::async_trait;

use crate::store::User;

/// A text message received from the chat transport
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Profile of the sender as reported by the transport
    pub sender: User,
    /// Chat the message arrived in
    pub chat_id: i64,
    pub message_id: i32,
    pub text: String,
    /// Present when the message this one replies to is known
    pub reply_to: Option<RepliedMessage>,
}

/// The message an inbound message replies to.
/// Only forwarding provenance is carried; the text is never needed for routing.
#[derive(Debug, Clone)]
pub struct RepliedMessage {
    pub message_id: i32,
    /// Original author when the replied-to message is a forwarded copy
    pub forwarded_from: Option<User>,
}

/// Why a single send or forward did not go through
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("the recipient has blocked the bot")]
    Blocked,
    #[error("the recipient chat was not found or the account is deactivated")]
    Unreachable,
    #[error("rate limited by the transport")]
    RateLimited,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Outbound primitives the relay needs from a chat platform
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a plain text message directly to a user
    async fn send_text(&self, to: u64, text: &str) -> Result<(), DeliveryError>;

    /// Forward a message so that the copy carries its original author
    async fn forward(&self, to: u64, from_chat: i64, message_id: i32) -> Result<(), DeliveryError>;
}
