use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::broadcast::{read_staged_message, BroadcastEngine, StagedMessageError};
use crate::commands::{parse_timer_args, Command, TimerArgsError};
use crate::message_log::MessageLog;
use crate::platform::{InboundMessage, Transport};
use crate::reply::{self, Resolution};
use crate::scheduler::delayed::DelayScheduler;
use crate::store::{Store, User};

/// Telegram caps a single message at 4096 characters
const MAX_CHUNK_LEN: usize = 4000;

pub const BUTTON_STATS: &str = "stats";
pub const BUTTON_SEND_MESSAGE: &str = "send_message";

const ADMIN_ONLY: &str = "❌ This command is for the administrator only.";
const REPLY_GUIDANCE: &str =
    "↩️ To answer a user, reply to a message that was forwarded from them.";

/// Text to send back to the chat an event came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// Attach the main menu buttons
    pub with_menu: bool,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            with_menu: false,
        }
    }
}

/// How an inbound text message is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The administrator answering a message
    AdminReply,
    /// Free-form administrator text; not relayed anywhere
    AdminChatter,
    /// Anyone else; recorded and relayed to the administrator
    UserMessage,
}

/// Transport-agnostic relay core. Built once at startup and shared by every
/// boundary adapter.
pub struct Relay {
    admin_id: u64,
    store: Store,
    log: MessageLog,
    engine: Arc<BroadcastEngine>,
    timers: DelayScheduler,
    transport: Arc<dyn Transport>,
    staged_file: PathBuf,
}

impl Relay {
    pub fn new(
        admin_id: u64,
        store: Store,
        log: MessageLog,
        engine: Arc<BroadcastEngine>,
        timers: DelayScheduler,
        transport: Arc<dyn Transport>,
        staged_file: PathBuf,
    ) -> Self {
        Self {
            admin_id,
            store,
            log,
            engine,
            timers,
            transport,
            staged_file,
        }
    }

    pub fn is_admin(&self, user_id: u64) -> bool {
        user_id == self.admin_id
    }

    pub fn classify(&self, msg: &InboundMessage) -> Route {
        if !self.is_admin(msg.sender.id) {
            Route::UserMessage
        } else if msg.reply_to.is_some() {
            Route::AdminReply
        } else {
            Route::AdminChatter
        }
    }

    /// Handle a non-command text message
    pub async fn handle_message(&self, msg: &InboundMessage) -> Result<Option<Reply>> {
        let route = self.classify(msg);
        info!("Message from {} routed as {:?}", msg.sender.id, route);

        match route {
            Route::UserMessage => {
                self.relay_to_admin(msg).await?;
                Ok(None)
            }
            Route::AdminReply => Ok(Some(self.route_admin_reply(msg).await?)),
            Route::AdminChatter => Ok(None),
        }
    }

    /// Record the sender, log the text, then forward it to the administrator.
    /// A failed forward leaves the record and log line in place.
    async fn relay_to_admin(&self, msg: &InboundMessage) -> Result<()> {
        if self.store.insert_user_if_absent(&msg.sender).await? {
            info!("New user {}", msg.sender.id);
        }
        self.log.append(&msg.sender, &msg.text).await?;

        if let Err(e) = self
            .transport
            .forward(self.admin_id, msg.chat_id, msg.message_id)
            .await
        {
            warn!("Failed to forward message from {}: {}", msg.sender.id, e);
        }
        Ok(())
    }

    async fn route_admin_reply(&self, msg: &InboundMessage) -> Result<Reply> {
        let target = match reply::resolve(msg) {
            Resolution::Sender(user) => user,
            Resolution::Unresolvable => {
                if let Some(target) = &msg.reply_to {
                    debug!("Reply target {} has no forwarding provenance", target.message_id);
                }
                return Ok(Reply::text(REPLY_GUIDANCE));
            }
        };

        self.store.insert_user_if_absent(&target).await?;

        let text = match self.transport.send_text(target.id, &msg.text).await {
            Ok(()) => format!("✅ Reply delivered to {}.", target.id),
            Err(e) => {
                warn!("Reply to {} failed: {}", target.id, e);
                format!("❌ Could not deliver the reply to {}: {}", target.id, e)
            }
        };
        Ok(Reply::text(text))
    }

    /// Run an operator command on behalf of `caller`
    pub async fn handle_command(&self, caller: &User, command: Command) -> Result<Vec<Reply>> {
        info!("Command {:?} from {}", command, caller.id);

        if command.requires_admin() && !self.is_admin(caller.id) {
            warn!("Refused {:?} for non-admin {}", command, caller.id);
            return Ok(vec![Reply::text(ADMIN_ONLY)]);
        }

        let replies = match command {
            Command::Start => vec![self.start(caller).await?],
            Command::Write(text) => vec![self.write(&text).await?],
            Command::Broadcast => vec![self.broadcast_staged().await?],
            Command::Stats => vec![Reply::text(self.stats_text().await?)],
            Command::SetTimer(args) => vec![self.set_timer(caller, &args).await?],
            Command::Users => self.list_users().await?,
        };
        Ok(replies)
    }

    async fn start(&self, caller: &User) -> Result<Reply> {
        self.store.insert_user_if_absent(caller).await?;
        Ok(Reply {
            text: "Welcome to the bot!".to_string(),
            with_menu: true,
        })
    }

    async fn write(&self, text: &str) -> Result<Reply> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Reply::text("❗ Write the message text: /write Hello everyone!"));
        }
        let report = self.engine.broadcast_to_all(text).await?;
        Ok(Reply::text(format!("✅ Sent to {} users.", report.delivered)))
    }

    async fn broadcast_staged(&self) -> Result<Reply> {
        let file = self.staged_file.display();
        let body = match read_staged_message(&self.staged_file).await {
            Ok(body) => body,
            Err(StagedMessageError::Missing) => {
                return Ok(Reply::text(format!("❗ {} not found.", file)))
            }
            Err(StagedMessageError::Empty) => {
                return Ok(Reply::text(format!("❗ {} is empty.", file)))
            }
            Err(e) => return Err(e.into()),
        };
        let report = self.engine.broadcast_to_all(&body).await?;
        Ok(Reply::text(format!(
            "✅ Sent from file to {} users.",
            report.delivered
        )))
    }

    async fn stats_text(&self) -> Result<String> {
        Ok(format!("👥 Users: {}", self.store.count_users().await?))
    }

    async fn set_timer(&self, caller: &User, args: &str) -> Result<Reply> {
        let (delay, body) = match parse_timer_args(args) {
            Ok(parsed) => parsed,
            Err(TimerArgsError::Missing | TimerArgsError::MissingBody) => {
                return Ok(Reply::text("❗ Usage: /set_timer <seconds> <message>"))
            }
            Err(TimerArgsError::InvalidDelay) => {
                return Ok(Reply::text(
                    "❗ Invalid format. Usage: /set_timer <seconds> <message>",
                ))
            }
        };
        self.timers.schedule(Some(caller.id), delay, body).await?;
        Ok(Reply::text(format!(
            "⏰ Message will be sent in {} seconds.",
            delay
        )))
    }

    async fn list_users(&self) -> Result<Vec<Reply>> {
        let users = self.store.list_users().await?;
        if users.is_empty() {
            return Ok(vec![Reply::text("No users yet.")]);
        }
        let listing = users
            .iter()
            .map(User::describe)
            .collect::<Vec<_>>()
            .join("\n");
        Ok(split_message(&listing, MAX_CHUNK_LEN)
            .into_iter()
            .map(Reply::text)
            .collect())
    }

    /// Text that replaces the menu message after a button press.
    /// `None` for unknown buttons, which are only acknowledged.
    pub async fn handle_button(&self, caller: &User, data: &str) -> Result<Option<String>> {
        match data {
            BUTTON_STATS if !self.is_admin(caller.id) => Ok(Some(ADMIN_ONLY.to_string())),
            BUTTON_STATS => Ok(Some(self.stats_text().await?)),
            BUTTON_SEND_MESSAGE => Ok(Some(
                "📝 The send-message feature is not implemented yet.".to_string(),
            )),
            _ => Ok(None),
        }
    }
}

/// Split long text into chunks no longer than `max_len` bytes, preferring
/// line and word boundaries
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].trim_end_matches('\n').to_string());
        start = actual_end;
    }

    chunks
}
