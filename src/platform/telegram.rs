use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::dispatching::{DefaultKey, HandlerExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::{
    ChatId, InlineKeyboardButton, InlineKeyboardMarkup, MaybeInaccessibleMessage, MessageId,
    UserId,
};
use teloxide::update_listeners::webhooks;
use teloxide::utils::command::BotCommands;
use teloxide::{ApiError, RequestError};
use tracing::{error, info, warn};

use crate::commands::Command;
use crate::config::WebhookConfig;
use crate::platform::{DeliveryError, InboundMessage, RepliedMessage, Transport};
use crate::router::{Relay, Reply, BUTTON_SEND_MESSAGE, BUTTON_STATS};
use crate::store::User;

/// `Transport` over the Telegram Bot API
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_text(&self, to: u64, text: &str) -> Result<(), DeliveryError> {
        self.bot
            .send_message(ChatId::from(UserId(to)), text)
            .await
            .map(|_| ())
            .map_err(delivery_error)
    }

    async fn forward(&self, to: u64, from_chat: i64, message_id: i32) -> Result<(), DeliveryError> {
        self.bot
            .forward_message(
                ChatId::from(UserId(to)),
                ChatId(from_chat),
                MessageId(message_id),
            )
            .await
            .map(|_| ())
            .map_err(delivery_error)
    }
}

fn delivery_error(e: RequestError) -> DeliveryError {
    match e {
        RequestError::Api(ApiError::BotBlocked) => DeliveryError::Blocked,
        RequestError::Api(ApiError::ChatNotFound | ApiError::UserDeactivated) => {
            DeliveryError::Unreachable
        }
        RequestError::RetryAfter(_) => DeliveryError::RateLimited,
        other => DeliveryError::Transport(other.to_string()),
    }
}

fn user_from(user: &teloxide::types::User) -> User {
    User {
        id: user.id.0,
        username: user.username.clone(),
        first_name: Some(user.first_name.clone()).filter(|name| !name.is_empty()),
        last_name: user.last_name.clone(),
    }
}

fn inbound_from(msg: &Message) -> Option<InboundMessage> {
    let from = msg.from.as_ref()?;
    let text = msg.text()?;
    Some(InboundMessage {
        sender: user_from(from),
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
        text: text.to_string(),
        reply_to: msg.reply_to_message().map(|target| RepliedMessage {
            message_id: target.id.0,
            forwarded_from: target.forward_from_user().map(user_from),
        }),
    })
}

fn main_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback("📊 Statistics", BUTTON_STATS)],
        vec![InlineKeyboardButton::callback(
            "📝 Send message",
            BUTTON_SEND_MESSAGE,
        )],
    ])
}

fn schema() -> UpdateHandler<anyhow::Error> {
    dptree::entry()
        .branch(
            Update::filter_message()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(handle_command),
                )
                .branch(
                    dptree::filter(|msg: Message| {
                        msg.text().is_some_and(|text| !text.starts_with('/'))
                    })
                    .endpoint(handle_text),
                ),
        )
        .branch(Update::filter_callback_query().endpoint(handle_callback))
}

fn build_dispatcher(bot: Bot, relay: Arc<Relay>) -> Dispatcher<Bot, anyhow::Error, DefaultKey> {
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![relay])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
}

async fn register_commands(bot: &Bot) {
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register bot commands: {}", e);
    }
}

/// Receive updates by long polling
pub async fn run_polling(bot: Bot, relay: Arc<Relay>) -> Result<()> {
    info!("Starting Telegram platform (long polling)...");
    register_commands(&bot).await;

    build_dispatcher(bot, relay).dispatch().await;
    Ok(())
}

/// Receive updates through a webhook served on `config.listen`
pub async fn run_webhook(bot: Bot, relay: Arc<Relay>, config: &WebhookConfig) -> Result<()> {
    let url = url::Url::parse(&config.url)
        .with_context(|| format!("Invalid webhook URL: {}", config.url))?;
    info!(
        "Starting Telegram platform (webhook {} on {})...",
        url, config.listen
    );
    register_commands(&bot).await;

    let listener = webhooks::axum(bot.clone(), webhooks::Options::new(config.listen, url))
        .await
        .context("Failed to set up webhook")?;

    build_dispatcher(bot, relay)
        .dispatch_with_listener(
            listener,
            LoggingErrorHandler::with_custom_text("webhook listener"),
        )
        .await;
    Ok(())
}

async fn handle_text(bot: Bot, msg: Message, relay: Arc<Relay>) -> Result<()> {
    let Some(incoming) = inbound_from(&msg) else {
        return Ok(());
    };

    if let Some(reply) = relay.handle_message(&incoming).await? {
        send_reply(&bot, msg.chat.id, reply).await?;
    }
    Ok(())
}

async fn handle_command(bot: Bot, msg: Message, cmd: Command, relay: Arc<Relay>) -> Result<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let caller = user_from(from);
    let chat = msg.chat.id;

    // A fan-out to every user can take minutes; keep this chat responsive meanwhile
    if matches!(cmd, Command::Write(_) | Command::Broadcast) {
        tokio::spawn(async move {
            if let Err(e) = run_command(&bot, chat, &caller, cmd, &relay).await {
                error!("Broadcast command failed: {:#}", e);
            }
        });
        return Ok(());
    }

    run_command(&bot, chat, &caller, cmd, &relay).await
}

async fn run_command(
    bot: &Bot,
    chat: ChatId,
    caller: &User,
    cmd: Command,
    relay: &Relay,
) -> Result<()> {
    for reply in relay.handle_command(caller, cmd).await? {
        send_reply(bot, chat, reply).await?;
    }
    Ok(())
}

async fn send_reply(bot: &Bot, chat: ChatId, reply: Reply) -> Result<()> {
    let request = bot.send_message(chat, reply.text);
    if reply.with_menu {
        request.reply_markup(main_menu()).await?;
    } else {
        request.await?;
    }
    Ok(())
}

async fn handle_callback(bot: Bot, q: CallbackQuery, relay: Arc<Relay>) -> Result<()> {
    bot.answer_callback_query(q.id.clone()).await?;

    let Some(data) = q.data.as_deref() else {
        return Ok(());
    };
    let caller = user_from(&q.from);
    let Some(text) = relay.handle_button(&caller, data).await? else {
        return Ok(());
    };

    if let Some(MaybeInaccessibleMessage::Regular(m)) = &q.message {
        bot.edit_message_text(m.chat.id, m.id, text).await?;
    }
    Ok(())
}
