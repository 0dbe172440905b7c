use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::dispatching::ShutdownToken;
use teloxide::prelude::*;
use teloxide::types::Recipient;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TelegramConfig;
use crate::platform::{ChannelInfo, IncomingMessage, MessageSource};

/// Messages buffered between the dispatcher and the monitor
const QUEUE_CAPACITY: usize = 100;

/// Parse the configured channel: numeric ids are used as-is, anything else
/// is treated as a public `@username`.
fn parse_channel(channel: &str) -> Recipient {
    let channel = channel.trim();
    match channel.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) if channel.starts_with('@') => Recipient::ChannelUsername(channel.to_string()),
        Err(_) => Recipient::ChannelUsername(format!("@{}", channel)),
    }
}

/// Bots never receive messages posted by other bots in a group, and with
/// privacy mode on they only see commands and replies. Channel posts are
/// always delivered to an admin bot.
fn group_delivery_caveat(info: &ChannelInfo) -> Option<String> {
    if info.is_channel {
        return None;
    }
    Some(format!(
        "{} is a group: disable privacy mode for this bot via BotFather, and note \
         that messages posted by other bots are never delivered to it",
        info.title
    ))
}

/// Build the platform-agnostic message. Text falls back to the media
/// caption; channel posts are attributed to the posting chat.
fn to_incoming(msg: &Message) -> IncomingMessage {
    let text = msg.text().or_else(|| msg.caption()).map(str::to_string);

    let (sender_name, sender_username) = match (msg.from.as_ref(), msg.sender_chat.as_ref()) {
        (Some(user), _) => (Some(user.first_name.clone()), user.username.clone()),
        (None, Some(chat)) => (
            chat.title().map(str::to_string),
            chat.username().map(str::to_string),
        ),
        (None, None) => (None, None),
    };

    IncomingMessage {
        text,
        sender_name,
        sender_username,
    }
}

async fn relay(msg: Message, tx: mpsc::Sender<IncomingMessage>) -> ResponseResult<()> {
    if tx.send(to_incoming(&msg)).await.is_err() {
        warn!("Monitor is no longer receiving, dropped message {}", msg.id.0);
    }
    Ok(())
}

struct Listener {
    token: ShutdownToken,
    task: JoinHandle<()>,
}

/// Telegram Bot API source. The bot must be a member of the monitored
/// group (or an admin of the monitored channel) to receive its messages.
pub struct TelegramSource {
    bot: Bot,
    channel: Recipient,
    chat_id: Option<ChatId>,
    listener: Option<Listener>,
}

impl TelegramSource {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            bot: Bot::new(&config.bot_token),
            channel: parse_channel(&config.channel),
            chat_id: None,
            listener: None,
        }
    }
}

#[async_trait]
impl MessageSource for TelegramSource {
    async fn connect(&mut self) -> Result<ChannelInfo> {
        let me = self
            .bot
            .get_me()
            .await
            .context("Failed to authenticate with Telegram")?;
        info!("Connected to Telegram as @{}", me.username());

        let chat = self
            .bot
            .get_chat(self.channel.clone())
            .await
            .with_context(|| {
                format!(
                    "Cannot access {}; check that the bot is a member of the chat",
                    self.channel
                )
            })?;

        self.chat_id = Some(chat.id);
        let info = ChannelInfo {
            id: chat.id.0,
            title: chat
                .title()
                .map(str::to_string)
                .unwrap_or_else(|| self.channel.to_string()),
            is_channel: chat.is_channel(),
        };
        info!("Access to chat confirmed: {} (id {})", info.title, info.id);
        if let Some(caveat) = group_delivery_caveat(&info) {
            warn!("{}", caveat);
        }
        Ok(info)
    }

    async fn subscribe(&mut self) -> Result<mpsc::Receiver<IncomingMessage>> {
        let chat_id = self
            .chat_id
            .context("Cannot subscribe before the chat has been resolved")?;
        if self.listener.is_some() {
            anyhow::bail!("Already subscribed to {}", self.channel);
        }

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);

        let in_chat = move |msg: Message| msg.chat.id == chat_id;
        let handler = dptree::entry()
            .branch(Update::filter_message().filter(in_chat).endpoint(relay))
            .branch(Update::filter_channel_post().filter(in_chat).endpoint(relay));

        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![tx])
            .default_handler(|upd| async move {
                debug!("Ignoring update {:?}", upd.id);
            })
            .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
            .build();

        let token = dispatcher.shutdown_token();
        let task = tokio::spawn(async move {
            dispatcher.dispatch().await;
        });
        self.listener = Some(Listener { token, task });

        info!("Listening for new messages in chat {}", chat_id);
        Ok(rx)
    }

    async fn close(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };

        info!("Disconnecting from Telegram...");
        match listener.token.shutdown() {
            Ok(stopped) => stopped.await,
            // The dispatcher has not started polling yet, so nothing to drain.
            Err(_) => listener.task.abort(),
        }
        if let Err(e) = listener.task.await {
            if !e.is_cancelled() {
                warn!("Telegram dispatcher ended abnormally: {}", e);
            }
        }
    }
}
