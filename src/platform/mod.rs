pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub const UNKNOWN_SENDER: &str = "Unknown";
pub const NO_USERNAME: &str = "no_username";

/// A message received from the monitored chat
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingMessage {
    /// The message text, or caption for media messages
    pub text: Option<String>,
    /// Display name of the sender
    pub sender_name: Option<String>,
    /// Handle of the sender, without the leading `@`
    pub sender_username: Option<String>,
}

impl IncomingMessage {
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    pub fn sender_name(&self) -> &str {
        self.sender_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_SENDER)
    }

    pub fn sender_username(&self) -> &str {
        self.sender_username
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(NO_USERNAME)
    }
}

/// Identity of the monitored chat once it has been resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: i64,
    pub title: String,
    /// Broadcast channel, as opposed to a group or supergroup
    pub is_channel: bool,
}

/// Where monitored messages come from.
///
/// Events are delivered through a single receiver, so the consumer handles
/// one message at a time no matter how the platform schedules its callbacks.
#[async_trait]
pub trait MessageSource: Send {
    /// Authenticate and resolve the monitored chat.
    async fn connect(&mut self) -> Result<ChannelInfo>;

    /// Start delivering new messages from the resolved chat. The receiver
    /// closes when the source disconnects.
    async fn subscribe(&mut self) -> Result<mpsc::Receiver<IncomingMessage>>;

    /// Stop delivery and drop the connection. Safe to call when never connected.
    async fn close(&mut self);
}
