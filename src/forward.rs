use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::ForwardConfig;

/// Prefix that marks a forwarded message as an automatic alert
pub const ALERT_BANNER: &str = "🎯 AUTOMATIC INPLAYGURU ALERT:";

/// Destination for classified alerts and operational notifications.
///
/// Both calls make a single attempt and report the outcome as a boolean;
/// failures are logged by the implementation, never returned.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver an alert, wrapped in [`ALERT_BANNER`].
    async fn forward(&self, alert: &str) -> bool;

    /// Deliver a plain notification (startup, error reports).
    async fn notify(&self, text: &str) -> bool;
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn wrap_alert(alert: &str) -> String {
    format!("{}\n\n{}", ALERT_BANNER, alert)
}

/// Bot API client posting to `sendMessage` on the destination bot.
pub struct Forwarder {
    client: reqwest::Client,
    url: String,
    chat_id: String,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(config: &ForwardConfig) -> Result<Self> {
        Self::with_timeout(config, config.timeout())
    }

    pub fn with_timeout(config: &ForwardConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: format!("{}/bot{}/sendMessage", config.api_base_url, config.bot_token),
            chat_id: config.chat_id.clone(),
            timeout,
        })
    }

    async fn send(&self, text: &str) -> Result<()> {
        let text = escape_html(text);
        let request = SendMessageRequest {
            chat_id: &self.chat_id,
            text: &text,
            parse_mode: "HTML",
        };

        debug!("Posting {} chars to chat {}", text.chars().count(), self.chat_id);

        // The URL embeds the bot token, so keep it out of error messages.
        let response = match self.client.post(&self.url).json(&request).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => anyhow::bail!("timed out after {:?}", self.timeout),
            Err(e) => return Err(e.without_url()).context("network error"),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => anyhow::bail!("timed out after {:?}", self.timeout),
            Err(e) => return Err(e.without_url()).context("failed to read response body"),
        };

        let parsed = serde_json::from_str::<ApiResponse>(&body);

        if !status.is_success() {
            let detail = parsed.ok().and_then(|r| r.description).unwrap_or(body);
            anyhow::bail!("HTTP error {}: {}", status, detail);
        }

        let parsed = parsed.with_context(|| format!("malformed Bot API response: {}", body))?;
        if !parsed.ok {
            anyhow::bail!(
                "Telegram API error: {}",
                parsed.description.as_deref().unwrap_or("ok flag missing or false")
            );
        }

        Ok(())
    }
}

#[async_trait]
impl AlertSink for Forwarder {
    async fn forward(&self, alert: &str) -> bool {
        match self.send(&wrap_alert(alert)).await {
            Ok(()) => {
                info!("Alert forwarded to the destination bot");
                true
            }
            Err(e) => {
                error!("Failed to forward alert: {:#}", e);
                false
            }
        }
    }

    async fn notify(&self, text: &str) -> bool {
        match self.send(text).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to send notification: {:#}", e);
                false
            }
        }
    }
}
