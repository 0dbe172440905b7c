use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub forward: ForwardConfig,
}

/// Listener side: the bot that sits in the monitored chat.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// `@username` or numeric chat id of the monitored group/channel
    #[serde(default)]
    pub channel: String,
}

/// Destination side: where classified alerts are delivered.
#[derive(Debug, Deserialize, Clone)]
pub struct ForwardConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            api_base_url: default_api_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ForwardConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_api_base_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Load from an optional TOML file, then apply environment overrides.
    /// A missing file is fine as long as the environment supplies every
    /// required value.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML")
    }

    /// Overlay values from `lookup` (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |target: &mut String, key: &str| {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *target = value.trim().to_string();
            }
        };

        set(&mut self.telegram.bot_token, "TELEGRAM_BOT_TOKEN");
        set(&mut self.telegram.channel, "TELEGRAM_CHANNEL");
        set(&mut self.forward.bot_token, "FORWARD_BOT_TOKEN");
        set(&mut self.forward.chat_id, "FORWARD_CHAT_ID");
        set(&mut self.forward.api_base_url, "FORWARD_API_URL");

        if let Some(raw) = lookup("FORWARD_TIMEOUT_SECS") {
            self.forward.timeout_secs = raw
                .trim()
                .parse()
                .with_context(|| format!("FORWARD_TIMEOUT_SECS is not a number: {raw}"))?;
        }

        Ok(())
    }

    /// No credential has a fallback; anything missing is an error.
    pub fn validate(&mut self) -> Result<()> {
        let required = [
            ("telegram.bot_token / TELEGRAM_BOT_TOKEN", &self.telegram.bot_token),
            ("telegram.channel / TELEGRAM_CHANNEL", &self.telegram.channel),
            ("forward.bot_token / FORWARD_BOT_TOKEN", &self.forward.bot_token),
            ("forward.chat_id / FORWARD_CHAT_ID", &self.forward.chat_id),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            anyhow::bail!("Missing required configuration: {}", missing.join(", "));
        }

        if self.forward.timeout_secs == 0 {
            anyhow::bail!("forward.timeout_secs must be greater than zero");
        }

        let trimmed = self.forward.api_base_url.trim_end_matches('/').to_string();
        if trimmed.is_empty() {
            anyhow::bail!("forward.api_base_url must not be empty");
        }
        self.forward.api_base_url = trimmed;

        Ok(())
    }
}
