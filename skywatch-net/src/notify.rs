//! Outbound contact notifications
//!
//! Telegram is the only real sink. When it is not configured the watch falls
//! back to a notifier that only logs, so a missing token is never an error.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use crate::NetError;

/// Environment variable holding the Telegram bot token
pub const TELEGRAM_BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

/// Environment variable holding the destination chat id
pub const TELEGRAM_CHAT_ID_ENV: &str = "TELEGRAM_CHAT_ID";

/// Default Telegram Bot API root
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// A channel that delivers contact messages
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one message
    async fn send(&self, text: &str) -> Result<(), NetError>;

    /// Sink name for logs
    fn name(&self) -> &str;
}

/// Shared notifier handle
pub type SharedNotifier = Arc<dyn Notifier>;

/// Telegram bot configuration
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: String,
}

impl TelegramConfig {
    pub fn new(bot_token: &str, chat_id: &str) -> Self {
        Self {
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            api_base: TELEGRAM_API_BASE.to_string(),
        }
    }

    /// Read `TELEGRAM_BOT_TOKEN` and `TELEGRAM_CHAT_ID`; `None` if either is unset or blank
    pub fn from_env() -> Option<Self> {
        let token = std::env::var(TELEGRAM_BOT_TOKEN_ENV).ok()?;
        let chat_id = std::env::var(TELEGRAM_CHAT_ID_ENV).ok()?;
        Self::from_parts(Some(token), Some(chat_id))
    }

    /// Build from optional parts; blank values count as missing
    pub fn from_parts(bot_token: Option<String>, chat_id: Option<String>) -> Option<Self> {
        let token = bot_token.filter(|t| !t.trim().is_empty())?;
        let chat_id = chat_id.filter(|c| !c.trim().is_empty())?;
        Some(Self::new(token.trim(), chat_id.trim()))
    }

    fn send_message_url(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.api_base.trim_end_matches('/'),
            self.bot_token
        )
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

/// Telegram Bot API notifier
pub struct TelegramNotifier {
    client: Client,
    config: TelegramConfig,
}

impl TelegramNotifier {
    pub fn new(client: Client, config: TelegramConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<(), NetError> {
        let payload = SendMessage {
            chat_id: &self.config.chat_id,
            text,
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(self.config.send_message_url())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Telegram HTTP {}: {}", status, body);
            return Err(NetError::Status(status.as_u16()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

/// Writes notifications to the log instead of sending them
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<(), NetError> {
        info!("[NOTIFY] {}", text.replace('\n', " | "));
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Telegram when configured, otherwise the log-only notifier
pub fn notifier_from_config(client: Client, config: Option<TelegramConfig>) -> SharedNotifier {
    match config {
        Some(config) => {
            info!("Telegram notifications enabled (chat {})", config.chat_id);
            Arc::new(TelegramNotifier::new(client, config))
        }
        None => {
            info!(
                "Telegram not configured ({} / {} unset), notifications go to the log",
                TELEGRAM_BOT_TOKEN_ENV, TELEGRAM_CHAT_ID_ENV
            );
            Arc::new(LogNotifier)
        }
    }
}
