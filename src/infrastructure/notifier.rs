//! Notification transport
//!
//! Push-style message delivery to one or more recipient identifiers over a
//! Telegram-compatible bot API. The application layer renders messages and
//! decides fan-out; this module only moves them.

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Message delivery to a single recipient
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Deliver a text message. HTML markup per the bot API.
    async fn send_text(&self, recipient: i64, text: &str) -> Result<()>;

    /// Deliver a photo with caption; the image bytes were fetched upstream
    async fn send_photo(&self, recipient: i64, image: Vec<u8>, caption: &str) -> Result<()>;
}

/// Fallback transport used when no bot token is configured: messages are
/// logged instead of delivered.
pub struct LogOnlyChannel;

#[async_trait]
impl NotificationChannel for LogOnlyChannel {
    async fn send_text(&self, recipient: i64, text: &str) -> Result<()> {
        tracing::info!("Notification (dry run) to {}: {}", recipient, text);
        Ok(())
    }

    async fn send_photo(&self, recipient: i64, image: Vec<u8>, caption: &str) -> Result<()> {
        tracing::info!(
            "Notification (dry run) to {}: {} [{} byte photo]",
            recipient,
            caption,
            image.len()
        );
        Ok(())
    }
}

/// Telegram bot API transport
pub struct TelegramChannel {
    client: reqwest::Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramChannel {
    pub fn new(bot_token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create notification HTTP client")?;

        Ok(Self {
            client,
            api_base: format!("https://api.telegram.org/bot{}", bot_token),
        })
    }

    /// Transport pointed at a custom API base (tests, proxies)
    pub fn with_api_base(bot_token: &str, base: &str) -> Result<Self> {
        let mut channel = Self::new(bot_token)?;
        channel.api_base = format!("{}/bot{}", base.trim_end_matches('/'), bot_token);
        Ok(channel)
    }

    fn check(response: ApiResponse, method: &str) -> Result<()> {
        if response.ok {
            Ok(())
        } else {
            anyhow::bail!(
                "Bot API {} failed: {}",
                method,
                response.description.unwrap_or_else(|| "no description".to_string())
            )
        }
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    async fn send_text(&self, recipient: i64, text: &str) -> Result<()> {
        debug!("Sending text notification to {}", recipient);

        let response: ApiResponse = self
            .client
            .post(format!("{}/sendMessage", self.api_base))
            .form(&[
                ("chat_id", recipient.to_string()),
                ("text", text.to_string()),
                ("parse_mode", "HTML".to_string()),
                ("disable_web_page_preview", "true".to_string()),
            ])
            .send()
            .await
            .context("sendMessage request failed")?
            .json()
            .await
            .context("sendMessage response unreadable")?;

        Self::check(response, "sendMessage")
    }

    async fn send_photo(&self, recipient: i64, image: Vec<u8>, caption: &str) -> Result<()> {
        debug!("Sending photo notification to {}", recipient);

        let form = reqwest::multipart::Form::new()
            .text("chat_id", recipient.to_string())
            .text("caption", caption.to_string())
            .text("parse_mode", "HTML".to_string())
            .part(
                "photo",
                reqwest::multipart::Part::bytes(image).file_name("listing.jpg"),
            );

        let response: ApiResponse = self
            .client
            .post(format!("{}/sendPhoto", self.api_base))
            .multipart(form)
            .send()
            .await
            .context("sendPhoto request failed")?
            .json()
            .await
            .context("sendPhoto response unreadable")?;

        Self::check(response, "sendPhoto")
    }
}
