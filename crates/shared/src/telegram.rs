//! Telegram channel publishing over the Bot HTTP API.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::config::TelegramConfig;
use crate::error::PublishError;
use crate::models::PublishResult;
use crate::publisher::Publisher;

/// Telegram rejects photo captions longer than this.
pub const CAPTION_LIMIT: usize = 1024;
/// Caption length kept when the text has to be split.
pub const SHORT_CAPTION_CHARS: usize = 1000;

/// One Bot API call the publisher will make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Photo { caption: String },
    Text { text: String },
}

/// Decide which messages carry `text`. The first entry's id becomes the post id.
pub fn plan_messages(text: &str, has_image: bool) -> Vec<Outgoing> {
    if !has_image {
        return vec![Outgoing::Text {
            text: text.to_string(),
        }];
    }

    if text.chars().count() <= CAPTION_LIMIT {
        return vec![Outgoing::Photo {
            caption: text.to_string(),
        }];
    }

    let short: String = text.chars().take(SHORT_CAPTION_CHARS).collect();
    vec![
        Outgoing::Photo {
            caption: format!("{}...", short),
        },
        Outgoing::Text {
            text: text.to_string(),
        },
    ]
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    result: Option<SentMessage>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct SentMessage {
    message_id: i64,
}

pub struct TelegramPublisher {
    client: Option<Client>,
    bot_token: Option<Secret<String>>,
    channel_id: Option<String>,
    api_base: String,
}

impl TelegramPublisher {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            client: None,
            bot_token: config.bot_token.clone(),
            channel_id: config.channel_id.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Retarget subsequent publishes to another channel or chat.
    pub fn set_channel(&mut self, channel_id: impl Into<String>) {
        let channel_id = channel_id.into();
        info!(channel_id = %channel_id, "telegram channel changed");
        self.channel_id = Some(channel_id);
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    fn try_connect(&mut self) -> Result<(), PublishError> {
        if self.bot_token.is_none() {
            return Err(PublishError::Config(
                "TELEGRAM_BOT_TOKEN is not set".to_string(),
            ));
        }
        if self.channel_id.is_none() {
            return Err(PublishError::Config(
                "TELEGRAM_CHANNEL_ID is not set".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| PublishError::Config(format!("failed to create HTTP client: {}", e)))?;

        self.client = Some(client);
        Ok(())
    }

    async fn try_publish(&self, text: &str, image_path: Option<&Path>) -> Result<String, PublishError> {
        let image = image_path.filter(|p| p.is_file());
        let mut first_id = None;

        for message in plan_messages(text, image.is_some()) {
            let id = match &message {
                Outgoing::Photo { caption } => {
                    let path = image.ok_or_else(|| {
                        PublishError::Precondition("photo planned without an image".to_string())
                    })?;
                    self.send_photo(path, caption).await?
                }
                Outgoing::Text { text } => self.send_text(text).await?,
            };
            first_id.get_or_insert(id);
        }

        first_id
            .map(|id| id.to_string())
            .ok_or_else(|| PublishError::Transport("no message was sent".to_string()))
    }

    fn parts(&self) -> Result<(&Client, &str, &str), PublishError> {
        match (&self.client, &self.bot_token, &self.channel_id) {
            (Some(client), Some(token), Some(chat)) => Ok((client, token.expose_secret(), chat)),
            _ => Err(PublishError::Precondition("bot not initialised".to_string())),
        }
    }

    fn method_url(&self, token: &str, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, token, method)
    }

    async fn send_text(&self, text: &str) -> Result<i64, PublishError> {
        let (client, token, chat_id) = self.parts()?;
        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: "HTML",
        };

        let response = client
            .post(self.method_url(token, "sendMessage"))
            .json(&request)
            .send()
            .await?;

        Self::message_id(response).await
    }

    async fn send_photo(&self, path: &Path, caption: &str) -> Result<i64, PublishError> {
        let (client, token, chat_id) = self.parts()?;
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image.png")
            .to_string();

        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .text("parse_mode", "HTML")
            .part("photo", Part::bytes(bytes).file_name(file_name));

        let response = client
            .post(self.method_url(token, "sendPhoto"))
            .multipart(form)
            .send()
            .await?;

        Self::message_id(response).await
    }

    async fn message_id(response: reqwest::Response) -> Result<i64, PublishError> {
        let status = response.status();
        let body = response.text().await?;

        let parsed: ApiResponse = serde_json::from_str(&body).map_err(|_| {
            PublishError::Transport(format!("Telegram API returned {}: {}", status, body))
        })?;

        if !parsed.ok {
            let description = parsed
                .description
                .unwrap_or_else(|| format!("HTTP {}", status));
            return Err(PublishError::Transport(format!(
                "Telegram API error: {}",
                description
            )));
        }

        parsed
            .result
            .map(|m| m.message_id)
            .ok_or_else(|| PublishError::Transport("Telegram API response had no message".to_string()))
    }
}

#[async_trait]
impl Publisher for TelegramPublisher {
    fn code(&self) -> &'static str {
        "tg"
    }

    async fn connect(&mut self) -> bool {
        match self.try_connect() {
            Ok(()) => {
                info!("telegram bot initialised");
                true
            }
            Err(e) => {
                warn!(error = %e, "telegram unavailable");
                false
            }
        }
    }

    async fn publish(&mut self, text: &str, image_path: Option<&Path>) -> PublishResult {
        let result = self.try_publish(text, image_path).await;
        match &result {
            Ok(post_id) => info!(post_id = %post_id, "published to telegram"),
            Err(e) => warn!(error = %e, "telegram publish failed"),
        }
        result.into()
    }

    async fn disconnect(&mut self) {
        self.client = None;
    }
}
