//! Telegram transport
//!
//! Long-polling Bot API client: update intake, chunked replies, the reply
//! keyboard, and the best-effort admin side channel. Updates that lack the
//! expected fields are dropped silently.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Telegram caps a single message at this many characters.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

const GREETING: &str = "Привет! Я чат-бот. Чем могу помочь?";

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("telegram request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram api error: {0}")]
    Api(String),
}

/// Outbound messaging seam used by the pipeline
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send `text` to the user, chunked to the platform limit.
    async fn reply(&self, user_id: i64, text: &str) -> Result<(), TelegramError>;

    /// Best-effort admin notification; failures are logged, never returned.
    async fn notify_admin(&self, text: &str);
}

/// Inbound events after update normalization
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Text {
        user_id: i64,
        text: String,
    },
    Photo {
        user_id: i64,
        file_id: String,
        caption: Option<String>,
    },
    Command {
        user_id: i64,
        command: String,
    },
}

impl InboundEvent {
    pub fn user_id(&self) -> i64 {
        match self {
            InboundEvent::Text { user_id, .. }
            | InboundEvent::Photo { user_id, .. }
            | InboundEvent::Command { user_id, .. } => *user_id,
        }
    }
}

/// Bot API client over long polling
pub struct TelegramApi {
    client: Client,
    base_url: String,
    file_url: String,
    admin_user_id: Option<i64>,
}

impl TelegramApi {
    pub fn new(token: &str, admin_user_id: Option<i64>) -> Self {
        // Long-poll requests stay open up to the poll timeout; give the
        // client headroom beyond it.
        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url: format!("https://api.telegram.org/bot{token}"),
            file_url: format!("https://api.telegram.org/file/bot{token}"),
            admin_user_id,
        }
    }

    /// Validate the token and return the bot's username.
    pub async fn get_me(&self) -> Result<String, TelegramError> {
        let body: serde_json::Value = self
            .client
            .get(format!("{}/getMe", self.base_url))
            .send()
            .await?
            .json()
            .await?;
        if body.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            return Err(TelegramError::Api(format!("getMe failed: {body}")));
        }
        Ok(body
            .pointer("/result/username")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string())
    }

    /// Fetch the next batch of updates, normalized to `InboundEvent`s.
    pub async fn poll_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<(i64, InboundEvent)>, TelegramError> {
        let response: UpdatesResponse = self
            .client
            .get(format!("{}/getUpdates", self.base_url))
            .query(&[("offset", offset.to_string()), ("timeout", timeout_secs.to_string())])
            .send()
            .await?
            .json()
            .await?;
        if !response.ok {
            return Err(TelegramError::Api("getUpdates returned ok=false".to_string()));
        }
        Ok(response
            .result
            .into_iter()
            .filter_map(|update| {
                let id = update.update_id;
                parse_update(update).map(|event| (id, event))
            })
            .collect())
    }

    /// Download a photo by its file id (largest size as sent by the client).
    pub async fn download_photo(&self, file_id: &str) -> Result<Vec<u8>, TelegramError> {
        let info: FileResponse = self
            .client
            .get(format!("{}/getFile", self.base_url))
            .query(&[("file_id", file_id)])
            .send()
            .await?
            .json()
            .await?;
        let file_path = info
            .result
            .and_then(|file| file.file_path)
            .filter(|_| info.ok)
            .ok_or_else(|| TelegramError::Api(format!("getFile failed for {file_id}")))?;

        let bytes = self
            .client
            .get(format!("{}/{file_path}", self.file_url))
            .send()
            .await?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    /// Greet the user and attach the main reply keyboard.
    pub async fn send_greeting(&self, user_id: i64) -> Result<(), TelegramError> {
        self.send_message(user_id, GREETING, Some(main_keyboard())).await
    }

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<serde_json::Value>,
    ) -> Result<(), TelegramError> {
        let mut payload = json!({ "chat_id": chat_id, "text": text });
        if let Some(markup) = reply_markup {
            payload["reply_markup"] = markup;
        }
        let response = self
            .client
            .post(format!("{}/sendMessage", self.base_url))
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TelegramError::Api(format!("sendMessage failed: {body}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Messenger for TelegramApi {
    async fn reply(&self, user_id: i64, text: &str) -> Result<(), TelegramError> {
        for chunk in split_text(text, MAX_MESSAGE_LENGTH) {
            self.send_message(user_id, &chunk, None).await?;
        }
        Ok(())
    }

    async fn notify_admin(&self, text: &str) {
        let Some(admin_id) = self.admin_user_id else {
            return;
        };
        if let Err(err) = self.send_message(admin_id, text, None).await {
            tracing::warn!(error = %err, "admin notification failed");
        }
    }
}

/// The fixed main menu: weather, about, context reset.
fn main_keyboard() -> serde_json::Value {
    json!({
        "keyboard": [
            ["Погода", "О боте"],
            ["Сбросить контекст"]
        ],
        "resize_keyboard": true
    })
}

/// Split `text` into chunks of at most `limit` characters, never cutting a
/// code point in half.
fn split_text(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;
    for ch in text.chars() {
        if count == limit {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(ch);
        count += 1;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn parse_update(update: Update) -> Option<InboundEvent> {
    let message = update.message?;
    let user_id = message.from?.id;

    if let Some(photo) = message.photo.last() {
        return Some(InboundEvent::Photo {
            user_id,
            file_id: photo.file_id.clone(),
            caption: message.caption,
        });
    }

    let text = message.text?;
    if let Some(command) = text.strip_prefix('/') {
        let command = command
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .split('@')
            .next()
            .unwrap_or_default()
            .to_lowercase();
        return Some(InboundEvent::Command { user_id, command });
    }

    Some(InboundEvent::Text { user_id, text })
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    from: Option<TgUser>,
    text: Option<String>,
    caption: Option<String>,
    #[serde(default)]
    photo: Vec<PhotoSize>,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct PhotoSize {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct FileResponse {
    ok: bool,
    result: Option<FileMeta>,
}

#[derive(Debug, Deserialize)]
struct FileMeta {
    file_path: Option<String>,
}
