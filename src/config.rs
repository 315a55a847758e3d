//! Environment configuration

use std::path::PathBuf;
use thiserror::Error;

/// Directive seeded as the first message of every conversation.
pub const SYSTEM_PROMPT: &str = "Ты Telegram ассистент. Всегда отвечай кратко и по делу. \
                                 Преимущественно используй русский язык.";

const DEFAULT_CHAT_MODEL: &str = "openrouter/auto";
const DEFAULT_VISION_MODEL: &str = "google/gemini-2.0-flash-exp:free";
const DEFAULT_HISTORY_PATH: &str = "user_histories.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
}

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_token: String,
    pub openrouter_api_key: String,
    pub chat_model: String,
    pub vision_model: String,
    pub weatherapi_key: String,
    pub admin_user_id: Option<i64>,
    pub history_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            telegram_token: require("TELEGRAM_BOT_TOKEN")?,
            openrouter_api_key: require("OPENROUTER_API_KEY")?,
            chat_model: std::env::var("OPENROUTER_MODEL")
                .unwrap_or_else(|_| DEFAULT_CHAT_MODEL.to_string()),
            vision_model: std::env::var("VISION_MODEL")
                .unwrap_or_else(|_| DEFAULT_VISION_MODEL.to_string()),
            weatherapi_key: require("WEATHERAPI_KEY")?,
            admin_user_id: std::env::var("ADMIN_USER_ID")
                .ok()
                .and_then(|raw| raw.parse().ok()),
            history_path: std::env::var("HISTORY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_HISTORY_PATH)),
        })
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}
