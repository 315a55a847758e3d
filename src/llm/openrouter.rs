//! OpenRouter provider implementation
//!
//! Speaks the OpenAI-style chat completions API for both the text and the
//! vision model. History messages serialize directly as the wire format.

use super::{BackendError, CompletionGateway};
use crate::history::ChatMessage;
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

const DEFAULT_VISION_PROMPT: &str =
    "Опиши, что изображено на картинке. Ответь на русском языке, кратко и понятно.";
const RUSSIAN_REPLY_SUFFIX: &str = " Ответь на русском языке.";

/// OpenRouter client for the chat and vision models
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    vision_model: String,
}

impl OpenRouterClient {
    pub fn new(
        api_key: impl Into<String>,
        chat_model: impl Into<String>,
        vision_model: impl Into<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            chat_model: chat_model.into(),
            vision_model: vision_model.into(),
        }
    }

    fn classify_error(status: reqwest::StatusCode, body: &str) -> BackendError {
        if status.as_u16() == 429 || body.to_lowercase().contains("rate limit") {
            return BackendError::rate_limited(format!("Rate limited: {body}"));
        }
        match status.as_u16() {
            500..=599 => BackendError::transient(format!("Server error: {body}")),
            _ => BackendError::unknown(format!("HTTP {status}: {body}")),
        }
    }

    async fn request_completion(
        &self,
        model: &str,
        messages: serde_json::Value,
    ) -> Result<String, BackendError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("X-Title", "govorun")
            .json(&json!({ "model": model, "messages": messages }))
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    BackendError::transient(format!("Request timeout: {err}"))
                } else if err.is_connect() {
                    BackendError::transient(format!("Connection failed: {err}"))
                } else {
                    BackendError::unknown(format!("Request failed: {err}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| BackendError::transient(format!("Failed to read response: {err}")))?;

        if !status.is_success() {
            return Err(Self::classify_error(status, &body));
        }

        let completion: CompletionResponse = serde_json::from_str(&body).map_err(|err| {
            BackendError::unknown(format!("Failed to parse response: {err} - body: {body}"))
        })?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or_else(|| BackendError::unknown("Completion returned no choices"))
    }
}

#[async_trait]
impl CompletionGateway for OpenRouterClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, BackendError> {
        let wire = serde_json::to_value(messages)
            .map_err(|err| BackendError::unknown(format!("Failed to encode request: {err}")))?;
        self.request_completion(&self.chat_model, wire).await
    }

    async fn describe_image(
        &self,
        image: &[u8],
        caption: Option<&str>,
    ) -> Result<String, BackendError> {
        let mut prompt = caption.unwrap_or(DEFAULT_VISION_PROMPT).to_string();
        if !prompt.to_lowercase().contains("на русском") {
            prompt.push_str(RUSSIAN_REPLY_SUFFIX);
        }

        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let messages = json!([{
            "role": "user",
            "content": [
                { "type": "text", "text": prompt },
                {
                    "type": "image_url",
                    "image_url": format!("data:image/jpeg;base64,{encoded}")
                }
            ]
        }]);
        self.request_completion(&self.vision_model, messages).await
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::BackendErrorKind;

    #[test]
    fn classifies_429_as_rate_limited() {
        let err = OpenRouterClient::classify_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": "quota exceeded"}"#,
        );
        assert_eq!(err.kind, BackendErrorKind::RateLimited);
    }

    #[test]
    fn classifies_rate_limit_marker_in_body() {
        let err = OpenRouterClient::classify_error(
            reqwest::StatusCode::FORBIDDEN,
            "free tier rate limit exceeded",
        );
        assert_eq!(err.kind, BackendErrorKind::RateLimited);
    }

    #[test]
    fn classifies_5xx_as_transient() {
        let err =
            OpenRouterClient::classify_error(reqwest::StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(err.kind, BackendErrorKind::Transient);
    }

    #[test]
    fn classifies_other_statuses_as_unknown() {
        let err = OpenRouterClient::classify_error(reqwest::StatusCode::BAD_REQUEST, "bad input");
        assert_eq!(err.kind, BackendErrorKind::Unknown);
    }

    #[test]
    fn history_serializes_as_wire_messages() {
        let messages = vec![
            ChatMessage::system("directive"),
            ChatMessage::user("привет"),
        ];
        let wire = serde_json::to_value(&messages).unwrap();
        assert_eq!(
            wire,
            serde_json::json!([
                { "role": "system", "content": "directive" },
                { "role": "user", "content": "привет" }
            ])
        );
    }

    #[test]
    fn parses_completion_response() {
        let body = r#"{
            "id": "gen-1",
            "choices": [
                { "message": { "role": "assistant", "content": "  Здравствуйте!  " } }
            ]
        }"#;
        let parsed: CompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.trim(),
            "Здравствуйте!"
        );
    }
}
