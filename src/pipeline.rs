//! Message handling pipeline
//!
//! Ties history, intent routing, the weather dialogue and the completion
//! backend together. Messages from one user are handled strictly in
//! sequence; different users proceed in parallel. Failures stay inside the
//! failing user's task.

use crate::history::{ChatMessage, ConversationStore, UserId};
use crate::intent::IntentClassifier;
use crate::llm::{BackendErrorKind, CompletionGateway};
use crate::telegram::{Messenger, TelegramError};
use crate::weather::{WeatherDialogue, WeatherProvider};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

const RESET_COMMAND: &str = "сбросить контекст";
const RESET_DONE: &str = "Контекст сброшен!";
const RATE_LIMITED_REPLY: &str = "Лимит бесплатных запросов к ИИ исчерпан. Попробуйте позже.";
const FAILURE_REPLY: &str = "Sorry, I couldn't process your request.";
const VISION_FAILURE_REPLY: &str = "Не удалось распознать изображение.";

/// Sent by the dispatcher when an update task fails outright.
pub const INTERNAL_ERROR_REPLY: &str = "Произошла внутренняя ошибка. Попробуйте позже.";

/// Orchestrator for inbound text and photo events.
pub struct MessagePipeline {
    store: Mutex<ConversationStore>,
    dialogue: WeatherDialogue,
    classifier: Box<dyn IntentClassifier>,
    gateway: Arc<dyn CompletionGateway>,
    messenger: Arc<dyn Messenger>,
    system_prompt: String,
    user_locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl MessagePipeline {
    pub fn new(
        store: ConversationStore,
        gateway: Arc<dyn CompletionGateway>,
        weather: Arc<dyn WeatherProvider>,
        messenger: Arc<dyn Messenger>,
        classifier: Box<dyn IntentClassifier>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            store: Mutex::new(store),
            dialogue: WeatherDialogue::new(weather),
            classifier,
            gateway,
            messenger,
            system_prompt: system_prompt.into(),
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Serialize handling per user: two concurrent messages from the same
    /// user must not interleave dialogue transitions or history updates.
    async fn user_lock(&self, user_id: UserId) -> Arc<Mutex<()>> {
        self.user_locks
            .lock()
            .await
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn handle_message(
        &self,
        user_id: UserId,
        text: &str,
        now: u64,
    ) -> Result<(), TelegramError> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        if text.trim().to_lowercase() == RESET_COMMAND {
            {
                let mut store = self.store.lock().await;
                store.reset(user_id, &self.system_prompt, now);
                store.persist_logged(now);
            }
            self.messenger.reply(user_id, RESET_DONE).await?;
            return Ok(());
        }

        let history = self.store.lock().await.messages(user_id);
        if let Some(reply) = self
            .dialogue
            .handle(user_id, text, &history, self.classifier.as_ref())
            .await
        {
            self.store.lock().await.persist_logged(now);
            self.messenger.reply(user_id, &reply).await?;
            return Ok(());
        }

        let (created, snapshot) = {
            let mut store = self.store.lock().await;
            let created = store.get_or_create(user_id, &self.system_prompt, now);
            store.append(user_id, ChatMessage::user(text), now);
            if self.classifier.is_weather_intent(text) {
                store.append(user_id, dated_weather_note(now), now);
            }
            store.persist_logged(now);
            (created, store.messages(user_id))
        };

        if created {
            self.messenger
                .notify_admin(&format!("👤 Новый пользователь: id {user_id}"))
                .await;
        }

        match self.gateway.complete(&snapshot).await {
            Ok(reply) => {
                {
                    let mut store = self.store.lock().await;
                    store.append(user_id, ChatMessage::assistant(reply.clone()), now);
                    store.persist_logged(now);
                }
                self.messenger.reply(user_id, &reply).await?;
            }
            Err(err) if err.kind == BackendErrorKind::RateLimited => {
                tracing::warn!(user_id, error = %err, "completion quota exhausted");
                self.messenger.reply(user_id, RATE_LIMITED_REPLY).await?;
            }
            Err(err) => {
                tracing::error!(user_id, error = %err, "completion backend failed");
                self.messenger.reply(user_id, FAILURE_REPLY).await?;
            }
        }
        Ok(())
    }

    /// Photo path: independent of the weather dialogue. The caption, when
    /// present, joins the history; the vision reply always does.
    pub async fn handle_photo(
        &self,
        user_id: UserId,
        image: &[u8],
        caption: Option<&str>,
        now: u64,
    ) -> Result<(), TelegramError> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        if let Some(caption) = caption.filter(|c| !c.trim().is_empty()) {
            let mut store = self.store.lock().await;
            store.get_or_create(user_id, &self.system_prompt, now);
            store.append(user_id, ChatMessage::user(caption), now);
            store.persist_logged(now);
        }

        let reply = match self.gateway.describe_image(image, caption).await {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(user_id, error = %err, "vision backend failed");
                VISION_FAILURE_REPLY.to_string()
            }
        };

        {
            let mut store = self.store.lock().await;
            store.get_or_create(user_id, &self.system_prompt, now);
            store.append(user_id, ChatMessage::assistant(reply.clone()), now);
            store.persist_logged(now);
        }
        self.messenger.reply(user_id, &reply).await?;
        Ok(())
    }

    #[cfg(test)]
    async fn history(&self, user_id: UserId) -> Vec<ChatMessage> {
        self.store.lock().await.messages(user_id)
    }
}

/// System note anchoring "today" for weather questions the dialogue did not
/// claim, so the backend does not guess the date.
fn dated_weather_note(now: u64) -> ChatMessage {
    let today = chrono::DateTime::from_timestamp(now as i64, 0)
        .unwrap_or_default()
        .format("%Y-%m-%d");
    ChatMessage::system(format!(
        "Сегодняшняя дата: {today}. Используй эту дату для ответа на вопросы о погоде."
    ))
}
