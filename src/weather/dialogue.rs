//! City-confirmation dialogue ahead of a weather lookup
//!
//! A per-user state machine: guess or ask for a city, confirm it, then run
//! the external lookup. Transitions are pure; the async entry point executes
//! the resulting action. Pending state lives only for the process lifetime.

use super::provider::WeatherProvider;
use crate::history::{ChatMessage, UserId};
use crate::intent::IntentClassifier;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

const AFFIRMATIVE: &[&str] = &["да", "верно", "да, верно", "yes", "correct"];
const NEGATIVE: &[&str] = &["нет", "no", "не верно", "неверно"];

const ASK_CITY: &str = "Пожалуйста, укажите город для прогноза погоды.";

fn confirm_prompt(city: &str) -> String {
    format!("Погода в {city}. Всё верно?")
}

/// Pending dialogue state for one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pending {
    /// The user was asked to name a city
    AwaitingCity,
    /// A candidate city was proposed, awaiting yes/no
    AwaitingConfirmation(String),
}

/// What a transition asks the caller to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send a prompt to the user
    Prompt(String),
    /// Run the lookup for the confirmed city and send the result
    Lookup(String),
    /// Not a weather message; the pipeline continues to general chat
    PassThrough,
}

/// Result of one dialogue step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub next: Option<Pending>,
    pub action: Action,
}

/// Pure transition function keyed on the user's pending state.
///
/// Unrecognized input during confirmation is re-evaluated as a fresh
/// top-level message: weather intent replaces the pending flow, anything
/// else passes through with the confirmation left untouched. It is never an
/// implicit negative.
pub fn step(
    pending: Option<&Pending>,
    text: &str,
    history: &[ChatMessage],
    classifier: &dyn IntentClassifier,
) -> Step {
    match pending {
        Some(Pending::AwaitingCity) => {
            let city = text.trim().to_string();
            Step {
                action: Action::Prompt(confirm_prompt(&city)),
                next: Some(Pending::AwaitingConfirmation(city)),
            }
        }
        Some(Pending::AwaitingConfirmation(city)) => {
            let normalized = text.trim().to_lowercase();
            if AFFIRMATIVE.contains(&normalized.as_str()) {
                Step {
                    next: None,
                    action: Action::Lookup(city.clone()),
                }
            } else if NEGATIVE.contains(&normalized.as_str()) {
                Step {
                    next: Some(Pending::AwaitingCity),
                    action: Action::Prompt(ASK_CITY.to_string()),
                }
            } else {
                let fresh = step(None, text, history, classifier);
                match fresh.action {
                    Action::PassThrough => Step {
                        next: Some(Pending::AwaitingConfirmation(city.clone())),
                        action: Action::PassThrough,
                    },
                    _ => fresh,
                }
            }
        }
        None => {
            if !classifier.is_weather_intent(text) {
                return Step {
                    next: None,
                    action: Action::PassThrough,
                };
            }
            match classifier
                .extract_city(text)
                .or_else(|| classifier.last_mentioned_city(history))
            {
                Some(city) => Step {
                    action: Action::Prompt(confirm_prompt(&city)),
                    next: Some(Pending::AwaitingConfirmation(city)),
                },
                None => Step {
                    next: Some(Pending::AwaitingCity),
                    action: Action::Prompt(ASK_CITY.to_string()),
                },
            }
        }
    }
}

/// Per-user dialogue state plus the provider that resolves confirmed cities.
pub struct WeatherDialogue {
    pending: Mutex<HashMap<UserId, Pending>>,
    provider: Arc<dyn WeatherProvider>,
}

impl WeatherDialogue {
    pub fn new(provider: Arc<dyn WeatherProvider>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            provider,
        }
    }

    /// Run one dialogue step for `text`. Returns the reply to send when the
    /// message belongs to the weather flow, `None` when the pipeline should
    /// continue to general chat.
    ///
    /// Callers serialize invocations per user; the lock here only protects
    /// the map across users and is never held over the lookup.
    pub async fn handle(
        &self,
        user_id: UserId,
        text: &str,
        history: &[ChatMessage],
        classifier: &dyn IntentClassifier,
    ) -> Option<String> {
        let step = {
            let pending = self.pending.lock().await;
            step(pending.get(&user_id), text, history, classifier)
        };

        {
            let mut pending = self.pending.lock().await;
            match &step.next {
                Some(next) => {
                    pending.insert(user_id, next.clone());
                }
                None => {
                    pending.remove(&user_id);
                }
            }
        }

        match step.action {
            Action::PassThrough => None,
            Action::Prompt(prompt) => Some(prompt),
            Action::Lookup(city) => {
                let body = match self.provider.current(&city).await {
                    Ok(conditions) => conditions.summary(),
                    Err(err) => {
                        tracing::warn!(user_id, city = %city, error = %err, "weather lookup failed");
                        format!("Ошибка: {err}")
                    }
                };
                Some(format!("Погода в {city}: {body}"))
            }
        }
    }

    #[cfg(test)]
    pub async fn pending_state(&self, user_id: UserId) -> Option<Pending> {
        self.pending.lock().await.get(&user_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::KeywordClassifier;
    use crate::weather::provider::{CurrentConditions, WeatherError};
    use async_trait::async_trait;

    struct FixedProvider {
        result: Result<CurrentConditions, WeatherError>,
    }

    impl FixedProvider {
        fn sunny() -> Self {
            Self {
                result: Ok(CurrentConditions {
                    description: "ясно".to_string(),
                    temp_c: 21.0,
                    feels_like_c: 20.0,
                }),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                result: Err(WeatherError::new(message)),
            }
        }
    }

    #[async_trait]
    impl WeatherProvider for FixedProvider {
        async fn current(&self, _city: &str) -> Result<CurrentConditions, WeatherError> {
            self.result.clone()
        }
    }

    fn dialogue(provider: FixedProvider) -> WeatherDialogue {
        WeatherDialogue::new(Arc::new(provider))
    }

    #[tokio::test]
    async fn weather_message_with_city_asks_for_confirmation() {
        let dialogue = dialogue(FixedProvider::sunny());
        let classifier = KeywordClassifier::new();

        let reply = dialogue.handle(1, "погода в Москве", &[], &classifier).await;

        assert_eq!(reply.as_deref(), Some("Погода в Москве. Всё верно?"));
        assert_eq!(
            dialogue.pending_state(1).await,
            Some(Pending::AwaitingConfirmation("Москве".to_string()))
        );
    }

    #[tokio::test]
    async fn weather_message_without_city_falls_back_to_history() {
        let dialogue = dialogue(FixedProvider::sunny());
        let classifier = KeywordClassifier::new();
        let history = vec![
            ChatMessage::system("directive"),
            ChatMessage::user("я живу в Казани"),
        ];

        let reply = dialogue.handle(1, "какая погода?", &history, &classifier).await;

        assert_eq!(reply.as_deref(), Some("Погода в Казани. Всё верно?"));
    }

    #[tokio::test]
    async fn weather_message_with_no_city_anywhere_asks_for_one() {
        let dialogue = dialogue(FixedProvider::sunny());
        let classifier = KeywordClassifier::new();

        let reply = dialogue.handle(1, "погода", &[], &classifier).await;

        assert_eq!(reply.as_deref(), Some(ASK_CITY));
        assert_eq!(dialogue.pending_state(1).await, Some(Pending::AwaitingCity));
    }

    #[tokio::test]
    async fn any_text_while_awaiting_city_becomes_the_candidate() {
        let dialogue = dialogue(FixedProvider::sunny());
        let classifier = KeywordClassifier::new();

        dialogue.handle(1, "погода", &[], &classifier).await;
        let reply = dialogue.handle(1, "Лиссабон", &[], &classifier).await;

        assert_eq!(reply.as_deref(), Some("Погода в Лиссабон. Всё верно?"));
        assert_eq!(
            dialogue.pending_state(1).await,
            Some(Pending::AwaitingConfirmation("Лиссабон".to_string()))
        );
    }

    #[tokio::test]
    async fn confirmation_runs_lookup_and_clears_state() {
        let dialogue = dialogue(FixedProvider::sunny());
        let classifier = KeywordClassifier::new();

        dialogue.handle(2, "погода в Париж", &[], &classifier).await;
        let reply = dialogue.handle(2, "да", &[], &classifier).await.unwrap();

        assert!(reply.starts_with("Погода в Париж:"));
        assert!(reply.contains("21°C"));
        assert_eq!(dialogue.pending_state(2).await, None);
    }

    #[tokio::test]
    async fn provider_error_text_reaches_the_user() {
        let dialogue = dialogue(FixedProvider::failing("No matching location found."));
        let classifier = KeywordClassifier::new();

        dialogue.handle(2, "погода в Нигде", &[], &classifier).await;
        let reply = dialogue.handle(2, "да", &[], &classifier).await.unwrap();

        assert_eq!(
            reply,
            "Погода в Нигде: Ошибка: No matching location found."
        );
        assert_eq!(dialogue.pending_state(2).await, None);
    }

    #[tokio::test]
    async fn rejection_asks_for_city_again() {
        let dialogue = dialogue(FixedProvider::sunny());
        let classifier = KeywordClassifier::new();

        dialogue.handle(3, "погода в Омске", &[], &classifier).await;
        let reply = dialogue.handle(3, "нет", &[], &classifier).await;

        assert_eq!(reply.as_deref(), Some(ASK_CITY));
        assert_eq!(dialogue.pending_state(3).await, Some(Pending::AwaitingCity));
    }

    #[tokio::test]
    async fn unrelated_text_during_confirmation_passes_through_and_keeps_state() {
        let dialogue = dialogue(FixedProvider::sunny());
        let classifier = KeywordClassifier::new();

        dialogue.handle(4, "погода в Твери", &[], &classifier).await;
        let reply = dialogue.handle(4, "расскажи анекдот", &[], &classifier).await;

        assert_eq!(reply, None);
        assert_eq!(
            dialogue.pending_state(4).await,
            Some(Pending::AwaitingConfirmation("Твери".to_string()))
        );
    }

    #[tokio::test]
    async fn new_weather_question_during_confirmation_replaces_the_flow() {
        let dialogue = dialogue(FixedProvider::sunny());
        let classifier = KeywordClassifier::new();

        dialogue.handle(5, "погода в Твери", &[], &classifier).await;
        let reply = dialogue.handle(5, "погода в Сочи", &[], &classifier).await;

        assert_eq!(reply.as_deref(), Some("Погода в Сочи. Всё верно?"));
        assert_eq!(
            dialogue.pending_state(5).await,
            Some(Pending::AwaitingConfirmation("Сочи".to_string()))
        );
    }

    #[test]
    fn affirmative_tokens_are_case_insensitive() {
        let classifier = KeywordClassifier::new();
        let pending = Pending::AwaitingConfirmation("Париж".to_string());

        let result = step(Some(&pending), "Да", &[], &classifier);
        assert_eq!(result.action, Action::Lookup("Париж".to_string()));
        assert_eq!(result.next, None);

        let result = step(Some(&pending), "ДА, ВЕРНО", &[], &classifier);
        assert_eq!(result.action, Action::Lookup("Париж".to_string()));
    }

    #[test]
    fn non_weather_text_passes_through_from_absent() {
        let classifier = KeywordClassifier::new();
        let result = step(None, "привет", &[], &classifier);
        assert_eq!(result.action, Action::PassThrough);
        assert_eq!(result.next, None);
    }
}
