//! Weather intent detection and city extraction
//!
//! Pattern-based and deliberately best-effort: a fixed keyword set decides
//! whether a message is about weather, and a single preposition pattern pulls
//! out a candidate city. False positives on ambiguous phrasing are accepted
//! behavior, not bugs.

use crate::history::{ChatMessage, ChatRole};
use regex::Regex;

const WEATHER_KEYWORDS: &[&str] = &[
    "погода",
    "weather",
    "дождь",
    "температура",
    "осадки",
    "солнечно",
    "облачно",
    "ветер",
];

/// Classifier seam: the state machine only sees this trait, so a stronger
/// model can replace the pattern matcher without touching it.
pub trait IntentClassifier: Send + Sync {
    /// Whether the message asks about weather.
    fn is_weather_intent(&self, text: &str) -> bool;

    /// Best-effort city candidate from free text.
    fn extract_city(&self, text: &str) -> Option<String>;

    /// Most recently mentioned city across the user's own messages.
    fn last_mentioned_city(&self, history: &[ChatMessage]) -> Option<String> {
        history
            .iter()
            .rev()
            .filter(|msg| msg.role == ChatRole::User)
            .find_map(|msg| self.extract_city(&msg.content))
    }
}

/// Keyword + regex implementation.
pub struct KeywordClassifier {
    city_pattern: Regex,
}

impl KeywordClassifier {
    pub fn new() -> Self {
        // A preposition token followed by a run of letters, hyphens and
        // spaces; trailing punctuation ends the run.
        let city_pattern =
            Regex::new(r"(?:в|по)\s+([А-Яа-яЁёA-Za-z\- ]+)").expect("static city pattern");
        Self { city_pattern }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier for KeywordClassifier {
    fn is_weather_intent(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        WEATHER_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
    }

    fn extract_city(&self, text: &str) -> Option<String> {
        self.city_pattern
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|city| city.as_str().trim().to_string())
            .filter(|city| !city.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_weather_keywords_case_insensitively() {
        let classifier = KeywordClassifier::new();
        assert!(classifier.is_weather_intent("Какая сегодня ПОГОДА?"));
        assert!(classifier.is_weather_intent("will it rain? weather forecast"));
        assert!(classifier.is_weather_intent("ожидается дождь"));
        assert!(!classifier.is_weather_intent("расскажи анекдот"));
    }

    #[test]
    fn extracts_city_after_preposition() {
        let classifier = KeywordClassifier::new();
        assert_eq!(
            classifier.extract_city("погода в Москве"),
            Some("Москве".to_string())
        );
        assert_eq!(
            classifier.extract_city("какая погода по Питеру?"),
            Some("Питеру".to_string())
        );
        assert_eq!(
            classifier.extract_city("прогноз в Санкт-Петербурге"),
            Some("Санкт-Петербурге".to_string())
        );
    }

    #[test]
    fn extract_city_absent_without_preposition() {
        let classifier = KeywordClassifier::new();
        assert_eq!(classifier.extract_city("погода"), None);
        assert_eq!(classifier.extract_city("привет!"), None);
    }

    #[test]
    fn last_mentioned_city_scans_user_messages_newest_first() {
        let classifier = KeywordClassifier::new();
        let history = vec![
            ChatMessage::system("directive"),
            ChatMessage::user("погода в Казани"),
            ChatMessage::assistant("ответ про погоду в Риме"),
            ChatMessage::user("погода в Туле"),
            ChatMessage::user("спасибо"),
        ];
        assert_eq!(
            classifier.last_mentioned_city(&history),
            Some("Туле".to_string())
        );
    }

    #[test]
    fn last_mentioned_city_empty_history() {
        let classifier = KeywordClassifier::new();
        assert_eq!(classifier.last_mentioned_city(&[]), None);
    }
}
