//! Current-conditions provider
//!
//! weatherapi.com client plus the user-facing formatting of its answers.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "http://api.weatherapi.com/v1";
const LOOKUP_FAILED: &str = "Не удалось получить погоду.";

/// Provider failure with a human-readable message, surfaced to the user
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct WeatherError {
    pub message: String,
}

impl WeatherError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Structured current conditions for one city
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentConditions {
    pub description: String,
    pub temp_c: f64,
    pub feels_like_c: f64,
}

impl CurrentConditions {
    /// One-line user-facing summary with a description-derived emoji.
    pub fn summary(&self) -> String {
        format!(
            "{} {}, {}°C (ощущается как {}°C)",
            weather_emoji(&self.description),
            capitalize(&self.description),
            self.temp_c,
            self.feels_like_c
        )
    }
}

/// External lookup seam used by the dialogue
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn current(&self, city: &str) -> Result<CurrentConditions, WeatherError>;
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn weather_emoji(description: &str) -> &'static str {
    let desc = description.to_lowercase();
    if desc.contains("ясно") || desc.contains("солнечно") {
        "☀️"
    } else if desc.contains("облачно") || desc.contains("пасмурно") {
        "☁️"
    } else if desc.contains("дожд") || desc.contains("ливень") {
        "🌧️"
    } else if desc.contains("гроза") {
        "⛈️"
    } else if desc.contains("снег") || desc.contains("метель") {
        "❄️"
    } else if desc.contains("туман") {
        "🌫️"
    } else if desc.contains("ветер") {
        "💨"
    } else if desc.contains("мороз") || desc.contains("холод") {
        "🥶"
    } else if desc.contains("тепло") || desc.contains("жарко") {
        "🌡️"
    } else {
        "🌈"
    }
}

/// weatherapi.com `current.json` client
pub struct WeatherApiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl WeatherApiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

#[async_trait]
impl WeatherProvider for WeatherApiClient {
    async fn current(&self, city: &str) -> Result<CurrentConditions, WeatherError> {
        let response = self
            .client
            .get(format!("{}/current.json", self.base_url))
            .query(&[("key", self.api_key.as_str()), ("q", city), ("lang", "ru")])
            .send()
            .await
            .map_err(|err| {
                tracing::warn!(city, error = %err, "weather request failed");
                WeatherError::new(LOOKUP_FAILED)
            })?;

        let body: WeatherApiResponse = response.json().await.map_err(|err| {
            tracing::warn!(city, error = %err, "weather response malformed");
            WeatherError::new(LOOKUP_FAILED)
        })?;

        if let Some(current) = body.current {
            return Ok(CurrentConditions {
                description: current.condition.text,
                temp_c: current.temp_c,
                feels_like_c: current.feelslike_c,
            });
        }
        let message = body
            .error
            .and_then(|err| err.message)
            .unwrap_or_else(|| LOOKUP_FAILED.to_string());
        Err(WeatherError::new(message))
    }
}

#[derive(Debug, Deserialize)]
struct WeatherApiResponse {
    current: Option<WeatherApiCurrent>,
    error: Option<WeatherApiError>,
}

#[derive(Debug, Deserialize)]
struct WeatherApiCurrent {
    temp_c: f64,
    feelslike_c: f64,
    condition: WeatherApiCondition,
}

#[derive(Debug, Deserialize)]
struct WeatherApiCondition {
    text: String,
}

#[derive(Debug, Deserialize)]
struct WeatherApiError {
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_formats_conditions() {
        let conditions = CurrentConditions {
            description: "пасмурно".to_string(),
            temp_c: -3.0,
            feels_like_c: -8.0,
        };
        assert_eq!(conditions.summary(), "☁️ Пасмурно, -3°C (ощущается как -8°C)");
    }

    #[test]
    fn emoji_follows_description() {
        assert_eq!(weather_emoji("Ясно"), "☀️");
        assert_eq!(weather_emoji("небольшой дождь"), "🌧️");
        assert_eq!(weather_emoji("Гроза местами"), "⛈️");
        assert_eq!(weather_emoji("метель"), "❄️");
        assert_eq!(weather_emoji("что-то странное"), "🌈");
    }

    #[test]
    fn capitalize_handles_unicode_and_empty() {
        assert_eq!(capitalize("ясно"), "Ясно");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn parses_success_payload() {
        let body = r#"{
            "location": { "name": "Moscow" },
            "current": {
                "temp_c": 11.0,
                "feelslike_c": 9.5,
                "condition": { "text": "Облачно" }
            }
        }"#;
        let parsed: WeatherApiResponse = serde_json::from_str(body).unwrap();
        let current = parsed.current.unwrap();
        assert_eq!(current.condition.text, "Облачно");
        assert!((current.temp_c - 11.0).abs() < f64::EPSILON);
    }

    #[test]
    fn parses_error_payload() {
        let body = r#"{ "error": { "code": 1006, "message": "No matching location found." } }"#;
        let parsed: WeatherApiResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.current.is_none());
        assert_eq!(
            parsed.error.unwrap().message.as_deref(),
            Some("No matching location found.")
        );
    }
}
