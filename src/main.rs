//! govorun - Telegram assistant bot
//!
//! Routes user messages between Telegram, completion backends and a weather
//! provider, keeping a bounded per-user conversation history.

mod config;
mod history;
mod intent;
mod llm;
mod pipeline;
mod telegram;
mod weather;

use config::Config;
use history::{epoch_now, ConversationStore};
use intent::KeywordClassifier;
use llm::OpenRouterClient;
use pipeline::{MessagePipeline, INTERNAL_ERROR_REPLY};
use std::sync::Arc;
use std::time::Duration;
use telegram::{InboundEvent, Messenger, TelegramApi};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use weather::WeatherApiClient;

const POLL_TIMEOUT_SECS: u64 = 50;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "govorun=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = Config::from_env()?;

    let store = ConversationStore::load(&config.history_path);
    tracing::info!(
        path = %config.history_path.display(),
        users = store.len(),
        "histories loaded"
    );

    let api = Arc::new(TelegramApi::new(&config.telegram_token, config.admin_user_id));
    let bot_name = api.get_me().await?;
    tracing::info!(bot = %bot_name, model = %config.chat_model, "connected to Telegram");

    let gateway = Arc::new(OpenRouterClient::new(
        &config.openrouter_api_key,
        &config.chat_model,
        &config.vision_model,
    ));
    let provider = Arc::new(WeatherApiClient::new(&config.weatherapi_key));
    let pipeline = Arc::new(MessagePipeline::new(
        store,
        gateway,
        provider,
        api.clone(),
        Box::new(KeywordClassifier::new()),
        config::SYSTEM_PROMPT,
    ));

    tracing::info!("bot started");
    let mut offset = 0i64;
    loop {
        let updates = match api.poll_updates(offset, POLL_TIMEOUT_SECS).await {
            Ok(updates) => updates,
            Err(err) => {
                tracing::warn!(error = %err, "getUpdates failed, backing off");
                tokio::time::sleep(Duration::from_secs(3)).await;
                continue;
            }
        };

        for (update_id, event) in updates {
            offset = offset.max(update_id + 1);
            let api = api.clone();
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                dispatch(event, &pipeline, &api).await;
            });
        }
    }
}

/// Top-level failure guard for one update: errors become a user-visible
/// apology plus an admin notification, never a crash.
async fn dispatch(event: InboundEvent, pipeline: &MessagePipeline, api: &TelegramApi) {
    let user_id = event.user_id();
    let outcome = match event {
        InboundEvent::Command { user_id, command } => match command.as_str() {
            "start" | "help" => api.send_greeting(user_id).await,
            _ => Ok(()),
        },
        InboundEvent::Text { user_id, text } => {
            pipeline.handle_message(user_id, &text, epoch_now()).await
        }
        InboundEvent::Photo {
            user_id,
            file_id,
            caption,
        } => match api.download_photo(&file_id).await {
            Ok(image) => {
                pipeline
                    .handle_photo(user_id, &image, caption.as_deref(), epoch_now())
                    .await
            }
            Err(err) => Err(err),
        },
    };

    if let Err(err) = outcome {
        tracing::error!(user_id, error = %err, "update handling failed");
        let _ = api.reply(user_id, INTERNAL_ERROR_REPLY).await;
        api.notify_admin(&format!("❗️ Ошибка у пользователя {user_id}:\n{err}"))
            .await;
    }
}
