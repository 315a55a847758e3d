//! Completion backend abstraction
//!
//! A common interface over the text and vision completion services.

mod error;
mod openrouter;

pub use error::{BackendError, BackendErrorKind};
pub use openrouter::OpenRouterClient;

use crate::history::ChatMessage;
use async_trait::async_trait;

/// Common interface for completion backends
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Chat-style completion over the full message history.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, BackendError>;

    /// Describe an image, optionally steered by the user's caption.
    async fn describe_image(
        &self,
        image: &[u8],
        caption: Option<&str>,
    ) -> Result<String, BackendError>;
}
