//! Per-user conversation history and its persistence
//!
//! A single JSON document on disk maps user id to conversation. The store
//! owns retention: users inactive past the threshold are evicted first, then
//! the oldest remaining users until the serialized document fits the byte
//! budget.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Stable identifier of a conversation participant (the Telegram user id).
pub type UserId = i64;

pub const MAX_HISTORY_LENGTH: usize = 20;
pub const MAX_HISTORY_FILE_SIZE: u64 = 10 * 1024 * 1024;
pub const INACTIVITY_DAYS: u64 = 30;

const INACTIVITY_SECS: u64 = INACTIVITY_DAYS * 24 * 3600;

/// Current wall-clock time as epoch seconds.
pub fn epoch_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One history entry. Also the wire shape for chat completion requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Message history plus activity timestamp for one user.
///
/// Invariant: the first message, when present, is the system directive and
/// survives trimming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub messages: Vec<ChatMessage>,
    pub last_active: u64,
}

impl Conversation {
    fn seeded(system_prompt: &str, now: u64) -> Self {
        Self {
            messages: vec![ChatMessage::system(system_prompt)],
            last_active: now,
        }
    }

    /// Cap the history at `MAX_HISTORY_LENGTH`, keeping the leading system
    /// message and the most recent entries.
    fn trim(&mut self) {
        if self.messages.len() <= MAX_HISTORY_LENGTH {
            return;
        }
        let tail_start = self.messages.len() - (MAX_HISTORY_LENGTH - 1);
        let mut kept = Vec::with_capacity(MAX_HISTORY_LENGTH);
        kept.push(self.messages[0].clone());
        kept.extend_from_slice(&self.messages[tail_start..]);
        self.messages = kept;
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("history io: {0}")]
    Io(#[from] std::io::Error),
    #[error("history encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Owner of all per-user conversations and their durable copy.
pub struct ConversationStore {
    path: PathBuf,
    entries: HashMap<UserId, Conversation>,
    size_budget: u64,
}

impl ConversationStore {
    /// Load the store from `path`. A missing or corrupt file degrades to an
    /// empty store; startup never fails on storage.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(map) => map,
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "history file corrupt, starting empty"
                    );
                    HashMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "history file unreadable, starting empty"
                );
                HashMap::new()
            }
        };
        Self {
            path,
            entries,
            size_budget: MAX_HISTORY_FILE_SIZE,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.entries.contains_key(&user_id)
    }

    /// A snapshot of one user's history, empty when the user is unknown.
    pub fn messages(&self, user_id: UserId) -> Vec<ChatMessage> {
        self.entries
            .get(&user_id)
            .map(|conv| conv.messages.clone())
            .unwrap_or_default()
    }

    /// Ensure a conversation exists, seeding it with the system directive.
    /// Returns whether this was a first-time creation.
    pub fn get_or_create(&mut self, user_id: UserId, system_prompt: &str, now: u64) -> bool {
        if self.entries.contains_key(&user_id) {
            return false;
        }
        self.entries
            .insert(user_id, Conversation::seeded(system_prompt, now));
        true
    }

    /// Replace a user's conversation with a fresh system-seeded one.
    pub fn reset(&mut self, user_id: UserId, system_prompt: &str, now: u64) {
        self.entries
            .insert(user_id, Conversation::seeded(system_prompt, now));
    }

    /// Append a message, mark the user active and apply the trim invariant.
    pub fn append(&mut self, user_id: UserId, message: ChatMessage, now: u64) {
        let conv = self.entries.entry(user_id).or_insert_with(|| Conversation {
            messages: Vec::new(),
            last_active: now,
        });
        conv.messages.push(message);
        conv.last_active = now;
        conv.trim();
    }

    /// Run the retention sweep and write the full mapping to disk atomically.
    pub fn persist(&mut self, now: u64) -> Result<(), StoreError> {
        self.sweep(now);
        let body = serde_json::to_vec_pretty(&self.entries)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &body)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Persist, logging failures. The in-memory state stays authoritative
    /// until the next successful write.
    pub fn persist_logged(&mut self, now: u64) {
        if let Err(err) = self.persist(now) {
            tracing::error!(path = %self.path.display(), error = %err, "failed to persist histories");
        }
    }

    /// Inactivity eviction, then size eviction. The order matters: stale
    /// conversations must not count against the byte budget.
    fn sweep(&mut self, now: u64) {
        self.entries
            .retain(|_, conv| now.saturating_sub(conv.last_active) <= INACTIVITY_SECS);

        while !self.entries.is_empty() && self.serialized_len() > self.size_budget {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|&(id, conv)| (conv.last_active, *id))
                .map(|(id, _)| *id);
            if let Some(user_id) = oldest {
                tracing::info!(user_id, "evicting history over size budget");
                self.entries.remove(&user_id);
            }
        }
    }

    fn serialized_len(&self) -> u64 {
        serde_json::to_vec_pretty(&self.entries)
            .map(|body| body.len() as u64)
            .unwrap_or(0)
    }

    #[cfg(test)]
    fn set_size_budget(&mut self, bytes: u64) {
        self.size_budget = bytes;
    }
}
