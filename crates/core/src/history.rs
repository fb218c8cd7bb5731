//! Chat history persistence: named, saved conversations.
//!
//! A [`ChatHistory`] is created or overwritten on save, read by name and
//! deleted on explicit request. Names double as file stems in the file
//! store, so they are validated up front by [`ChatName`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::MemoryError;
use crate::message::Message;

/// Longest accepted chat name, in characters.
pub const MAX_CHAT_NAME_LEN: usize = 128;

/// A validated chat name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ChatName(String);

impl ChatName {
    /// Validate a user-supplied name.
    ///
    /// Accepts letters, digits, space, `-`, `_` and `.`; rejects empty
    /// names, names over [`MAX_CHAT_NAME_LEN`] characters, leading dots and
    /// anything that could act as a path separator.
    pub fn parse(raw: &str) -> std::result::Result<Self, MemoryError> {
        let name = raw.trim();
        let invalid = |reason: &str| MemoryError::InvalidName {
            name: raw.to_string(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if name.chars().count() > MAX_CHAT_NAME_LEN {
            return Err(invalid("name is too long"));
        }
        if name.starts_with('.') {
            return Err(invalid("name must not start with a dot"));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(invalid("path separators are not allowed"));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.')))
        {
            return Err(invalid(&format!("character '{bad}' is not allowed")));
        }

        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ChatName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ChatName::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// A named, persisted sequence of messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatHistory {
    pub name: ChatName,
    pub messages: Vec<Message>,
    pub saved_at: DateTime<Utc>,
}

impl ChatHistory {
    pub fn new(name: ChatName, messages: Vec<Message>) -> Self {
        Self {
            name,
            messages,
            saved_at: Utc::now(),
        }
    }
}

/// Storage for named chat histories.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// A human-readable name for this backend.
    fn name(&self) -> &str;

    /// Saved chat names, sorted.
    async fn list(&self) -> std::result::Result<Vec<ChatName>, MemoryError>;

    /// Load a chat by name. Missing chats are `MemoryError::NotFound`.
    async fn load(&self, name: &ChatName) -> std::result::Result<ChatHistory, MemoryError>;

    /// Create or overwrite a chat.
    async fn save(&self, history: &ChatHistory) -> std::result::Result<(), MemoryError>;

    /// Delete a chat. Returns whether it existed.
    async fn delete(&self, name: &ChatName) -> std::result::Result<bool, MemoryError>;

    async fn exists(&self, name: &ChatName) -> std::result::Result<bool, MemoryError> {
        match self.load(name).await {
            Ok(_) => Ok(true),
            Err(MemoryError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
