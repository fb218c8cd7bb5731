//! In-memory chat store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use cortex_core::error::MemoryError;
use cortex_core::history::{ChatHistory, ChatName, ChatStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Keeps saved chats in a sorted map. Nothing survives the process.
pub struct InMemoryChatStore {
    chats: Arc<RwLock<BTreeMap<ChatName, ChatHistory>>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self {
            chats: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl Default for InMemoryChatStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn list(&self) -> Result<Vec<ChatName>, MemoryError> {
        Ok(self.chats.read().await.keys().cloned().collect())
    }

    async fn load(&self, name: &ChatName) -> Result<ChatHistory, MemoryError> {
        self.chats
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| MemoryError::NotFound(name.to_string()))
    }

    async fn save(&self, history: &ChatHistory) -> Result<(), MemoryError> {
        self.chats
            .write()
            .await
            .insert(history.name.clone(), history.clone());
        Ok(())
    }

    async fn delete(&self, name: &ChatName) -> Result<bool, MemoryError> {
        Ok(self.chats.write().await.remove(name).is_some())
    }

    async fn exists(&self, name: &ChatName) -> Result<bool, MemoryError> {
        Ok(self.chats.read().await.contains_key(name))
    }
}
