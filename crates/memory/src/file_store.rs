//! File-based chat store: one JSON file per saved chat.
//!
//! Storage location: `<history.dir>/<name>.json` (default `~/.cortex/chats`).
//!
//! Files are written as `{"name", "messages", "saved_at"}`. A bare JSON array
//! of `{role, content}` messages is also accepted on load, so hand-written or
//! exported chats can be dropped into the directory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cortex_core::error::MemoryError;
use cortex_core::history::{ChatHistory, ChatName, ChatStore};
use cortex_core::message::Message;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A directory of `<name>.json` chat files.
pub struct FileChatStore {
    dir: PathBuf,
}

/// Either on-disk layout.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredChat {
    Full {
        messages: Vec<Message>,
        #[serde(default)]
        saved_at: Option<DateTime<Utc>>,
    },
    Bare(Vec<Message>),
}

impl FileChatStore {
    /// Create a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "File chat store opened");
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &ChatName) -> PathBuf {
        self.dir.join(format!("{}.json", name.as_str()))
    }

    fn parse(name: &ChatName, content: &str) -> Result<ChatHistory, MemoryError> {
        let stored: StoredChat =
            serde_json::from_str(content).map_err(|e| MemoryError::Corrupted {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        let (messages, saved_at) = match stored {
            StoredChat::Full { messages, saved_at } => (messages, saved_at),
            StoredChat::Bare(messages) => (messages, None),
        };

        Ok(ChatHistory {
            name: name.clone(),
            messages,
            saved_at: saved_at.unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl ChatStore for FileChatStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn list(&self) -> Result<Vec<ChatName>, MemoryError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(d) => d,
            // Nothing saved yet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(MemoryError::Storage(format!(
                    "Failed to read chat directory: {e}"
                )));
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to read chat directory: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match ChatName::parse(stem) {
                Ok(name) => names.push(name),
                Err(_) => debug!(file = %path.display(), "Skipping file with invalid chat name"),
            }
        }

        names.sort();
        Ok(names)
    }

    async fn load(&self, name: &ChatName) -> Result<ChatHistory, MemoryError> {
        let path = self.path_for(name);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MemoryError::NotFound(name.to_string()));
            }
            Err(e) => {
                return Err(MemoryError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        Self::parse(name, &content).inspect_err(|e| {
            warn!(chat = %name, error = %e, "Chat file could not be parsed");
        })
    }

    async fn save(&self, history: &ChatHistory) -> Result<(), MemoryError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            MemoryError::Storage(format!("Failed to create chat directory: {e}"))
        })?;

        let json = serde_json::to_string_pretty(history)
            .map_err(|e| MemoryError::Storage(format!("Failed to serialize chat: {e}")))?;

        // Write to a hidden temp file, then rename over the target.
        // Chat names never start with a dot, so the temp name cannot clash.
        let path = self.path_for(&history.name);
        let tmp = self.dir.join(format!(".{}.json.tmp", history.name.as_str()));
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to write chat file: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to write chat file: {e}")))?;

        debug!(chat = %history.name, messages = history.messages.len(), "Chat saved");
        Ok(())
    }

    async fn delete(&self, name: &ChatName) -> Result<bool, MemoryError> {
        match tokio::fs::remove_file(self.path_for(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MemoryError::Storage(format!("Failed to delete chat: {e}"))),
        }
    }

    async fn exists(&self, name: &ChatName) -> Result<bool, MemoryError> {
        Ok(tokio::fs::try_exists(self.path_for(name))
            .await
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::message::Role;
    use tempfile::TempDir;

    fn name(s: &str) -> ChatName {
        ChatName::parse(s).unwrap()
    }

    fn sample(n: &str) -> ChatHistory {
        ChatHistory::new(
            name(n),
            vec![Message::user("What is BTC at?"), Message::assistant("About 60k USD.")],
        )
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = FileChatStore::new(dir.path());

        store.save(&sample("prices")).await.unwrap();
        let loaded = store.load(&name("prices")).await.unwrap();

        assert_eq!(loaded.name.as_str(), "prices");
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[1].role, Role::Assistant);
        assert!(dir.path().join("prices.json").exists());
    }

    #[tokio::test]
    async fn save_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = FileChatStore::new(dir.path());

        store.save(&sample("work")).await.unwrap();
        store
            .save(&ChatHistory::new(name("work"), vec![Message::user("only one")]))
            .await
            .unwrap();

        let loaded = store.load(&name("work")).await.unwrap();
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_is_sorted_and_skips_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = FileChatStore::new(dir.path());

        store.save(&sample("zeta")).await.unwrap();
        store.save(&sample("alpha")).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a chat").unwrap();
        std::fs::write(dir.path().join(".hidden.json"), "[]").unwrap();

        let names: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn list_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileChatStore::new(dir.path().join("does-not-exist"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FileChatStore::new(dir.path());
        let err = store.load(&name("ghost")).await.unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)));
        assert!(!store.exists(&name("ghost")).await.unwrap());
    }

    #[tokio::test]
    async fn load_accepts_bare_message_array() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("legacy.json"),
            r#"[{"role":"user","content":"hola"},{"role":"assistant","content":"¡Hola!"}]"#,
        )
        .unwrap();

        let store = FileChatStore::new(dir.path());
        let loaded = store.load(&name("legacy")).await.unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[0].content, "hola");
    }

    #[tokio::test]
    async fn corrupted_file_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

        let store = FileChatStore::new(dir.path());
        let err = store.load(&name("broken")).await.unwrap_err();
        assert!(matches!(err, MemoryError::Corrupted { .. }));
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let dir = TempDir::new().unwrap();
        let store = FileChatStore::new(dir.path());

        store.save(&sample("tmp")).await.unwrap();
        assert!(store.exists(&name("tmp")).await.unwrap());
        assert!(store.delete(&name("tmp")).await.unwrap());
        assert!(!store.delete(&name("tmp")).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }
}
