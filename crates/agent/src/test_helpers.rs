//! Shared test doubles for the agent crate.

use async_trait::async_trait;
use cortex_core::error::{ProviderError, ToolError};
use cortex_core::message::Message;
use cortex_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage,
};
use cortex_core::tool::{Tool, ToolCall, ToolKind, ToolRegistry, ToolResult};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// One scripted model reply.
#[derive(Clone)]
pub enum Script {
    /// Streamed word by word.
    Text(String),
    /// The stream cannot be opened at all.
    Fail(ProviderError),
    /// Some text, then a mid-stream error.
    PartialThenFail(String, ProviderError),
}

impl Script {
    pub fn text(s: &str) -> Self {
        Script::Text(s.to_string())
    }
}

/// A provider that streams scripted replies in order and records every
/// request it receives.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
    chunk_delay: Option<Duration>,
    healthy: AtomicBool,
    models: Vec<String>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
            chunk_delay: None,
            healthy: AtomicBool::new(true),
            models: vec!["mock-model".into()],
        }
    }

    pub fn texts(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Script::text(r)).collect())
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next_script(&self, request: ProviderRequest) -> Script {
        self.requests.lock().unwrap().push(request);
        self.scripts.lock().unwrap().pop_front().unwrap_or_else(|| {
            Script::Fail(ProviderError::ApiError {
                status_code: 500,
                message: "script exhausted".into(),
            })
        })
    }
}

fn words(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(str::to_string).collect()
}

fn usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        match self.next_script(request) {
            Script::Text(text) => Ok(ProviderResponse {
                message: Message::assistant(text),
                usage: Some(usage()),
                model,
            }),
            Script::Fail(e) | Script::PartialThenFail(_, e) => Err(e),
        }
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let (chunks, failure) = match self.next_script(request) {
            Script::Text(text) => (words(&text), None),
            Script::Fail(e) => return Err(e),
            Script::PartialThenFail(text, e) => (words(&text), Some(e)),
        };

        let delay = self.chunk_delay;
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for chunk in chunks {
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                if tx.send(Ok(StreamChunk::delta(chunk))).await.is_err() {
                    return;
                }
            }
            let last = match failure {
                Some(e) => Err(e),
                None => Ok(StreamChunk::finished(Some(usage()))),
            };
            let _ = tx.send(last).await;
        });
        Ok(rx)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.models.clone())
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(self.healthy.load(Ordering::SeqCst))
    }
}

/// A tool with a fixed reply that counts its calls.
pub struct MockTool {
    kind: ToolKind,
    reply: Result<String, String>,
    calls: Arc<AtomicUsize>,
    stop_after: Option<Arc<AtomicBool>>,
}

impl MockTool {
    pub fn ok(kind: ToolKind, reply: &str) -> Self {
        Self {
            kind,
            reply: Ok(reply.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
            stop_after: None,
        }
    }

    pub fn failing(kind: ToolKind, reason: &str) -> Self {
        Self {
            reply: Err(reason.to_string()),
            ..Self::ok(kind, "")
        }
    }

    /// Raise `flag` when executed, like a user pressing stop mid-turn.
    pub fn raising(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop_after = Some(flag);
        self
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Tool for MockTool {
    fn kind(&self) -> ToolKind {
        self.kind
    }

    fn description(&self) -> &str {
        "Mock tool"
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(flag) = &self.stop_after {
            flag.store(true, Ordering::SeqCst);
        }
        match &self.reply {
            Ok(reply) => Ok(ToolResult::ok(format!("{reply} ({})", call.argument()))),
            Err(reason) => Err(ToolError::ExecutionFailed {
                tool_name: self.kind.name().to_string(),
                reason: reason.clone(),
            }),
        }
    }
}

pub fn registry(tools: Vec<MockTool>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(Box::new(tool));
    }
    Arc::new(registry)
}
