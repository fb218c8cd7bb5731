//! End-to-end integration tests for the Cortex assistant.
//!
//! These tests exercise the full pipeline from user input to streamed
//! output: tool-call extraction, tool execution, the decision and final
//! passes, chat persistence and the HTTP surface.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use cortex_agent::{AgentStreamEvent, Assistant, TurnSummary};
use cortex_config::AppConfig;
use cortex_core::error::{Error, ProviderError, ToolError};
use cortex_core::event::EventBus;
use cortex_core::history::{ChatName, ChatStore};
use cortex_core::message::{Message, Role};
use cortex_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage,
};
use cortex_core::tool::{Tool, ToolCall, ToolKind, ToolRegistry, ToolResult};
use cortex_memory::FileChatStore;

// ── Mock Provider ────────────────────────────────────────────────────────

/// A provider that streams scripted replies word by word and records the
/// requests it receives.
struct ScriptedProvider {
    replies: std::sync::Mutex<VecDeque<String>>,
    requests: std::sync::Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: std::sync::Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, index: usize) -> ProviderRequest {
        self.requests.lock().unwrap()[index].clone()
    }

    fn next(&self, request: ProviderRequest) -> Result<String, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 500,
                message: "script exhausted".into(),
            })
    }
}

fn usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        let text = self.next(request)?;
        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage: Some(usage()),
            model,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let text = self.next(request)?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        tokio::spawn(async move {
            for word in text.split_inclusive(' ') {
                if tx.send(Ok(StreamChunk::delta(word))).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(Ok(StreamChunk::finished(Some(usage())))).await;
        });
        Ok(rx)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(vec!["e2e-model".into()])
    }
}

// ── Mock Tools ───────────────────────────────────────────────────────────

struct FakeTool {
    kind: ToolKind,
    reply: Option<&'static str>,
    calls: Arc<AtomicUsize>,
}

impl FakeTool {
    fn new(kind: ToolKind, reply: Option<&'static str>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                kind,
                reply,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait::async_trait]
impl Tool for FakeTool {
    fn kind(&self) -> ToolKind {
        self.kind
    }

    fn description(&self) -> &str {
        "Fake tool for end-to-end tests"
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.reply {
            Some(reply) => Ok(ToolResult::ok(format!("{reply}: {}", call.argument()))),
            None => Err(ToolError::ExecutionFailed {
                tool_name: self.kind.name().into(),
                reason: "service unavailable".into(),
            }),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

struct Fixture {
    assistant: Arc<Assistant>,
    provider: Arc<ScriptedProvider>,
    search_calls: Arc<AtomicUsize>,
    price_calls: Arc<AtomicUsize>,
}

async fn fixture(replies: &[&str], max_iterations: u32) -> Fixture {
    let provider = Arc::new(ScriptedProvider::new(replies));
    let (search, search_calls) = FakeTool::new(ToolKind::WebSearch, Some("Top result"));
    let (price, price_calls) = FakeTool::new(ToolKind::CryptoPrice, Some("USD 64000"));
    let (video, _) = FakeTool::new(ToolKind::VideoSearch, None);

    let mut registry = ToolRegistry::new();
    registry.register(Box::new(search));
    registry.register(Box::new(price));
    registry.register(Box::new(video));

    let assistant = Assistant::new(
        provider.clone(),
        Arc::new(registry),
        Arc::new(EventBus::default()),
    )
    .with_persona("You are Cortex, a helpful assistant.")
    .with_max_iterations(max_iterations);
    let assistant = Arc::new(assistant);
    assistant.load_model("e2e-model").await.unwrap();

    Fixture {
        assistant,
        provider,
        search_calls,
        price_calls,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_plain_answer_needs_one_model_call() {
    let f = fixture(&["Hello! How can I help?"], 3).await;

    let summary = f.assistant.chat("hi").await.unwrap();

    assert_eq!(summary.response, "Hello! How can I help?");
    assert!(summary.tool_calls.is_empty());
    assert_eq!(summary.iterations, 0);
    assert_eq!(f.provider.calls(), 1);

    let conv = f.assistant.snapshot().await;
    assert_eq!(conv.messages.len(), 2);
    assert_eq!(conv.messages[0].role, Role::User);
    assert_eq!(conv.messages[1].role, Role::Assistant);
}

#[tokio::test]
async fn e2e_tool_round_then_final_answer() {
    let f = fixture(
        &[
            "Let me check. [Funcion: 'crypto_price', query: 'bitcoin']",
            "READY",
            "Bitcoin trades at 64000 USD.",
        ],
        3,
    )
    .await;

    let mut rx = f.assistant.submit("What is BTC worth?").await.unwrap();
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let done = event.is_done();
        events.push(event);
        if done {
            break;
        }
    }

    let kinds: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
    let call = kinds.iter().position(|k| *k == "tool_call").unwrap();
    let result = kinds.iter().position(|k| *k == "tool_result").unwrap();
    let thought = kinds.iter().position(|k| *k == "thought").unwrap();
    assert!(call < result && result < thought);
    assert_eq!(kinds.last(), Some(&"done"));

    let mut summary = TurnSummary::default();
    for event in events {
        summary.apply(event);
    }
    assert_eq!(summary.response, "Bitcoin trades at 64000 USD.");
    assert_eq!(summary.tool_calls.len(), 1);
    assert_eq!(summary.tool_calls[0].output, "USD 64000: bitcoin");
    assert_eq!(f.price_calls.load(Ordering::SeqCst), 1);
    assert_eq!(f.provider.calls(), 3);

    // The final request carried the tool result but stored no prompts.
    let last = f.provider.request(2);
    assert!(last.messages.iter().any(|m| m.content.contains("USD 64000: bitcoin")));

    let conv = f.assistant.snapshot().await;
    let roles: Vec<Role> = conv.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::System, Role::Assistant]
    );
}

#[tokio::test]
async fn e2e_repeated_call_is_not_reexecuted() {
    let f = fixture(
        &[
            "[Funcion: 'web_search', query: 'rust 2024']",
            "[Funcion: 'web_search', query: 'rust 2024']",
            "Rust 2024 shipped with Rust 1.85.",
        ],
        3,
    )
    .await;

    let summary = f.assistant.chat("what is new in rust 2024").await.unwrap();

    assert_eq!(f.search_calls.load(Ordering::SeqCst), 1);
    assert_eq!(summary.tool_calls.len(), 1);
    assert_eq!(summary.response, "Rust 2024 shipped with Rust 1.85.");
}

#[tokio::test]
async fn e2e_loop_stops_at_cap() {
    let f = fixture(
        &[
            "[Funcion: 'web_search', query: 'one']",
            "[Funcion: 'web_search', query: 'two']",
            "Here is what I found.",
        ],
        1,
    )
    .await;

    let summary = f.assistant.chat("keep searching").await.unwrap();

    assert!(summary.hit_cap);
    assert_eq!(summary.iterations, 1);
    assert_eq!(f.search_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn e2e_tool_failure_is_inline() {
    let f = fixture(
        &[
            "[Funcion: 'video_search', query: 'rust talks']",
            "READY",
            "Video search is down right now.",
        ],
        3,
    )
    .await;

    let summary = f.assistant.chat("find rust talks").await.unwrap();

    assert_eq!(summary.tool_calls.len(), 1);
    assert!(!summary.tool_calls[0].success);
    assert!(summary.tool_calls[0].output.starts_with("Error:"));
    assert!(summary.error.is_none());
    assert_eq!(summary.response, "Video search is down right now.");
}

#[tokio::test]
async fn e2e_informal_variants_are_executed() {
    let f = fixture(
        &[
            r#"I'll use {"function": "crypto_price", "query": "eth"} and web_search(query='ethereum news')"#,
            "READY",
            "ETH is up.",
        ],
        3,
    )
    .await;

    let summary = f.assistant.chat("eth?").await.unwrap();

    assert_eq!(f.price_calls.load(Ordering::SeqCst), 1);
    assert_eq!(f.search_calls.load(Ordering::SeqCst), 1);
    assert_eq!(summary.tool_calls.len(), 2);
    assert_eq!(summary.tool_calls[0].name, "crypto_price");
}

#[tokio::test]
async fn e2e_without_model_is_rejected() {
    let assistant = Arc::new(Assistant::new(
        Arc::new(ScriptedProvider::new(&["never"])),
        Arc::new(ToolRegistry::new()),
        Arc::new(EventBus::default()),
    ));

    let err = assistant.chat("hello").await.unwrap_err();
    assert!(matches!(err, Error::ModelNotLoaded));
}

#[tokio::test]
async fn e2e_chat_history_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileChatStore::new(dir.path());
    let f = fixture(&["Paris."], 3).await;

    f.assistant.chat("Capital of France?").await.unwrap();

    let name = ChatName::parse("geography").unwrap();
    store.save(&f.assistant.to_history(name.clone()).await).await.unwrap();

    f.assistant.reset().await.unwrap();
    assert!(f.assistant.snapshot().await.is_empty());

    let history = store.load(&name).await.unwrap();
    f.assistant.load_history(history).await.unwrap();
    let conv = f.assistant.snapshot().await;
    assert_eq!(conv.messages.len(), 2);
    assert_eq!(conv.messages[1].content, "Paris.");

    assert!(ChatName::parse("../escape").is_err());
    assert_eq!(store.list().await.unwrap(), vec![name]);
}

#[tokio::test]
async fn e2e_gateway_health_and_tools() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.history.dir = dir.path().to_path_buf();
    let app = cortex_gateway::build_router(cortex_gateway::build_state(&config));

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/v1/tools").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let names: Vec<&str> = json["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(names.contains(&"web_search"));
    assert!(names.contains(&"crypto_price"));
    assert!(!names.contains(&"generate_image"));
}

#[tokio::test]
async fn e2e_stream_events_serialize_for_clients() {
    let event = AgentStreamEvent::ToolCall {
        name: "web_search".into(),
        query: "rust".into(),
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "tool_call");
    assert_eq!(json["name"], "web_search");
}
