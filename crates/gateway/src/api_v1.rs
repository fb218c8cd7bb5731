//! HTTP API v1: the assistant's REST, SSE and WebSocket surface.
//!
//! Endpoints:
//!
//! - `POST   /v1/chat`: Run one turn, get the summary
//! - `POST   /v1/chat/stream`: Run one turn, get an SSE stream
//! - `GET    /v1/ws`: WebSocket for messages and stop requests
//! - `POST   /v1/stop`: Stop the running turn
//! - `GET    /v1/model`: Loaded model
//! - `GET    /v1/models`: Models served by the runtime
//! - `POST   /v1/model/load`: Load a model
//! - `POST   /v1/model/unload`: Unload the model
//! - `GET    /v1/conversation`: Current conversation
//! - `POST   /v1/conversation/reset`: Start a new conversation
//! - `GET    /v1/chats`: Saved chat names
//! - `GET    /v1/chats/{name}`: Read a saved chat
//! - `PUT    /v1/chats/{name}`: Save the current conversation
//! - `DELETE /v1/chats/{name}`: Delete a saved chat
//! - `POST   /v1/chats/{name}/load`: Replace the conversation with a saved chat
//! - `GET    /v1/tools`: Registered tools
//! - `POST   /v1/documents`: Add a document to the retrieval index
//! - `GET    /v1/logs`: SSE stream of domain events

use axum::{
    Router,
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use futures::{Sink, SinkExt, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tracing::{info, warn};

use cortex_agent::{AgentStreamEvent, Assistant, ToolCallReport};
use cortex_config::AppConfig;
use cortex_core::error::{Error, MemoryError};
use cortex_core::history::{ChatHistory, ChatName, ChatStore};
use cortex_core::message::Conversation;
use cortex_core::tool::ToolDefinition;

// ── State ─────────────────────────────────────────────────────────────────

/// Shared state for the v1 API.
pub struct ApiV1State {
    pub assistant: Arc<Assistant>,
    pub chats: Arc<dyn ChatStore>,
    pub config: AppConfig,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

pub type SharedApiState = Arc<ApiV1State>;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/ws", get(ws_handler))
        .route("/stop", post(stop_handler))
        .route("/model", get(model_handler))
        .route("/models", get(list_models_handler))
        .route("/model/load", post(load_model_handler))
        .route("/model/unload", post(unload_model_handler))
        .route("/conversation", get(conversation_handler))
        .route("/conversation/reset", post(reset_handler))
        .route("/chats", get(list_chats_handler))
        .route(
            "/chats/{name}",
            get(get_chat_handler)
                .put(save_chat_handler)
                .delete(delete_chat_handler),
        )
        .route("/chats/{name}/load", post(load_chat_handler))
        .route("/tools", get(list_tools_handler))
        .route("/documents", post(ingest_document_handler))
        .route("/logs", get(log_stream_handler))
        .with_state(state)
}

// ── Errors ────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// An error with the HTTP status it maps to.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::Busy => StatusCode::CONFLICT,
            Error::ModelNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            Error::EmptyMessage | Error::Config { .. } => StatusCode::BAD_REQUEST,
            Error::Memory(MemoryError::NotFound(_)) => StatusCode::NOT_FOUND,
            Error::Memory(MemoryError::InvalidName { .. }) => StatusCode::BAD_REQUEST,
            Error::Provider(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(status = %status, error = %e, "Request failed");
        }
        Self::new(status, e.to_string())
    }
}

impl From<MemoryError> for ApiError {
    fn from(e: MemoryError) -> Self {
        Error::from(e).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn sse_event(event: &AgentStreamEvent) -> SseEvent {
    let data = serde_json::to_string(event).unwrap_or_default();
    SseEvent::default().event(event.event_type()).data(data)
}

// ── Chat ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub conversation_id: String,
    pub tool_calls: Vec<ToolCallReport>,
    pub iterations: u32,
    pub tokens: u32,
    pub stopped: bool,
    pub hit_cap: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `POST /v1/chat`: Run one turn and return its summary.
async fn chat_handler(
    State(state): State<SharedApiState>,
    Json(payload): Json<ChatRequest>,
) -> ApiResult<ChatResponse> {
    info!(message_len = payload.message.len(), "v1/chat request");
    let summary = state.assistant.chat(payload.message).await?;

    Ok(Json(ChatResponse {
        response: summary.response,
        conversation_id: summary.conversation_id,
        tool_calls: summary.tool_calls,
        iterations: summary.iterations,
        tokens: summary.tokens,
        stopped: summary.stopped,
        hit_cap: summary.hit_cap,
        error: summary.error,
    }))
}

/// `POST /v1/chat/stream`: Run one turn, receive an SSE stream of events.
async fn chat_stream_handler(
    State(state): State<SharedApiState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    info!(message_len = payload.message.len(), "v1/chat/stream SSE request");
    let rx = state.assistant.submit(payload.message).await?;
    let stream = ReceiverStream::new(rx).map(|event| Ok(sse_event(&event)));
    Ok(Sse::new(stream))
}

#[derive(Serialize, Deserialize)]
struct StopResponse {
    stopped: bool,
}

/// `POST /v1/stop`: `stopped` is true when a turn was running.
async fn stop_handler(State(state): State<SharedApiState>) -> Json<StopResponse> {
    Json(StopResponse {
        stopped: state.assistant.request_stop(),
    })
}

// ── WebSocket ─────────────────────────────────────────────────────────────

/// `GET /v1/ws`: Bidirectional WebSocket connection.
///
/// - Client → Server: `{"type": "message", "content": "..."}` or `{"type": "stop"}`
/// - Server → Client: `AgentStreamEvent` JSON frames
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedApiState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// WebSocket message from the client.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsClientMessage {
    Message { content: String },
    Stop,
}

async fn next_event(turn: &mut Option<mpsc::Receiver<AgentStreamEvent>>) -> Option<AgentStreamEvent> {
    match turn {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_event<Tx>(sink: &mut Tx, event: &AgentStreamEvent) -> bool
where
    Tx: Sink<WsMessage> + Unpin,
{
    let json = serde_json::to_string(event).unwrap_or_default();
    sink.send(WsMessage::Text(json.into())).await.is_ok()
}

async fn handle_ws_connection(socket: WebSocket, state: SharedApiState) {
    let (sink, stream) = futures::StreamExt::split(socket);
    serve_ws(sink, stream, state).await;
}

/// Read client frames and forward turn events until the client goes away.
async fn serve_ws<Tx, Rx, E>(mut sink: Tx, mut stream: Rx, state: SharedApiState)
where
    Tx: Sink<WsMessage> + Unpin,
    Rx: Stream<Item = Result<WsMessage, E>> + Unpin,
{
    info!("WebSocket connection established");
    let mut turn: Option<mpsc::Receiver<AgentStreamEvent>> = None;

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue, // ignore binary, ping, pong
                };

                let reply = match serde_json::from_str::<WsClientMessage>(text.as_str()) {
                    Ok(WsClientMessage::Message { content }) => {
                        match state.assistant.submit(content).await {
                            Ok(rx) => {
                                turn = Some(rx);
                                None
                            }
                            Err(e) => Some(e.to_string()),
                        }
                    }
                    Ok(WsClientMessage::Stop) => {
                        state.assistant.request_stop();
                        None
                    }
                    Err(e) => Some(format!("Invalid message: {e}")),
                };

                if let Some(message) = reply
                    && !send_event(&mut sink, &AgentStreamEvent::Error { message }).await
                {
                    break;
                }
            }
            event = next_event(&mut turn), if turn.is_some() => {
                match event {
                    Some(event) => {
                        if !send_event(&mut sink, &event).await {
                            break; // client disconnected; the turn still completes
                        }
                    }
                    None => turn = None,
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

// ── Model ─────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct ModelStatus {
    pub loaded: bool,
    pub model: Option<String>,
    pub busy: bool,
}

async fn model_status(state: &ApiV1State) -> ModelStatus {
    let model = state.assistant.loaded_model().await;
    ModelStatus {
        loaded: model.is_some(),
        model,
        busy: state.assistant.is_busy(),
    }
}

async fn model_handler(State(state): State<SharedApiState>) -> Json<ModelStatus> {
    Json(model_status(&state).await)
}

#[derive(Serialize, Deserialize)]
struct ModelListResponse {
    models: Vec<String>,
}

async fn list_models_handler(State(state): State<SharedApiState>) -> ApiResult<ModelListResponse> {
    Ok(Json(ModelListResponse {
        models: state.assistant.list_models().await?,
    }))
}

#[derive(Deserialize)]
struct LoadModelRequest {
    /// Defaults to `model.name` from config.
    #[serde(default)]
    model: Option<String>,
}

async fn load_model_handler(
    State(state): State<SharedApiState>,
    payload: Option<Json<LoadModelRequest>>,
) -> ApiResult<ModelStatus> {
    let name = payload
        .and_then(|Json(req)| req.model)
        .unwrap_or_else(|| state.config.model.name.clone());
    state.assistant.load_model(&name).await?;
    Ok(Json(model_status(&state).await))
}

async fn unload_model_handler(State(state): State<SharedApiState>) -> ApiResult<ModelStatus> {
    if let Some(previous) = state.assistant.unload_model().await? {
        info!(model = %previous, "Model unloaded");
    }
    Ok(Json(model_status(&state).await))
}

// ── Conversation ──────────────────────────────────────────────────────────

async fn conversation_handler(State(state): State<SharedApiState>) -> Json<Conversation> {
    Json(state.assistant.snapshot().await)
}

#[derive(Serialize, Deserialize)]
struct ResetResponse {
    conversation_id: String,
}

async fn reset_handler(State(state): State<SharedApiState>) -> ApiResult<ResetResponse> {
    state.assistant.reset().await?;
    Ok(Json(ResetResponse {
        conversation_id: state.assistant.snapshot().await.id,
    }))
}

// ── Saved chats ───────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct ChatListResponse {
    chats: Vec<String>,
    count: usize,
}

#[derive(Serialize, Deserialize)]
struct ChatSavedResponse {
    name: String,
    messages: usize,
}

#[derive(Serialize, Deserialize)]
struct ChatDeletedResponse {
    deleted: bool,
}

async fn list_chats_handler(State(state): State<SharedApiState>) -> ApiResult<ChatListResponse> {
    let chats: Vec<String> = state
        .chats
        .list()
        .await?
        .into_iter()
        .map(|n| n.to_string())
        .collect();
    Ok(Json(ChatListResponse {
        count: chats.len(),
        chats,
    }))
}

async fn get_chat_handler(
    State(state): State<SharedApiState>,
    Path(name): Path<String>,
) -> ApiResult<ChatHistory> {
    let name = ChatName::parse(&name)?;
    Ok(Json(state.chats.load(&name).await?))
}

/// `PUT /v1/chats/{name}`: Save the current conversation under `name`.
async fn save_chat_handler(
    State(state): State<SharedApiState>,
    Path(name): Path<String>,
) -> ApiResult<ChatSavedResponse> {
    let name = ChatName::parse(&name)?;
    let history = state.assistant.to_history(name).await;
    state.chats.save(&history).await?;
    info!(chat = %history.name, messages = history.messages.len(), "Chat saved");
    Ok(Json(ChatSavedResponse {
        name: history.name.to_string(),
        messages: history.messages.len(),
    }))
}

async fn delete_chat_handler(
    State(state): State<SharedApiState>,
    Path(name): Path<String>,
) -> ApiResult<ChatDeletedResponse> {
    let name = ChatName::parse(&name)?;
    if !state.chats.delete(&name).await? {
        return Err(MemoryError::NotFound(name.to_string()).into());
    }
    Ok(Json(ChatDeletedResponse { deleted: true }))
}

/// `POST /v1/chats/{name}/load`: Replace the current conversation.
async fn load_chat_handler(
    State(state): State<SharedApiState>,
    Path(name): Path<String>,
) -> ApiResult<ChatSavedResponse> {
    let name = ChatName::parse(&name)?;
    let history = state.chats.load(&name).await?;
    let response = ChatSavedResponse {
        name: history.name.to_string(),
        messages: history.messages.len(),
    };
    state.assistant.load_history(history).await?;
    Ok(Json(response))
}

// ── Tools & documents ─────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct ToolListResponse {
    tools: Vec<ToolDefinition>,
    count: usize,
}

async fn list_tools_handler(State(state): State<SharedApiState>) -> Json<ToolListResponse> {
    let tools = state.assistant.tools();
    Json(ToolListResponse {
        count: tools.len(),
        tools,
    })
}

#[derive(Deserialize)]
struct IngestDocumentRequest {
    content: String,
    #[serde(default = "default_source")]
    source: String,
}

fn default_source() -> String {
    "document".into()
}

#[derive(Serialize, Deserialize)]
struct IngestDocumentResponse {
    source: String,
    chunks: usize,
    total_chunks: usize,
}

async fn ingest_document_handler(
    State(state): State<SharedApiState>,
    Json(req): Json<IngestDocumentRequest>,
) -> Result<(StatusCode, Json<IngestDocumentResponse>), ApiError> {
    let Some(retriever) = state.assistant.retriever() else {
        return Err(ApiError::new(
            StatusCode::NOT_IMPLEMENTED,
            "document retrieval is disabled (set rag.enabled = true)",
        ));
    };
    if req.content.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "document is empty"));
    }

    let chunks = retriever.add_document(&req.source, &req.content).await?;
    let total_chunks = retriever.count().await?;
    info!(source = %req.source, chunks, "Document indexed");

    Ok((
        StatusCode::CREATED,
        Json(IngestDocumentResponse {
            source: req.source,
            chunks,
            total_chunks,
        }),
    ))
}

// ── SSE Log Stream ────────────────────────────────────────────────────────

/// `GET /v1/logs`: SSE stream of domain events.
async fn log_stream_handler(
    State(state): State<SharedApiState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.assistant.event_bus().subscribe();
    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event| {
            let data = serde_json::to_string(event.as_ref()).unwrap_or_default();
            Ok(SseEvent::default().event(event.kind()).data(data))
        });

    Sse::new(stream)
}

// ── Tests ─────────────────────────────────────────────────────────────────
