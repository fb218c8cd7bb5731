//! OpenAI-compatible provider implementation.
//!
//! Talks to llama.cpp's `server` (and anything else that exposes the same
//! `/chat/completions` and `/models` endpoints, such as Ollama or vLLM).
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Model listing and health checks

use async_trait::async_trait;
use cortex_core::error::ProviderError;
use cortex_core::message::Message;
use cortex_core::provider::*;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// An OpenAI-compatible model runtime client.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new client with the default request timeout.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self::with_timeout(name, base_url, api_key, Duration::from_secs(120))
    }

    pub fn with_timeout(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            client,
        }
    }

    /// A llama.cpp server on its default port.
    pub fn llama_cpp(base_url: Option<&str>) -> Self {
        Self::new(
            "llama.cpp",
            base_url.unwrap_or("http://127.0.0.1:8080/v1"),
            None,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.stop.is_empty() {
            body["stop"] = serde_json::json!(request.stop);
        }

        body
    }

    /// Map a non-success HTTP status to a provider error.
    async fn status_error(response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        match status {
            429 => ProviderError::RateLimited {
                retry_after_secs: 5,
            },
            401 | 403 => ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ),
            _ => {
                let error_body = response.text().await.unwrap_or_default();
                warn!(status, body = %error_body, "Model runtime returned error");
                if status == 404 {
                    ProviderError::ModelNotFound(error_body)
                } else {
                    ProviderError::ApiError {
                        status_code: status,
                        message: error_body,
                    }
                }
            }
        }
    }

    fn network_error(e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request, false);

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(Self::network_error)?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice =
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::ApiError {
                    status_code: 200,
                    message: "No choices in response".into(),
                })?;

        Ok(ProviderResponse {
            message: Message::assistant(choice.message.content.unwrap_or_default()),
            usage: api_response.usage.map(Usage::from),
            model: api_response.model.unwrap_or(request.model),
        })
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(Self::network_error)?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(parse_model_list(&body))
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(Self::network_error)?;

        Ok(response.status().is_success())
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request, true);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self
            .authorized(self.client.post(&url))
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(Self::network_error)?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let (tx, rx) = mpsc::channel(64);
        let provider_name = self.name.clone();

        // Read the SSE byte stream and forward parsed chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = SseBuffer::default();
            let mut usage: Option<Usage> = None;

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for event in buffer.push(&bytes) {
                    match event {
                        SseData::Done => {
                            let _ = tx.send(Ok(StreamChunk::finished(usage))).await;
                            return;
                        }
                        SseData::Json(data) => match serde_json::from_str::<StreamResponse>(&data) {
                            Ok(parsed) => {
                                if let Some(u) = parsed.usage {
                                    usage = Some(u.into());
                                }
                                let content = parsed
                                    .choices
                                    .into_iter()
                                    .next()
                                    .and_then(|c| c.delta.content)
                                    .filter(|c| !c.is_empty());
                                if let Some(content) = content
                                    && tx.send(Ok(StreamChunk::delta(content))).await.is_err()
                                {
                                    return; // receiver dropped
                                }
                            }
                            Err(e) => {
                                trace!(
                                    provider = %provider_name,
                                    data = %data,
                                    error = %e,
                                    "Ignoring unparseable SSE chunk"
                                );
                            }
                        },
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx.send(Ok(StreamChunk::finished(usage))).await;
        });

        Ok(rx)
    }
}

/// Extract model ids from a `/models` response body.
///
/// llama.cpp answers with the OpenAI shape (`{"data": [{"id": …}]}`); some
/// builds also include a top-level `models` array with `name`/`model` keys.
fn parse_model_list(body: &serde_json::Value) -> Vec<String> {
    let mut models: Vec<String> = body["data"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|m| m["id"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    if models.is_empty()
        && let Some(arr) = body["models"].as_array()
    {
        models = arr
            .iter()
            .filter_map(|m| {
                m["name"]
                    .as_str()
                    .or_else(|| m["model"].as_str())
                    .map(String::from)
            })
            .collect();
    }

    models
}

// --- SSE line buffering ---

/// One `data:` payload from the event stream.
#[derive(Debug, PartialEq)]
enum SseData {
    Json(String),
    Done,
}

/// Splits a byte stream into SSE `data:` payloads across chunk boundaries.
///
/// Bytes are held until a full line arrives, so a UTF-8 character split
/// across network reads decodes intact.
#[derive(Default)]
struct SseBuffer {
    buffer: Vec<u8>,
}

impl SseBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<SseData> {
        self.buffer.extend_from_slice(bytes);

        let mut out = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let decoded = String::from_utf8_lossy(&raw[..line_end]);
            let line = decoded.trim_end_matches('\r');

            // Skip empty lines and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if data == "[DONE]" {
                    out.push(SseData::Done);
                } else if !data.is_empty() {
                    out.push(SseData::Json(data.to_string()));
                }
            }
        }
        out
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::{get, post};

    #[test]
    fn llama_cpp_constructor() {
        let provider = OpenAiCompatProvider::llama_cpp(None);
        assert_eq!(provider.name(), "llama.cpp");
        assert_eq!(provider.base_url(), "http://127.0.0.1:8080/v1");
        assert!(provider.api_key.is_none());
    }

    #[test]
    fn trailing_slash_and_empty_key_normalized() {
        let provider = OpenAiCompatProvider::new("x", "http://host:1/v1/", Some(String::new()));
        assert_eq!(provider.base_url(), "http://host:1/v1");
        assert!(provider.api_key.is_none());
    }

    #[test]
    fn message_conversion() {
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("Hello"),
            Message::assistant("Hi"),
        ];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 3);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
        assert_eq!(api_messages[2].role, "assistant");
        assert_eq!(api_messages[2].content, "Hi");
    }

    #[test]
    fn request_body_streaming_fields() {
        let req = ProviderRequest::new("qwen", vec![Message::user("hi")]).with_max_tokens(Some(64));
        let body = OpenAiCompatProvider::request_body(&req, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert!(body.get("stop").is_none());
    }

    // --- SSE parsing tests ---

    #[test]
    fn sse_buffer_handles_split_lines() {
        let mut buf = SseBuffer::default();
        let first = buf.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel");
        assert!(first.is_empty());
        let second = buf.push(b"lo\"}}]}\r\n\r\n: keep-alive\ndata: [DONE]\n");
        assert_eq!(second.len(), 2);
        assert!(matches!(&second[0], SseData::Json(d) if d.contains("Hello")));
        assert_eq!(second[1], SseData::Done);
    }

    #[test]
    fn sse_buffer_keeps_multibyte_char_split_across_reads() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"año ¿qué?\"}}]}\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut buf = SseBuffer::default();
        assert!(buf.push(&line[..split]).is_empty());
        let events = buf.push(&line[split..]);

        assert_eq!(events.len(), 1);
        let SseData::Json(data) = &events[0] else {
            panic!("expected a JSON payload");
        };
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("año ¿qué?"));
    }

    #[test]
    fn sse_buffer_accepts_data_without_space() {
        let mut buf = SseBuffer::default();
        let events = buf.push(b"data:[DONE]\n");
        assert_eq!(events, vec![SseData::Done]);
    }

    #[test]
    fn parse_stream_content_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn parse_stream_usage() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        let usage: Usage = parsed.usage.unwrap().into();
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn parse_models_openai_shape() {
        let body = serde_json::json!({"object": "list", "data": [{"id": "qwen2.5-7b"}, {"id": "llama-3"}]});
        assert_eq!(parse_model_list(&body), vec!["qwen2.5-7b", "llama-3"]);
    }

    #[test]
    fn parse_models_llama_cpp_shape() {
        let body = serde_json::json!({"models": [{"name": "gemma.gguf", "model": "gemma.gguf"}]});
        assert_eq!(parse_model_list(&body), vec!["gemma.gguf"]);
    }

    // --- Against a local mock runtime ---

    async fn spawn_runtime(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    #[tokio::test]
    async fn stream_yields_deltas_then_done() {
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":4,\"completion_tokens\":2,\"total_tokens\":6}}\n\n",
            "data: [DONE]\n\n",
        );
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || async move { ([("content-type", "text/event-stream")], sse) }),
        );
        let base = spawn_runtime(app).await;
        let provider = OpenAiCompatProvider::new("test", base, None);

        let mut rx = provider
            .stream(ProviderRequest::new("m", vec![Message::user("hi")]))
            .await
            .unwrap();

        let mut text = String::new();
        let mut last = None;
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.unwrap();
            if let Some(c) = &chunk.content {
                text.push_str(c);
            }
            last = Some(chunk);
        }
        assert_eq!(text, "Hello");
        let last = last.unwrap();
        assert!(last.done);
        assert_eq!(last.usage.unwrap().total_tokens, 6);
    }

    #[tokio::test]
    async fn complete_parses_choice() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                axum::Json(serde_json::json!({
                    "model": "qwen",
                    "choices": [{"message": {"role": "assistant", "content": "4"}}],
                    "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
                }))
            }),
        );
        let base = spawn_runtime(app).await;
        let provider = OpenAiCompatProvider::new("test", base, None);

        let resp = provider
            .complete(ProviderRequest::new("qwen", vec![Message::user("2+2?")]))
            .await
            .unwrap();
        assert_eq!(resp.message.content, "4");
        assert_eq!(resp.model, "qwen");
        assert_eq!(resp.usage.unwrap().completion_tokens, 1);
    }

    #[tokio::test]
    async fn error_statuses_are_mapped() {
        let app = Router::new()
            .route(
                "/v1/chat/completions",
                post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "Loading model") }),
            )
            .route(
                "/v1/models",
                get(|| async { axum::http::StatusCode::UNAUTHORIZED }),
            );
        let base = spawn_runtime(app).await;
        let provider = OpenAiCompatProvider::new("test", base, Some("bad".into()));

        let err = provider
            .stream(ProviderRequest::new("m", vec![Message::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ApiError { status_code: 503, ref message } if message == "Loading model"));

        let err = provider.list_models().await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
        assert!(!provider.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn unreachable_runtime_is_network_error() {
        // Port 9 (discard) is closed on test machines
        let provider = OpenAiCompatProvider::new("test", "http://127.0.0.1:9/v1", None);
        let err = provider.health_check().await.unwrap_err();
        assert!(matches!(err, ProviderError::Network(_) | ProviderError::Timeout(_)));
    }
}
