//! Tool trait: the abstraction over assistant capabilities.
//!
//! The model never sees a JSON schema. It writes a directive such as
//! `[Funcion: 'web_search', query: 'rust async']` into its reply; the
//! extractor turns that into a [`ToolRequest`], which resolves to a typed
//! [`ToolCall`] and is executed through the [`ToolRegistry`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::error::ToolError;

/// The tools the assistant knows how to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    WebSearch,
    VideoSearch,
    CryptoPrice,
    GenerateImage,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::WebSearch,
        ToolKind::VideoSearch,
        ToolKind::CryptoPrice,
        ToolKind::GenerateImage,
    ];

    /// Canonical name used in prompts and events.
    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::WebSearch => "web_search",
            ToolKind::VideoSearch => "video_search",
            ToolKind::CryptoPrice => "crypto_price",
            ToolKind::GenerateImage => "generate_image",
        }
    }

    /// Resolve a model-written name. Case, spaces and hyphens are ignored,
    /// and the common English and Spanish aliases are accepted.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();

        match normalized.as_str() {
            "web_search" | "search" | "websearch" | "search_web" | "buscar" | "busqueda"
            | "busqueda_web" | "buscar_web" | "google" => Some(ToolKind::WebSearch),
            "video_search" | "videosearch" | "search_video" | "search_videos" | "youtube"
            | "buscar_video" | "buscar_videos" | "busqueda_video" => Some(ToolKind::VideoSearch),
            "crypto_price" | "cryptoprice" | "crypto" | "get_crypto_price" | "price"
            | "precio" | "precio_crypto" | "precio_cripto" => Some(ToolKind::CryptoPrice),
            "generate_image" | "generateimage" | "image" | "create_image" | "image_generation"
            | "generar_imagen" | "imagen" | "crear_imagen" => Some(ToolKind::GenerateImage),
            _ => None,
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A `(tool_name, query)` pair as written by the model.
///
/// Both parts are trimmed on construction; the trimmed pair is the
/// de-duplication key within one turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool_name: String,
    pub query: String,
}

impl ToolRequest {
    pub fn new(tool_name: impl AsRef<str>, query: impl AsRef<str>) -> Self {
        Self {
            tool_name: tool_name.as_ref().trim().to_string(),
            query: query.as_ref().trim().to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tool_name.is_empty() || self.query.is_empty()
    }
}

impl fmt::Display for ToolRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}('{}')", self.tool_name, self.query)
    }
}

/// A resolved tool call with typed arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    WebSearch { query: String },
    VideoSearch { query: String },
    CryptoPrice { asset: String },
    GenerateImage { prompt: String },
}

impl ToolCall {
    /// Resolve a raw request into a typed call.
    pub fn resolve(request: &ToolRequest) -> std::result::Result<Self, ToolError> {
        let kind = ToolKind::from_name(&request.tool_name)
            .ok_or_else(|| ToolError::NotFound(request.tool_name.clone()))?;
        if request.query.is_empty() {
            return Err(ToolError::InvalidArguments(format!(
                "{} requires a non-empty query",
                kind.name()
            )));
        }
        let arg = request.query.clone();
        Ok(match kind {
            ToolKind::WebSearch => ToolCall::WebSearch { query: arg },
            ToolKind::VideoSearch => ToolCall::VideoSearch { query: arg },
            ToolKind::CryptoPrice => ToolCall::CryptoPrice { asset: arg },
            ToolKind::GenerateImage => ToolCall::GenerateImage { prompt: arg },
        })
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            ToolCall::WebSearch { .. } => ToolKind::WebSearch,
            ToolCall::VideoSearch { .. } => ToolKind::VideoSearch,
            ToolCall::CryptoPrice { .. } => ToolKind::CryptoPrice,
            ToolCall::GenerateImage { .. } => ToolKind::GenerateImage,
        }
    }

    /// The single argument carried by the call.
    pub fn argument(&self) -> &str {
        match self {
            ToolCall::WebSearch { query } | ToolCall::VideoSearch { query } => query,
            ToolCall::CryptoPrice { asset } => asset,
            ToolCall::GenerateImage { prompt } => prompt,
        }
    }
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// One executed tool request, as recorded for the turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub query: String,
    pub result: String,
    pub success: bool,
    pub duration_ms: u64,
}

/// What the prompt builder and `/v1/tools` show for a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
}

/// The core Tool trait.
///
/// Each tool back end implements this once and is registered under its
/// [`ToolKind`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// Which call this tool serves.
    fn kind(&self) -> ToolKind;

    /// A description of what this tool does (rendered into the system prompt).
    fn description(&self) -> &str;

    /// Execute the tool.
    async fn execute(&self, call: &ToolCall) -> std::result::Result<ToolResult, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.kind().name().to_string(),
            description: self.description().to_string(),
        }
    }
}

/// A registry of available tools.
///
/// Invocation is fail soft: every error, including timeouts and unknown
/// names, comes back as an unsuccessful [`ToolInvocation`] whose result
/// text starts with `Error:`.
pub struct ToolRegistry {
    tools: HashMap<ToolKind, Box<dyn Tool>>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a tool. Replaces any existing tool of the same kind.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.kind(), tool);
    }

    /// Get a tool by name or alias.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        let kind = ToolKind::from_name(name)?;
        self.tools.get(&kind).map(|t| t.as_ref())
    }

    /// Definitions sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.tools.keys().map(|k| k.name()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a typed call, bounded by the registry timeout.
    pub async fn execute(&self, call: &ToolCall) -> std::result::Result<ToolResult, ToolError> {
        let kind = call.kind();
        let tool = self
            .tools
            .get(&kind)
            .ok_or_else(|| ToolError::NotConfigured(kind.name().to_string()))?;

        match tokio::time::timeout(self.timeout, tool.execute(call)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool_name: kind.name().to_string(),
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }

    /// Resolve and execute a raw request. Never fails.
    pub async fn invoke(&self, request: &ToolRequest) -> ToolInvocation {
        let start = Instant::now();
        let outcome = match ToolCall::resolve(request) {
            Ok(call) => self.execute(&call).await,
            Err(e) => Err(e),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let (result, success) = match outcome {
            Ok(r) if r.success => (r.output, true),
            Ok(r) => (format!("Error: {}", r.output), false),
            Err(e) => {
                tracing::warn!(tool = %request.tool_name, query = %request.query, error = %e, "Tool call failed");
                (format!("Error: {e}"), false)
            }
        };

        ToolInvocation {
            tool_name: request.tool_name.clone(),
            query: request.query.clone(),
            result,
            success,
            duration_ms,
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
