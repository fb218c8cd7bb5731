//! Turn-level streaming events.
//!
//! `AgentStreamEvent` wraps provider chunks and tool activity into the
//! events the gateway forwards to clients over SSE or WebSocket.

use cortex_core::provider::Usage;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted while a turn runs.
///
/// - `chunk`: partial text from the model
/// - `tool_call`: a tool request was extracted and is about to run
/// - `tool_result`: the tool finished (successfully or not)
/// - `thought`: the model's answer to "do you need more tools?"
/// - `done`: the turn is over, always the last event
/// - `error`: a model or runtime error; `done` still follows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial text from the model.
    Chunk { content: String },

    /// A tool request is about to execute.
    ToolCall { name: String, query: String },

    /// Tool execution completed. Failures carry `"Error: ..."` as output.
    ToolResult {
        name: String,
        query: String,
        output: String,
        success: bool,
    },

    /// Silent decision text produced between tool rounds.
    Thought { content: String },

    /// The turn is complete.
    Done {
        conversation_id: String,
        usage: Option<Usage>,
        /// Streamed delta count across every model call in the turn.
        tokens: u32,
        iterations: u32,
        tool_calls_made: usize,
        stopped: bool,
        hit_cap: bool,
    },

    /// An error occurred mid-turn.
    Error { message: String },
}

impl AgentStreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Thought { .. } => "thought",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

/// One tool execution as reported to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallReport {
    pub name: String,
    pub query: String,
    pub output: String,
    pub success: bool,
}

/// A whole turn folded out of its event stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnSummary {
    pub conversation_id: String,
    /// The user-facing answer: text streamed after the last tool activity.
    pub response: String,
    pub tool_calls: Vec<ToolCallReport>,
    pub thoughts: Vec<String>,
    pub iterations: u32,
    pub tokens: u32,
    pub usage: Option<Usage>,
    pub stopped: bool,
    pub hit_cap: bool,
    pub error: Option<String>,
}

impl TurnSummary {
    /// Fold one event into the summary.
    pub fn apply(&mut self, event: AgentStreamEvent) {
        match event {
            AgentStreamEvent::Chunk { content } => self.response.push_str(&content),
            AgentStreamEvent::ToolCall { .. } => self.response.clear(),
            AgentStreamEvent::ToolResult {
                name,
                query,
                output,
                success,
            } => {
                self.response.clear();
                self.tool_calls.push(ToolCallReport {
                    name,
                    query,
                    output,
                    success,
                });
            }
            AgentStreamEvent::Thought { content } => self.thoughts.push(content),
            AgentStreamEvent::Done {
                conversation_id,
                usage,
                tokens,
                iterations,
                stopped,
                hit_cap,
                ..
            } => {
                self.conversation_id = conversation_id;
                self.usage = usage;
                self.tokens = tokens;
                self.iterations = iterations;
                self.stopped = stopped;
                self.hit_cap = hit_cap;
            }
            AgentStreamEvent::Error { message } => self.error = Some(message),
        }
    }

    /// Drain a turn's receiver until `done` (or until the sender goes away).
    pub async fn collect(mut rx: mpsc::Receiver<AgentStreamEvent>) -> Self {
        let mut summary = Self::default();
        while let Some(event) = rx.recv().await {
            let done = event.is_done();
            summary.apply(event);
            if done {
                break;
            }
        }
        summary
    }
}
