//! The Cortex controller: one user turn, including the bounded tool loop.
//!
//! ```text
//!   initial answer (streamed)
//!        │
//!        ▼
//!   Scanning ──no new calls──────────────────────────┐
//!        │ new calls                                 │
//!        ▼                                           │
//!   Executing ──cap reached──────────┐               │
//!        │                           │               │
//!        ▼                           ▼               │
//!   Deciding (silent) ──► Scanning   Finalizing ──► Done
//! ```
//!
//! Every executed `(tool_name, query)` pair is remembered for the whole
//! turn, so a call repeated by a later decision step never runs twice.
//! Finalizing only happens when at least one tool ran; otherwise the
//! initial answer is the final answer.

use crate::extract::ToolCallExtractor;
use crate::prompts;
use crate::relay::{RelayOutcome, StreamRelay};
use crate::stream_event::AgentStreamEvent;
use chrono::Utc;
use cortex_core::event::{DomainEvent, EventBus};
use cortex_core::message::{Conversation, Message};
use cortex_core::provider::{Provider, ProviderRequest, Usage};
use cortex_core::tool::{ToolInvocation, ToolRegistry, ToolRequest};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default bound on tool rounds per turn.
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// Controller phases, recorded in order for each turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Scanning,
    Executing,
    Deciding,
    Finalizing,
    Done,
}

/// Everything a turn produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TurnOutcome {
    /// The answer shown to the user: the final answer if tools ran,
    /// otherwise the initial answer.
    pub final_text: String,
    pub tool_calls: Vec<ToolInvocation>,
    /// Number of tool rounds executed.
    pub iterations: u32,
    /// Streamed delta count across every model call.
    pub tokens: u32,
    pub usage: Option<Usage>,
    pub stopped: bool,
    pub hit_cap: bool,
    pub error: Option<String>,
    pub phases: Vec<Phase>,
}

impl TurnOutcome {
    fn absorb(&mut self, relay: &RelayOutcome) {
        self.tokens += relay.tokens;
        if let Some(u) = &relay.usage {
            let total = self.usage.get_or_insert_with(Usage::default);
            total.prompt_tokens += u.prompt_tokens;
            total.completion_tokens += u.completion_tokens;
            total.total_tokens += u.total_tokens;
        }
        if relay.stopped {
            self.stopped = true;
        }
    }
}

/// Per-turn inputs that live outside the controller.
pub struct TurnContext<'a> {
    pub model: &'a str,
    /// Leading system messages (persona, tool catalogue, document context).
    /// Sent with every request, never stored in the conversation.
    pub preamble: &'a [Message],
    pub events: &'a mpsc::Sender<AgentStreamEvent>,
    pub stop: &'a AtomicBool,
}

impl TurnContext<'_> {
    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    async fn emit(&self, event: AgentStreamEvent) {
        let _ = self.events.send(event).await;
    }
}

/// Runs turns against a provider and a tool registry.
pub struct Cortex {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    event_bus: Option<Arc<EventBus>>,
    extractor: ToolCallExtractor,
    max_iterations: u32,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl Cortex {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            tools,
            event_bus: None,
            extractor: ToolCallExtractor::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Run one turn. The conversation must already end with the user's
    /// message; assistant answers and tool results are appended to it.
    pub async fn run_turn(
        &self,
        ctx: &TurnContext<'_>,
        conversation: &mut Conversation,
    ) -> TurnOutcome {
        let mut outcome = TurnOutcome::default();

        let initial = self.stream(ctx, conversation, None, false).await;
        outcome.absorb(&initial);
        if !initial.text.is_empty() {
            conversation.push(Message::assistant(initial.text.clone()));
        }
        outcome.final_text = initial.text.clone();

        if let Some(error) = initial.error {
            self.fail(ctx, &mut outcome, error).await;
        } else if !outcome.stopped {
            self.tool_loop(ctx, conversation, initial.text, &mut outcome)
                .await;
        }

        outcome.phases.push(Phase::Done);
        info!(
            iterations = outcome.iterations,
            tools = outcome.tool_calls.len(),
            tokens = outcome.tokens,
            stopped = outcome.stopped,
            hit_cap = outcome.hit_cap,
            "Turn finished"
        );
        outcome
    }

    async fn tool_loop(
        &self,
        ctx: &TurnContext<'_>,
        conversation: &mut Conversation,
        mut scan_text: String,
        outcome: &mut TurnOutcome,
    ) {
        let mut executed: HashSet<ToolRequest> = HashSet::new();

        loop {
            outcome.phases.push(Phase::Scanning);
            let pending: Vec<ToolRequest> = self
                .extractor
                .extract(&scan_text)
                .into_iter()
                .filter(|req| !executed.contains(req))
                .collect();
            if pending.is_empty() {
                break;
            }

            outcome.phases.push(Phase::Executing);
            outcome.iterations += 1;
            for request in pending {
                if ctx.stop_requested() {
                    outcome.stopped = true;
                    return;
                }
                executed.insert(request.clone());
                let invocation = self.execute(ctx, &request).await;
                conversation.push(Message::tool_result(
                    &invocation.tool_name,
                    &invocation.query,
                    &invocation.result,
                ));
                outcome.tool_calls.push(invocation);
            }

            if ctx.stop_requested() {
                outcome.stopped = true;
                return;
            }
            if outcome.iterations >= self.max_iterations {
                debug!(cap = self.max_iterations, "Tool iteration cap reached");
                outcome.hit_cap = true;
                break;
            }

            outcome.phases.push(Phase::Deciding);
            let decision = self
                .stream(ctx, conversation, Some(prompts::decision_prompt()), true)
                .await;
            outcome.absorb(&decision);
            if let Some(error) = decision.error {
                // Tools already ran; still try to answer with what we have.
                warn!(error = %error, "Decision step failed");
                break;
            }
            if outcome.stopped {
                return;
            }
            if !decision.text.trim().is_empty() {
                ctx.emit(AgentStreamEvent::Thought {
                    content: decision.text.clone(),
                })
                .await;
            }
            scan_text = decision.text;
        }

        if outcome.tool_calls.is_empty() || ctx.stop_requested() {
            outcome.stopped |= ctx.stop_requested();
            return;
        }

        outcome.phases.push(Phase::Finalizing);
        let last = self
            .stream(ctx, conversation, Some(prompts::final_prompt()), false)
            .await;
        outcome.absorb(&last);
        if !last.text.is_empty() {
            conversation.push(Message::assistant(last.text.clone()));
            outcome.final_text = last.text;
        }
        if let Some(error) = last.error {
            self.fail(ctx, outcome, error).await;
        }
    }

    async fn execute(&self, ctx: &TurnContext<'_>, request: &ToolRequest) -> ToolInvocation {
        ctx.emit(AgentStreamEvent::ToolCall {
            name: request.tool_name.clone(),
            query: request.query.clone(),
        })
        .await;

        let invocation = self.tools.invoke(request).await;
        debug!(
            tool = %invocation.tool_name,
            query = %invocation.query,
            success = invocation.success,
            duration_ms = invocation.duration_ms,
            "Tool executed"
        );

        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ToolExecuted {
                tool_name: invocation.tool_name.clone(),
                query: invocation.query.clone(),
                success: invocation.success,
                duration_ms: invocation.duration_ms,
                timestamp: Utc::now(),
            });
        }

        ctx.emit(AgentStreamEvent::ToolResult {
            name: invocation.tool_name.clone(),
            query: invocation.query.clone(),
            output: invocation.result.clone(),
            success: invocation.success,
        })
        .await;

        invocation
    }

    async fn fail(&self, ctx: &TurnContext<'_>, outcome: &mut TurnOutcome, error: String) {
        warn!(error = %error, "Model stream failed");
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ErrorOccurred {
                context: "model stream".into(),
                error_message: error.clone(),
                timestamp: Utc::now(),
            });
        }
        ctx.emit(AgentStreamEvent::Error {
            message: error.clone(),
        })
        .await;
        outcome.error = Some(error);
    }

    fn request(
        &self,
        ctx: &TurnContext<'_>,
        conversation: &Conversation,
        instruction: Option<&str>,
    ) -> ProviderRequest {
        let mut messages = Vec::with_capacity(ctx.preamble.len() + conversation.len() + 1);
        messages.extend_from_slice(ctx.preamble);
        messages.extend(conversation.messages.iter().cloned());
        if let Some(text) = instruction {
            messages.push(Message::system(text));
        }
        ProviderRequest::new(ctx.model, messages)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }

    async fn stream(
        &self,
        ctx: &TurnContext<'_>,
        conversation: &Conversation,
        instruction: Option<&str>,
        silent: bool,
    ) -> RelayOutcome {
        let request = self.request(ctx, conversation, instruction);
        let rx = match self.provider.stream(request).await {
            Ok(rx) => rx,
            Err(e) => {
                return RelayOutcome {
                    error: Some(e.to_string()),
                    ..Default::default()
                };
            }
        };

        let relay = StreamRelay::new(ctx.events, ctx.stop);
        if silent {
            relay.silent().relay(rx).await
        } else {
            relay.relay(rx).await
        }
    }
}
