//! The assistant session: one model, one conversation, one turn at a time.

use crate::cortex::{Cortex, TurnContext};
use crate::prompts;
use crate::stream_event::{AgentStreamEvent, TurnSummary};
use chrono::Utc;
use cortex_config::AppConfig;
use cortex_core::error::{Error, ProviderError, Result};
use cortex_core::event::{DomainEvent, EventBus};
use cortex_core::history::{ChatHistory, ChatName};
use cortex_core::message::{Conversation, Message};
use cortex_core::provider::Provider;
use cortex_core::retrieval::{Retriever, render_context};
use cortex_core::tool::{ToolDefinition, ToolRegistry};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, warn};

/// Holds the busy flag for the lifetime of a turn.
///
/// Released right before `Done` is sent, or when the turn task unwinds.
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Assistant {
    cortex: Cortex,
    model: RwLock<Option<String>>,
    conversation: Mutex<Conversation>,
    system_prompt: String,
    retriever: Option<Arc<dyn Retriever>>,
    rag_chunks: usize,
    busy: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    event_bus: Arc<EventBus>,
}

impl Assistant {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let system_prompt = prompts::system_prompt(
            &cortex_config::AgentConfig::default().system_prompt,
            &tools.definitions(),
        );
        Self {
            cortex: Cortex::new(provider, tools).with_event_bus(event_bus.clone()),
            model: RwLock::new(None),
            conversation: Mutex::new(Conversation::new()),
            system_prompt,
            retriever: None,
            rag_chunks: 3,
            busy: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            event_bus,
        }
    }

    /// Build an assistant with persona, sampling and loop bounds from config.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self::new(provider, tools, event_bus)
            .with_persona(&config.agent.system_prompt)
            .with_max_iterations(config.agent.max_tool_iterations)
            .with_sampling(config.model.temperature, Some(config.model.max_tokens))
    }

    pub fn with_persona(mut self, persona: &str) -> Self {
        self.system_prompt = prompts::system_prompt(persona, &self.cortex.tools().definitions());
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.cortex = self.cortex.with_max_iterations(max);
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: Option<u32>) -> Self {
        self.cortex = self.cortex.with_sampling(temperature, max_tokens);
        self
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>, max_chunks: usize) -> Self {
        self.retriever = Some(retriever);
        self.rag_chunks = max_chunks.max(1);
        self
    }

    // ── Model lifecycle ─────────────────────────────────────────────────

    /// Health-check the runtime, then mark `name` as the loaded model.
    pub async fn load_model(&self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Config {
                message: "model name is empty".into(),
            });
        }
        if self.is_busy() {
            return Err(Error::Busy);
        }
        if !self.cortex.provider().health_check().await? {
            return Err(ProviderError::ApiError {
                status_code: 503,
                message: "model runtime is not ready".into(),
            }
            .into());
        }

        *self.model.write().await = Some(name.to_string());
        info!(model = name, "Model loaded");
        self.event_bus.publish(DomainEvent::ModelLoaded {
            model: name.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Forget the loaded model. Returns the name that was loaded, if any.
    pub async fn unload_model(&self) -> Result<Option<String>> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        let previous = self.model.write().await.take();
        if let Some(model) = &previous {
            info!(model = %model, "Model unloaded");
            self.event_bus.publish(DomainEvent::ModelUnloaded {
                model: model.clone(),
                timestamp: Utc::now(),
            });
        }
        Ok(previous)
    }

    pub async fn loaded_model(&self) -> Option<String> {
        self.model.read().await.clone()
    }

    pub async fn list_models(&self) -> Result<Vec<String>> {
        Ok(self.cortex.provider().list_models().await?)
    }

    pub async fn runtime_healthy(&self) -> bool {
        self.cortex.provider().health_check().await.unwrap_or(false)
    }

    // ── Turns ───────────────────────────────────────────────────────────

    /// Start a turn. Events arrive on the returned receiver; the last one
    /// is always `Done`.
    pub async fn submit(
        self: &Arc<Self>,
        text: impl Into<String>,
    ) -> Result<mpsc::Receiver<AgentStreamEvent>> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(Error::EmptyMessage);
        }
        let guard = BusyGuard::acquire(&self.busy).ok_or(Error::Busy)?;
        let model = self
            .model
            .read()
            .await
            .clone()
            .ok_or(Error::ModelNotLoaded)?;
        self.stop.store(false, Ordering::SeqCst);

        let working = {
            let mut conversation = self.conversation.lock().await;
            conversation.push(Message::user(text.clone()));
            conversation.clone()
        };

        let (tx, rx) = mpsc::channel(128);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_turn(guard, model, text, working, tx).await;
        });
        Ok(rx)
    }

    /// Run a turn to completion and return its summary.
    pub async fn chat(self: &Arc<Self>, text: impl Into<String>) -> Result<TurnSummary> {
        let rx = self.submit(text).await?;
        Ok(TurnSummary::collect(rx).await)
    }

    async fn run_turn(
        &self,
        guard: BusyGuard,
        model: String,
        text: String,
        mut conversation: Conversation,
        tx: mpsc::Sender<AgentStreamEvent>,
    ) {
        info!(conversation_id = %conversation.id, model = %model, "Turn started");
        self.event_bus.publish(DomainEvent::TurnStarted {
            conversation_id: conversation.id.clone(),
            content_preview: text.chars().take(80).collect(),
            timestamp: Utc::now(),
        });

        let mut preamble = vec![Message::system(self.system_prompt.clone())];
        if let Some(context) = self.document_context(&text).await {
            preamble.push(Message::system(context));
        }

        let ctx = TurnContext {
            model: &model,
            preamble: &preamble,
            events: &tx,
            stop: &self.stop,
        };
        let outcome = self.cortex.run_turn(&ctx, &mut conversation).await;

        let conversation_id = conversation.id.clone();
        *self.conversation.lock().await = conversation;

        if outcome.stopped {
            info!("Generation stopped");
            self.event_bus.publish(DomainEvent::GenerationStopped {
                timestamp: Utc::now(),
            });
        }
        self.event_bus.publish(DomainEvent::ResponseGenerated {
            conversation_id: conversation_id.clone(),
            model,
            tokens: outcome.tokens,
            iterations: outcome.iterations,
            timestamp: Utc::now(),
        });

        // A client may submit again as soon as it sees `Done`.
        drop(guard);
        let _ = tx
            .send(AgentStreamEvent::Done {
                conversation_id,
                usage: outcome.usage,
                tokens: outcome.tokens,
                iterations: outcome.iterations,
                tool_calls_made: outcome.tool_calls.len(),
                stopped: outcome.stopped,
                hit_cap: outcome.hit_cap,
            })
            .await;
    }

    async fn document_context(&self, query: &str) -> Option<String> {
        let retriever = self.retriever.as_ref()?;
        match retriever.retrieve(query, self.rag_chunks).await {
            Ok(chunks) => {
                debug!(chunks = chunks.len(), "Retrieved document context");
                render_context(&chunks)
            }
            Err(e) => {
                warn!(error = %e, "Document retrieval failed");
                None
            }
        }
    }

    /// Ask the running turn to stop. Returns whether a turn was in flight.
    pub fn request_stop(&self) -> bool {
        self.stop.store(true, Ordering::SeqCst);
        let busy = self.is_busy();
        debug!(busy, "Stop requested");
        busy
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    // ── Conversation ────────────────────────────────────────────────────

    /// Start a fresh, empty conversation.
    pub async fn reset(&self) -> Result<()> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        *self.conversation.lock().await = Conversation::new();
        info!("Conversation reset");
        Ok(())
    }

    /// Replace the current conversation with a saved chat.
    pub async fn load_history(&self, history: ChatHistory) -> Result<()> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        let count = history.messages.len();
        *self.conversation.lock().await = Conversation::from_messages(history.messages);
        info!(chat = %history.name, messages = count, "Chat loaded");
        Ok(())
    }

    pub async fn snapshot(&self) -> Conversation {
        self.conversation.lock().await.clone()
    }

    /// The current conversation, packaged for saving under `name`.
    pub async fn to_history(&self, name: ChatName) -> ChatHistory {
        ChatHistory::new(name, self.snapshot().await.messages)
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn tools(&self) -> Vec<ToolDefinition> {
        self.cortex.tools().definitions()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn retriever(&self) -> Option<&Arc<dyn Retriever>> {
        self.retriever.as_ref()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}
