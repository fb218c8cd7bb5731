//! # Cortex Core
//!
//! Domain types, traits, and error definitions for the Cortex chat assistant.
//! This crate has **no framework dependencies**: it defines the domain model
//! that the runtime client, the tools, the chat store and the agent loop
//! implement against.
//!
//! ## Layout
//!
//! Every external collaborator is a trait here:
//! - [`Provider`]: the model runtime (token-delta stream)
//! - [`Tool`]: one callable tool behind the [`ToolRegistry`]
//! - [`ChatStore`]: named chat history persistence
//! - [`Retriever`]: optional document context for RAG

pub mod error;
pub mod event;
pub mod history;
pub mod message;
pub mod provider;
pub mod retrieval;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use history::{ChatHistory, ChatName, ChatStore};
pub use message::{Conversation, Message, Role};
pub use provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
pub use retrieval::{DocumentChunk, Retriever, render_context};
pub use tool::{
    Tool, ToolCall, ToolDefinition, ToolInvocation, ToolKind, ToolRegistry, ToolRequest, ToolResult,
};
