//! Retriever trait: document context for retrieval-augmented generation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// A scored piece of a stored document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Title of the document this chunk came from
    pub source: String,

    pub content: String,

    /// Relevance score (set by search)
    #[serde(default)]
    pub score: f32,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Index a document. Returns the number of chunks stored.
    async fn add_document(&self, source: &str, text: &str) -> std::result::Result<usize, MemoryError>;

    /// Best-matching chunks for a query, highest score first.
    async fn retrieve(
        &self,
        query: &str,
        limit: usize,
    ) -> std::result::Result<Vec<DocumentChunk>, MemoryError>;

    /// Number of stored chunks.
    async fn count(&self) -> std::result::Result<usize, MemoryError>;
}

/// Render retrieved chunks as a context block for the system prompt.
pub fn render_context(chunks: &[DocumentChunk]) -> Option<String> {
    if chunks.is_empty() {
        return None;
    }
    let mut out = String::from("Relevant document excerpts:\n");
    for chunk in chunks {
        out.push_str(&format!("\n[{}]\n{}\n", chunk.source, chunk.content));
    }
    Some(out)
}
