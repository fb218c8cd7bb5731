//! Keyword document index: the retriever behind optional RAG context.
//!
//! Documents are split into paragraph-sized chunks and scored by how often
//! the query's terms occur in each chunk, normalised by chunk length.

use async_trait::async_trait;
use cortex_core::error::MemoryError;
use cortex_core::retrieval::{DocumentChunk, Retriever};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Upper bound on stored chunks; the oldest 10% are evicted when full.
const MAX_CHUNKS: usize = 10_000;

/// Target chunk size in characters.
const CHUNK_CHARS: usize = 800;

pub struct DocumentIndex {
    chunks: Arc<RwLock<Vec<DocumentChunk>>>,
}

impl DocumentIndex {
    pub fn new() -> Self {
        Self {
            chunks: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for DocumentIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Split text on blank lines, packing paragraphs into chunks of about
/// [`CHUNK_CHARS`]. A single oversized paragraph becomes its own chunk.
fn chunk_text(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if !current.is_empty() && current.len() + para.len() + 2 > CHUNK_CHARS {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(para);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Lowercased query terms, ignoring very short words.
fn terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

fn score(content: &str, terms: &[String]) -> f32 {
    let lower = content.to_lowercase();
    let occurrences: usize = terms.iter().map(|t| lower.matches(t.as_str()).count()).sum();
    occurrences as f32 / (content.len() as f32 / 100.0).max(1.0)
}

#[async_trait]
impl Retriever for DocumentIndex {
    async fn add_document(&self, source: &str, text: &str) -> Result<usize, MemoryError> {
        let pieces = chunk_text(text);
        let added = pieces.len();

        let mut chunks = self.chunks.write().await;
        if chunks.len() + added > MAX_CHUNKS {
            let drain_count = (MAX_CHUNKS / 10).max(added).min(chunks.len());
            chunks.drain(..drain_count);
        }
        chunks.extend(pieces.into_iter().map(|content| DocumentChunk {
            source: source.to_string(),
            content,
            score: 0.0,
        }));

        debug!(source, chunks = added, "Document indexed");
        Ok(added)
    }

    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<DocumentChunk>, MemoryError> {
        let terms = terms(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let chunks = self.chunks.read().await;
        let mut results: Vec<DocumentChunk> = chunks
            .iter()
            .filter_map(|c| {
                let s = score(&c.content, &terms);
                (s > 0.0).then(|| DocumentChunk {
                    score: s,
                    ..c.clone()
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        Ok(self.chunks.read().await.len())
    }
}
