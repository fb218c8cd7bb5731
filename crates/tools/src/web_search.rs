//! Web search tool: DuckDuckGo HTML results as a numbered list.

use async_trait::async_trait;
use cortex_core::error::ToolError;
use cortex_core::tool::{Tool, ToolCall, ToolKind, ToolResult};

use crate::search::{DuckDuckGo, format_hits};

pub struct WebSearchTool {
    backend: DuckDuckGo,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(backend: DuckDuckGo, max_results: usize) -> Self {
        Self {
            backend,
            max_results: max_results.max(1),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn kind(&self) -> ToolKind {
        ToolKind::WebSearch
    }

    fn description(&self) -> &str {
        "Search the web. Returns titles, links and snippets of the top results."
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        let ToolCall::WebSearch { query } = call else {
            return Err(ToolError::InvalidArguments(format!(
                "web_search cannot handle {}",
                call.kind()
            )));
        };

        let mut hits = self.backend.search("web_search", query).await?;
        hits.truncate(self.max_results);

        if hits.is_empty() {
            return Ok(ToolResult::ok(format!("No search results found for '{query}'")));
        }

        let data = serde_json::to_value(&hits).unwrap_or_default();
        Ok(ToolResult::ok(format_hits(&hits)).with_data(data))
    }
}
