//! Video search tool: DuckDuckGo scoped to YouTube, video links only.

use async_trait::async_trait;
use cortex_core::error::ToolError;
use cortex_core::tool::{Tool, ToolCall, ToolKind, ToolResult};

use crate::search::{DuckDuckGo, SearchHit, format_hits};

pub struct VideoSearchTool {
    backend: DuckDuckGo,
    max_results: usize,
}

impl VideoSearchTool {
    pub fn new(backend: DuckDuckGo, max_results: usize) -> Self {
        Self {
            backend,
            max_results: max_results.max(1),
        }
    }
}

fn is_video_link(hit: &SearchHit) -> bool {
    hit.url.contains("youtube.com/watch") || hit.url.contains("youtu.be/")
}

#[async_trait]
impl Tool for VideoSearchTool {
    fn kind(&self) -> ToolKind {
        ToolKind::VideoSearch
    }

    fn description(&self) -> &str {
        "Search YouTube for videos. Returns video titles and links."
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        let ToolCall::VideoSearch { query } = call else {
            return Err(ToolError::InvalidArguments(format!(
                "video_search cannot handle {}",
                call.kind()
            )));
        };

        let scoped = format!("site:youtube.com {query}");
        let hits: Vec<SearchHit> = self
            .backend
            .search("video_search", &scoped)
            .await?
            .into_iter()
            .filter(is_video_link)
            .take(self.max_results)
            .collect();

        if hits.is_empty() {
            return Ok(ToolResult::ok(format!("No videos found for '{query}'")));
        }

        let data = serde_json::to_value(&hits).unwrap_or_default();
        Ok(ToolResult::ok(format_hits(&hits)).with_data(data))
    }
}
