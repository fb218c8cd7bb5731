//! Built-in tool implementations for Cortex.
//!
//! Tools give the assistant a reach beyond the model: web search, video
//! search, crypto prices and image generation. Each one wraps a single
//! HTTP back end configured under `[tools]`.

pub mod crypto_price;
pub mod image_generation;
pub mod search;
pub mod video_search;
pub mod web_search;

use cortex_config::AppConfig;
use cortex_core::tool::ToolRegistry;
use std::time::Duration;
use tracing::{debug, warn};

pub use crypto_price::CryptoPriceTool;
pub use image_generation::ImageGenerationTool;
pub use search::DuckDuckGo;
pub use video_search::VideoSearchTool;
pub use web_search::WebSearchTool;

/// Create the tool registry described by the configuration.
///
/// Web search, video search and crypto price are always registered. Image
/// generation is registered only when `tools.image_api_url` is set.
pub fn default_registry(config: &AppConfig) -> ToolRegistry {
    let timeout = Duration::from_secs(config.agent.tool_timeout_secs);
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client for tools");
            reqwest::Client::new()
        });

    let tools = &config.tools;
    let ddg = DuckDuckGo::new(client.clone(), tools.search_url.clone());

    let mut registry = ToolRegistry::new().with_timeout(timeout);
    registry.register(Box::new(WebSearchTool::new(ddg.clone(), tools.max_results)));
    registry.register(Box::new(VideoSearchTool::new(ddg, tools.max_results)));
    registry.register(Box::new(CryptoPriceTool::new(
        client.clone(),
        tools.crypto_api_url.clone(),
        tools.vs_currency.clone(),
    )));

    if let Some(image_url) = &tools.image_api_url {
        registry.register(Box::new(ImageGenerationTool::new(
            client,
            image_url.clone(),
            tools.image_api_key.clone(),
            tools.image_size.clone(),
            tools.image_output_dir.clone(),
        )));
    } else {
        debug!("Image generation disabled (tools.image_api_url not set)");
    }

    registry
}
