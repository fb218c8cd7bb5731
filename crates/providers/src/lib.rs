//! Model runtime clients for Cortex.
//!
//! All providers implement the `cortex_core::Provider` trait. The assistant
//! talks to one OpenAI-compatible runtime (llama.cpp's server by default).

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use cortex_config::ModelConfig;
use cortex_core::provider::Provider;
use std::sync::Arc;
use std::time::Duration;

/// Build the runtime client from the `[model]` section.
pub fn build_from_config(config: &ModelConfig) -> Arc<dyn Provider> {
    Arc::new(OpenAiCompatProvider::with_timeout(
        "llama.cpp",
        config.provider_url.clone(),
        config.api_key.clone(),
        Duration::from_secs(config.request_timeout_secs),
    ))
}
