//! Configuration loading, validation, and management for Cortex.
//!
//! Loads configuration from `~/.cortex/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.cortex/config.toml`. Every field has a default, so
/// an empty file (or no file) is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model runtime settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Tool loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Tool back ends
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Saved chat histories
    #[serde(default)]
    pub history: HistoryConfig,

    /// Document context
    #[serde(default)]
    pub rag: RagConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

fn default_true() -> bool {
    true
}

// --- [model] ---

#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base URL of the OpenAI-compatible runtime (llama.cpp `server`)
    #[serde(default = "default_provider_url")]
    pub provider_url: String,

    /// Optional bearer token for the runtime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model name sent with each request
    #[serde(default = "default_model_name")]
    pub name: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Load `name` when the assistant starts
    #[serde(default = "default_true")]
    pub autoload: bool,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_provider_url() -> String {
    "http://127.0.0.1:8080/v1".into()
}
fn default_model_name() -> String {
    "local-model".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_request_timeout() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider_url: default_provider_url(),
            api_key: None,
            name: default_model_name(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            autoload: true,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider_url", &self.provider_url)
            .field("api_key", &redact(&self.api_key))
            .field("name", &self.name)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("autoload", &self.autoload)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

// --- [agent] ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Upper bound on tool-execution passes per turn
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Persona text placed before the tool catalogue in the system prompt
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_max_tool_iterations() -> u32 {
    3
}
fn default_tool_timeout() -> u64 {
    30
}
fn default_system_prompt() -> String {
    "You are Cortex, a helpful assistant running on the user's own computer. \
     Answer clearly and concisely."
        .into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            tool_timeout_secs: default_tool_timeout(),
            system_prompt: default_system_prompt(),
        }
    }
}

// --- [tools] ---

#[derive(Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// DuckDuckGo HTML endpoint used by web and video search
    #[serde(default = "default_search_url")]
    pub search_url: String,

    #[serde(default = "default_max_results")]
    pub max_results: usize,

    #[serde(default = "default_crypto_api_url")]
    pub crypto_api_url: String,

    /// Quote currency for crypto prices
    #[serde(default = "default_vs_currency")]
    pub vs_currency: String,

    /// OpenAI-compatible image API base URL; image generation is disabled when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_api_key: Option<String>,

    #[serde(default = "default_image_size")]
    pub image_size: String,

    #[serde(default = "default_image_output_dir")]
    pub image_output_dir: PathBuf,
}

fn default_search_url() -> String {
    "https://html.duckduckgo.com/html/".into()
}
fn default_max_results() -> usize {
    5
}
fn default_crypto_api_url() -> String {
    "https://api.coingecko.com/api/v3".into()
}
fn default_vs_currency() -> String {
    "usd".into()
}
fn default_image_size() -> String {
    "512x512".into()
}
fn default_image_output_dir() -> PathBuf {
    AppConfig::config_dir().join("images")
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            search_url: default_search_url(),
            max_results: default_max_results(),
            crypto_api_url: default_crypto_api_url(),
            vs_currency: default_vs_currency(),
            image_api_url: None,
            image_api_key: None,
            image_size: default_image_size(),
            image_output_dir: default_image_output_dir(),
        }
    }
}

impl std::fmt::Debug for ToolsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolsConfig")
            .field("search_url", &self.search_url)
            .field("max_results", &self.max_results)
            .field("crypto_api_url", &self.crypto_api_url)
            .field("vs_currency", &self.vs_currency)
            .field("image_api_url", &self.image_api_url)
            .field("image_api_key", &redact(&self.image_api_key))
            .field("image_size", &self.image_size)
            .field("image_output_dir", &self.image_output_dir)
            .finish()
    }
}

// --- [history] ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Directory holding one `<name>.json` file per saved chat
    #[serde(default = "default_history_dir")]
    pub dir: PathBuf,
}

fn default_history_dir() -> PathBuf {
    AppConfig::config_dir().join("chats")
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dir: default_history_dir(),
        }
    }
}

// --- [rag] ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Chunks injected into the prompt per turn
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
}

fn default_max_chunks() -> usize {
    3
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_chunks: default_max_chunks(),
        }
    }
}

// --- [gateway] ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Origins allowed by CORS
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_port() -> u16 {
    8765
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:8765".into(), "http://127.0.0.1:8765".into()]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.cortex/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `CORTEX_PROVIDER_URL`
    /// - `CORTEX_MODEL`
    /// - `CORTEX_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in `load`).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("CORTEX_PROVIDER_URL").filter(|v| !v.is_empty()) {
            self.model.provider_url = url;
        }
        if let Some(model) = lookup("CORTEX_MODEL").filter(|v| !v.is_empty()) {
            self.model.name = model;
        }
        if let Some(key) = lookup("CORTEX_API_KEY").filter(|v| !v.is_empty()) {
            self.model.api_key = Some(key);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".cortex")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !(1..=10).contains(&self.agent.max_tool_iterations) {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_iterations must be between 1 and 10".into(),
            ));
        }

        if self.model.request_timeout_secs == 0 || self.agent.tool_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts must be greater than zero".into(),
            ));
        }

        if self.model.provider_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "model.provider_url must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
