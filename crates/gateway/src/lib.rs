//! HTTP gateway for Cortex.
//!
//! Serves the health check and the v1 API (chat, streaming, WebSocket,
//! model lifecycle, saved chats, tools, documents and the event log).
//!
//! Built on Axum.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::{Router, http::HeaderValue, response::Json, routing::get};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use cortex_agent::Assistant;
use cortex_config::AppConfig;
use cortex_core::event::EventBus;
use cortex_memory::{DocumentIndex, FileChatStore};

/// Build the shared state from config: one runtime client, one tool
/// registry, one event bus and one assistant.
pub fn build_state(config: &AppConfig) -> api_v1::SharedApiState {
    let provider = cortex_providers::build_from_config(&config.model);
    let tools = Arc::new(cortex_tools::default_registry(config));
    let event_bus = Arc::new(EventBus::default());

    let mut assistant = Assistant::from_config(config, provider, tools, event_bus);
    if config.rag.enabled {
        assistant = assistant.with_retriever(Arc::new(DocumentIndex::new()), config.rag.max_chunks);
    }

    Arc::new(api_v1::ApiV1State {
        assistant: Arc::new(assistant),
        chats: Arc::new(FileChatStore::new(config.history.dir.clone())),
        config: config.clone(),
        start_time: chrono::Utc::now(),
    })
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Build the full router: `/health` plus the v1 API under `/v1`.
///
/// Layers:
/// - Request body size limit (1 MB)
/// - CORS restricted to `gateway.allowed_origins`
/// - HTTP trace logging
pub fn build_router(state: api_v1::SharedApiState) -> Router {
    let cors = cors_layer(&state.config.gateway.allowed_origins);
    let v1 = api_v1::v1_router(state);

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", v1)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = build_state(&config);

    if config.model.autoload {
        match state.assistant.load_model(&config.model.name).await {
            Ok(()) => info!(model = %config.model.name, "Model loaded"),
            Err(e) => warn!(model = %config.model.name, error = %e, "Model autoload failed; use POST /v1/model/load"),
        }
    }

    let app = build_router(state);

    info!(addr = %addr, "Gateway starting with v1 API");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}
