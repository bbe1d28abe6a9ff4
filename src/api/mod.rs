//! HTTP API surface.
//!
//! Thin pass-through over the task engine: request validation, route
//! declarations, and the wire shapes live here; all task semantics live in
//! the supervisor and orchestrator.

pub mod tasks;
pub mod types;

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::driver::AgentRuntime;
use crate::llm;
use crate::orchestrator::TaskOrchestrator;
use crate::supervisor::TaskSupervisor;

use self::types::HealthResponse;

/// Shared state handed to every handler.
pub struct AppState {
    pub config: Config,
    pub supervisor: TaskSupervisor,
    pub orchestrator: Arc<TaskOrchestrator>,
    pub runtime: Arc<dyn AgentRuntime>,
}

impl AppState {
    pub fn new(config: Config, runtime: Arc<dyn AgentRuntime>) -> Self {
        let supervisor = TaskSupervisor::new(config.task_retention);
        let orchestrator = Arc::new(TaskOrchestrator::new(
            config.clone(),
            runtime.clone(),
            supervisor.clone(),
        ));
        Self {
            config,
            supervisor,
            orchestrator,
            runtime,
        }
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/providers", get(providers))
        .merge(tasks::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config, runtime: Arc<dyn AgentRuntime>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config, runtime));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Browser task API listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        display: std::env::var("DISPLAY").unwrap_or_else(|_| "not set".to_string()),
        driver_version: state.runtime.version(),
    })
}

/// List available LLM providers and their default models.
async fn providers() -> Json<serde_json::Value> {
    let mut entries = serde_json::Map::new();
    for (name, info) in llm::catalog() {
        entries.insert(
            name.to_string(),
            serde_json::to_value(info).unwrap_or_default(),
        );
    }
    Json(serde_json::json!({
        "providers": entries,
        "recommended": "gemini",
        "fastest": "browseruse",
    }))
}
