pub mod error;
pub mod webhook;

use crate::adapters::llm::LLMAdapter;
use crate::config::Config;
use crate::review::ReviewOrchestrator;
use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use error::{WebhookError, WebhookResult};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use webhook::Host;

/// Shared state for all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub llm: Arc<dyn LLMAdapter>,
    /// One reviewer per configured host.
    pub github: Option<Arc<ReviewOrchestrator>>,
    pub gitlab: Option<Arc<ReviewOrchestrator>>,
}

impl AppState {
    pub(crate) fn reviewer(&self, host: Host) -> WebhookResult<&Arc<ReviewOrchestrator>> {
        let reviewer = match host {
            Host::GitHub => self.github.as_ref(),
            Host::GitLab => self.gitlab.as_ref(),
        };
        reviewer.ok_or(WebhookError::NotConfigured(host.label()))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/review", get(review_info).post(webhook::receive_webhook))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn serve(state: AppState) -> Result<()> {
    let bind_address = state.config.bind_address.clone();
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;

    info!("Health check: http://{}/health", bind_address);
    info!("Webhook endpoint: http://{}/review", bind_address);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

/// `GET /`
async fn root() -> Json<Value> {
    Json(json!({
        "service": "AI Code Review Agent",
        "endpoints": ["/review", "/health"],
        "status": "running"
    }))
}

/// `GET /review`
async fn review_info() -> Json<Value> {
    Json(json!({
        "message": "Review endpoint is working",
        "method": "POST",
        "expected_payload": "GitHub or GitLab webhook payload"
    }))
}

/// `GET /health`: 200 when the model backend answers, 503 otherwise.
async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let status = state.llm.health_check().await;
    let config = &state.config;

    let body = json!({
        "status": if status.reachable { "ok" } else { "degraded" },
        "llm_configured": config.base_url.is_some() || config.model.starts_with("ollama:"),
        "llm_accessible": status.reachable,
        "github_configured": state.github.is_some(),
        "gitlab_configured": state.gitlab.is_some(),
        "llm_url": config.base_url.as_deref().unwrap_or("Not configured"),
        "model_id": state.llm.model_name(),
        "llm_error": status.error,
    });

    let code = if status.reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}
