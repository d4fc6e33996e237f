use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::queue::ReleaseEventSender;
use crate::workflow::engine::WorkflowEngine;

pub struct AppState {
    /// `owner/repo` whose release events are accepted.
    pub repo_full_name: String,
    pub webhook_secret: Option<String>,
    pub engine: Arc<WorkflowEngine>,
    pub events: ReleaseEventSender,
}

impl AppState {
    pub fn new(config: &AppConfig, engine: Arc<WorkflowEngine>, events: ReleaseEventSender) -> Self {
        Self {
            repo_full_name: format!("{}/{}", config.release.owner, config.release.repo),
            webhook_secret: config.webhook_secret().map(str::to_string),
            engine,
            events,
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhooks/github", post(crate::webhook::handler::handle_webhook))
        .route("/reports/:plan/latest", get(latest_report))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

async fn latest_report(State(state): State<Arc<AppState>>, Path(plan): Path<String>) -> Response {
    match state.engine.store().latest(&plan).await {
        Ok(Some(report)) => Json(report).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!(plan = %plan, error = %e, "Failed to load latest report");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
