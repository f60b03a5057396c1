//! Model listing and chat service health.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use relay_common::ModelsResponse;
use serde::Serialize;

use crate::registry::ModelCounts;
use crate::AppState;

/// Body of `GET /api/chat/health`.
#[derive(Debug, Serialize)]
pub struct ChatHealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub available_models: Vec<String>,
    pub models: ModelCounts,
}

/// GET /api/chat/models - models that can currently be served
async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    Json(state.registry.models_response())
}

/// GET /api/chat/health
async fn chat_health(State(state): State<Arc<AppState>>) -> Json<ChatHealthResponse> {
    Json(ChatHealthResponse {
        status: "healthy",
        service: "Chat Service",
        available_models: state.registry.available_types(),
        models: state.registry.counts(),
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/chat/models", get(list_models))
        .route("/api/chat/health", get(chat_health))
        .with_state(state)
}
