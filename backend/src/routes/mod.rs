pub mod chat;
pub mod health;
pub mod models;

use std::sync::Arc;

use axum::Router;

use crate::AppState;

/// All gateway routes, without middleware layers.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(chat::router(state.clone()))
        .merge(models::router(state))
}
