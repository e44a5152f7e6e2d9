//! Admin endpoint handlers.

use axum::extract::State;
use axum::response::Html;
use axum::Json;

use crate::engine::ProxyStatistics;
use crate::http::server::AppState;

/// Session accounting for the whole proxy.
pub async fn statistics(State(state): State<AppState>) -> Json<ProxyStatistics> {
    Json(state.engine.statistics())
}

/// Preview the full-queue page as users would see it.
pub async fn full_template(State(state): State<AppState>) -> Html<String> {
    Html(state.config.dynamic().full_queue_template.clone())
}

/// Preview the waiting-room page as users would see it.
pub async fn queue_template(State(state): State<AppState>) -> Html<String> {
    Html(state.config.dynamic().queue_template.clone())
}
