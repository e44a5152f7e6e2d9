//! Admin API surface: statistics and template previews.

pub mod auth;
pub mod handlers;

use axum::middleware;
use axum::routing::get;
use axum::Router;

use crate::http::server::AppState;

use self::auth::basic_auth_middleware;
use self::handlers::{full_template, queue_template, statistics};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/statistics", get(statistics))
        .route("/template/full", get(full_template))
        .route("/template/queue", get(queue_template))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            basic_auth_middleware,
        ))
        .with_state(state)
}
