//! Router configuration for the worker API.

use axum::{
    routing::{get, put},
    Router,
};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Worker protocol
        .route("/work", get(handlers::get_work))
        .route("/work/:id", put(handlers::update_work_item))
        // Operator read-only views
        .route("/jobs/:job_id", get(handlers::job_status))
        // Liveness and metrics
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
