//! Route Configuration
//!
//! Configures all HTTP routes for the API.

use axum::{
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Router,
};

use super::handlers;
use crate::infrastructure::metrics;
use crate::presentation::middleware::{auth_middleware, track_http_metrics};
use crate::presentation::websocket::collaboration_ws;
use crate::startup::AppState;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes(state.clone()))
        // Health check endpoints
        .route("/health", get(handlers::health::health_check))
        .route("/health/live", get(handlers::health::liveness))
        .route("/health/ready", get(handlers::health::readiness))
        // Prometheus metrics endpoint
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn(track_http_metrics))
        .with_state(state)
}

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> impl IntoResponse {
    let metrics = metrics::gather_metrics();
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics,
    )
}

/// API v1 routes
fn api_routes(state: AppState) -> Router<AppState> {
    Router::new().nest("/collaboration", collaboration_routes(state))
}

/// Collaboration routes (protected). The bare assignment path is the duplex
/// endpoint on GET and room teardown on DELETE.
fn collaboration_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/{assignment_id}",
            get(collaboration_ws).delete(handlers::collaboration::close_room),
        )
        .route(
            "/{assignment_id}/status",
            get(handlers::collaboration::get_status),
        )
        .route(
            "/{assignment_id}/lock",
            post(handlers::collaboration::acquire_lock),
        )
        .route(
            "/{assignment_id}/unlock",
            post(handlers::collaboration::release_lock),
        )
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}
