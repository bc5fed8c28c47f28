//! Health Check API Tests

use axum::http::StatusCode;
use serde_json::Value;

use crate::common::{join_directly, test_server};

#[tokio::test]
async fn test_health_check_returns_ok() {
    let (server, _state) = test_server();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_liveness_probe() {
    let (server, _state) = test_server();

    let response = server.get("/health/live").await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "alive");
}

#[tokio::test]
async fn test_readiness_reports_room_count() {
    let (server, state) = test_server();
    let _alice = join_directly(&state, "hw-ready", "alice").await;

    let response = server.get("/health/ready").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["collaboration"]["active_rooms"], 1);
}

#[tokio::test]
async fn test_readiness_fails_during_shutdown() {
    let (server, state) = test_server();

    state.shutdown().await;
    let response = server.get("/health/ready").await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json::<Value>()["status"], "unhealthy");
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_prometheus_text() {
    let (server, _state) = test_server();
    server.get("/health").await;

    let response = server.get("/metrics").await;

    response.assert_status_ok();
    assert!(response.text().contains("grading_collab_http_requests_total"));
}
