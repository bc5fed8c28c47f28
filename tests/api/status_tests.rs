//! Collaboration REST API Tests

use axum::http::StatusCode;
use serde_json::Value;

use grading_collab::domain::Role;

use crate::common::{join_directly, test_server, token};

#[tokio::test]
async fn status_requires_a_token() {
    let (server, _state) = test_server();

    server
        .get("/api/v1/collaboration/hw-1/status")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    server
        .get("/api/v1/collaboration/hw-1/status")
        .authorization_bearer("not-a-jwt")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn status_of_missing_room_is_not_found() {
    let (server, _state) = test_server();

    let response = server
        .get("/api/v1/collaboration/hw-none/status")
        .authorization_bearer(token("alice", Role::Ta))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["code"], 10001);
}

#[tokio::test]
async fn access_token_query_parameter_is_accepted() {
    let (server, _state) = test_server();
    let token = token("alice", Role::Ta);

    server
        .get(&format!(
            "/api/v1/collaboration/hw-none/status?access_token={token}"
        ))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_reflects_participants() {
    let (server, state) = test_server();
    let _alice = join_directly(&state, "hw-status", "alice").await;
    let _bob = join_directly(&state, "hw-status", "bob").await;

    let response = server
        .get("/api/v1/collaboration/hw-status/status")
        .authorization_bearer(token("carol", Role::Professor))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["assignment_id"], "hw-status");
    assert_eq!(body["status"], "active");
    assert_eq!(body["active_users"].as_array().unwrap().len(), 2);
    assert!(body["current_grader"].is_null());
    assert!(body["session_id"]
        .as_str()
        .unwrap()
        .starts_with("collab_hw-status_"));
}

#[tokio::test]
async fn rest_lock_is_first_requester_wins() {
    let (server, state) = test_server();
    let _alice = join_directly(&state, "hw-lock", "alice").await;
    let _bob = join_directly(&state, "hw-lock", "bob").await;

    let alice = server
        .post("/api/v1/collaboration/hw-lock/lock")
        .authorization_bearer(token("alice", Role::Ta))
        .await;
    alice.assert_status_ok();
    let alice: Value = alice.json();
    assert_eq!(alice["granted"], true);
    assert_eq!(alice["current_grader"], "alice");

    let bob: Value = server
        .post("/api/v1/collaboration/hw-lock/lock")
        .authorization_bearer(token("bob", Role::Ta))
        .await
        .json();
    assert_eq!(bob["granted"], false);
    assert_eq!(bob["current_grader"], "alice");

    // Bob cannot release a lock he does not hold.
    let bob_release: Value = server
        .post("/api/v1/collaboration/hw-lock/unlock")
        .authorization_bearer(token("bob", Role::Ta))
        .await
        .json();
    assert_eq!(bob_release["granted"], false);
    assert_eq!(bob_release["current_grader"], "alice");

    let alice_release: Value = server
        .post("/api/v1/collaboration/hw-lock/unlock")
        .authorization_bearer(token("alice", Role::Ta))
        .await
        .json();
    assert_eq!(alice_release["granted"], true);
    assert!(alice_release["current_grader"].is_null());
}

#[tokio::test]
async fn rest_lock_requires_participation() {
    let (server, state) = test_server();
    let _alice = join_directly(&state, "hw-member", "alice").await;

    server
        .post("/api/v1/collaboration/hw-member/lock")
        .authorization_bearer(token("mallory", Role::Ta))
        .await
        .assert_status(StatusCode::CONFLICT);

    server
        .post("/api/v1/collaboration/hw-nowhere/lock")
        .authorization_bearer(token("alice", Role::Ta))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn teardown_is_professor_only() {
    let (server, state) = test_server();
    let mut alice = join_directly(&state, "hw-close", "alice").await;

    server
        .delete("/api/v1/collaboration/hw-close")
        .authorization_bearer(token("alice", Role::Ta))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let response = server
        .delete("/api/v1/collaboration/hw-close")
        .authorization_bearer(token("prof", Role::Professor))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "closed");

    // The participant hears about it before its socket is closed.
    let mut saw_closed = false;
    while let Some(outbound) = alice.outbox.recv().await {
        if let grading_collab::application::services::Outbound::Close { code, .. } = outbound {
            assert_eq!(code, 1000);
            saw_closed = true;
            break;
        }
    }
    assert!(saw_closed);

    server
        .get("/api/v1/collaboration/hw-close/status")
        .authorization_bearer(token("prof", Role::Professor))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}
