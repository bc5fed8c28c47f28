//! Presence, role gate, teardown and shutdown.

use std::time::Duration;

use axum::http::StatusCode;
use tokio_tungstenite::tungstenite;

use grading_collab::domain::{AssignmentId, Role};

use crate::common::{token, TestApp};

async fn wait_until_room_gone(app: &TestApp, assignment: &str) {
    let assignment = AssignmentId::new(assignment);
    for _ in 0..100 {
        if app.state.rooms.get(&assignment).is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("room {assignment} never went away");
}

#[tokio::test]
async fn welcome_carries_full_snapshot() {
    let app = TestApp::spawn().await;
    let _alice = app.join("hw-welcome", "alice", Role::Ta).await;

    let mut bob = app
        .connect("hw-welcome", &token("bob", Role::Ta))
        .await
        .unwrap();
    let welcome = bob.expect_status("session_joined").await;

    let users = welcome["details"]["active_users"].as_array().unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(welcome["details"]["status"], "active");
    assert_eq!(welcome["session_id"], welcome["details"]["session_id"]);
}

#[tokio::test]
async fn students_are_closed_with_policy_violation() {
    let app = TestApp::spawn().await;

    let mut student = app
        .connect("hw-gate", &token("sam", Role::Student))
        .await
        .unwrap();

    assert_eq!(student.expect_close().await, Some(1008));
    assert!(app.state.rooms.get(&"hw-gate".into()).is_none());
}

#[tokio::test]
async fn handshake_without_valid_token_is_rejected() {
    let app = TestApp::spawn().await;

    let Err(tungstenite::Error::Http(response)) = app.connect("hw-1", "bogus").await else {
        panic!("handshake should fail");
    };
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn presence_is_per_user_not_per_socket() {
    let app = TestApp::spawn().await;
    let mut bob = app.join("hw-tabs", "bob", Role::Ta).await;
    let first_tab = app.join("hw-tabs", "alice", Role::Ta).await;
    let second_tab = app.join("hw-tabs", "alice", Role::Ta).await;

    let joined = bob.expect_status("user_joined").await;
    assert_eq!(joined["details"]["user_id"], "alice");
    bob.expect_silence().await;

    first_tab.close().await;
    bob.expect_silence().await;

    second_tab.close().await;
    let left = bob.expect_status("user_left").await;
    assert_eq!(left["details"]["user_id"], "alice");
}

#[tokio::test]
async fn last_leave_ends_the_session() {
    let app = TestApp::spawn().await;
    let alice = app.join("hw-empty", "alice", Role::Ta).await;
    let first = app
        .state
        .rooms
        .snapshot(&"hw-empty".into())
        .await
        .unwrap()
        .session_id;

    alice.close().await;
    wait_until_room_gone(&app, "hw-empty").await;

    let _alice = app.join("hw-empty", "alice", Role::Ta).await;
    let second = app
        .state
        .rooms
        .snapshot(&"hw-empty".into())
        .await
        .unwrap()
        .session_id;
    assert_ne!(first, second);
}

#[tokio::test]
async fn professor_teardown_closes_sockets_normally() {
    let app = TestApp::spawn().await;
    let mut alice = app.join("hw-teardown", "alice", Role::Ta).await;

    let response = reqwest::Client::new()
        .delete(format!(
            "{}/api/v1/collaboration/hw-teardown",
            app.http_url()
        ))
        .bearer_auth(token("prof", Role::Professor))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let closed = alice.expect_status("session_closed").await;
    assert_eq!(closed["details"]["reason"], "closed by professor");
    assert_eq!(alice.expect_close().await, Some(1000));
}

#[tokio::test]
async fn shutdown_closes_rooms_as_going_away() {
    let app = TestApp::spawn().await;
    let mut alice = app.join("hw-shutdown", "alice", Role::Ta).await;
    let state = app.state.clone();

    let shutdown = tokio::spawn(app.shutdown());

    alice.expect_status("session_closed").await;
    assert_eq!(alice.expect_close().await, Some(1001));
    shutdown.await.unwrap();
    assert!(state.is_shutting_down());
}
