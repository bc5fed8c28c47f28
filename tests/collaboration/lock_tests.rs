//! Grader lock arbitration over the socket.

use serde_json::json;

use grading_collab::domain::Role;

use crate::common::TestApp;

fn lock_envelope(kind: &str, assignment: &str) -> serde_json::Value {
    json!({"type": kind, "assignment_id": assignment})
}

#[tokio::test]
async fn first_requester_wins_and_loser_is_told_privately() {
    let app = TestApp::spawn().await;
    let mut alice = app.join("hw-lock", "alice", Role::Ta).await;
    let mut bob = app.join("hw-lock", "bob", Role::Ta).await;
    alice.expect_status("user_joined").await;

    alice.send_json(lock_envelope("request_grader_lock", "hw-lock")).await;
    for socket in [&mut alice, &mut bob] {
        let changed = socket.expect_status("current_grader_changed").await;
        assert_eq!(changed["details"]["current_grader"], "alice");
    }

    bob.send_json(lock_envelope("request_grader_lock", "hw-lock")).await;
    let denied = bob.expect_status("error").await;
    assert_eq!(denied["details"]["code"], "lock_held");
    assert_eq!(denied["details"]["current_grader"], "alice");
    alice.expect_silence().await;

    alice.send_json(lock_envelope("release_grader_lock", "hw-lock")).await;
    for socket in [&mut alice, &mut bob] {
        let released = socket.expect_status("grader_lock_released").await;
        assert_eq!(released["details"]["released_by"], "alice");
        assert_eq!(released["details"]["reason"], "released");
    }

    bob.send_json(lock_envelope("request_grader_lock", "hw-lock")).await;
    let changed = alice.expect_status("current_grader_changed").await;
    assert_eq!(changed["details"]["current_grader"], "bob");
}

#[tokio::test]
async fn non_holder_release_is_rejected() {
    let app = TestApp::spawn().await;
    let mut alice = app.join("hw-release", "alice", Role::Ta).await;
    let mut bob = app.join("hw-release", "bob", Role::Ta).await;

    alice
        .send_json(lock_envelope("request_grader_lock", "hw-release"))
        .await;
    bob.expect_status("current_grader_changed").await;

    bob.send_json(lock_envelope("release_grader_lock", "hw-release"))
        .await;
    let fault = bob.expect_status("error").await;
    assert_eq!(fault["details"]["code"], "not_lock_holder");

    let status = app.state.rooms.snapshot(&"hw-release".into()).await.unwrap();
    assert_eq!(status.current_grader.map(|u| u.to_string()), Some("alice".into()));
}

#[tokio::test]
async fn current_grader_query_answers_only_the_requester() {
    let app = TestApp::spawn().await;
    let mut alice = app.join("hw-query", "alice", Role::Ta).await;
    let mut bob = app.join("hw-query", "bob", Role::Professor).await;
    alice.expect_status("user_joined").await;

    alice
        .send_json(lock_envelope("request_grader_lock", "hw-query"))
        .await;
    alice.expect_status("current_grader_changed").await;
    bob.expect_status("current_grader_changed").await;

    bob.send_json(lock_envelope("request_current_grader", "hw-query"))
        .await;
    let info = bob.expect_status("current_grader_info").await;
    assert_eq!(info["details"]["current_grader"], "alice");
    assert_eq!(info["details"]["active_users"].as_array().unwrap().len(), 2);
    alice.expect_silence().await;
}

#[tokio::test]
async fn holder_dropping_abruptly_releases_the_lock() {
    let app = TestApp::spawn().await;
    let mut alice = app.join("hw-drop", "alice", Role::Ta).await;
    let mut bob = app.join("hw-drop", "bob", Role::Ta).await;

    alice.send_json(lock_envelope("request_grader_lock", "hw-drop")).await;
    bob.expect_status("current_grader_changed").await;

    alice.abort();

    let left = bob.expect_status("user_left").await;
    assert_eq!(left["details"]["user_id"], "alice");
    let released = bob.expect_status("grader_lock_released").await;
    assert_eq!(released["details"]["reason"], "disconnected");
    assert_eq!(released["details"]["released_by"], "alice");

    // Bob can take over immediately.
    bob.send_json(lock_envelope("request_grader_lock", "hw-drop")).await;
    let changed = bob.expect_status("current_grader_changed").await;
    assert_eq!(changed["details"]["current_grader"], "bob");
}
