//! Relay of grading payloads between room members.

use serde_json::json;

use grading_collab::domain::Role;

use crate::common::TestApp;

#[tokio::test]
async fn grade_update_reaches_every_other_member_once() {
    let app = TestApp::spawn().await;
    let mut alice = app.join("hw-relay", "alice", Role::Ta).await;
    let mut bob = app.join("hw-relay", "bob", Role::Ta).await;
    let mut carol = app.join("hw-relay", "carol", Role::Professor).await;
    alice.expect_status("user_joined").await;
    alice.expect_status("user_joined").await;
    bob.expect_status("user_joined").await;

    alice
        .send_json(json!({
            "type": "grade_update",
            "assignment_id": "hw-relay",
            "criteria_scores": {"q1": 8, "q2": 9},
            "total_score": 17,
            "feedback": "Good structure, needs citations"
        }))
        .await;

    for socket in [&mut bob, &mut carol] {
        let update = socket.next_envelope().await;
        assert_eq!(update["type"], "grade_update");
        assert_eq!(update["user_id"], "alice");
        assert_eq!(update["criteria_scores"]["q1"], 8.0);
        assert_eq!(update["criteria_scores"]["q2"], 9.0);
        assert_eq!(update["total_score"], 17.0);
        assert_eq!(update["feedback"], "Good structure, needs citations");
        assert!(update["timestamp"].is_string());
    }
    alice.expect_silence().await;
    bob.expect_silence().await;
}

#[tokio::test]
async fn comments_and_annotations_are_never_gated() {
    let app = TestApp::spawn().await;
    let mut alice = app.join("hw-notes", "alice", Role::Ta).await;
    let mut bob = app.join("hw-notes", "bob", Role::Ta).await;
    alice.expect_status("user_joined").await;

    alice
        .send_json(json!({"type": "request_grader_lock", "assignment_id": "hw-notes"}))
        .await;
    alice.expect_status("current_grader_changed").await;
    bob.expect_status("current_grader_changed").await;

    bob.send_json(json!({
        "type": "criteria_comment_update",
        "assignment_id": "hw-notes",
        "criteria_id": "q1",
        "comment": "Check the second citation"
    }))
    .await;
    bob.send_json(json!({
        "type": "file_annotation_update",
        "assignment_id": "hw-notes",
        "file_id": "essay.pdf",
        "annotation": {"page": 2, "text": "unclear"}
    }))
    .await;

    let comment = alice.next_envelope().await;
    assert_eq!(comment["type"], "criteria_comment_update");
    assert_eq!(comment["user_id"], "bob");
    assert_eq!(comment["comment"], "Check the second citation");

    let annotation = alice.next_envelope().await;
    assert_eq!(annotation["type"], "file_annotation_update");
    assert_eq!(annotation["annotation"]["page"], 2);
}

#[tokio::test]
async fn grade_update_from_non_holder_is_rejected() {
    let app = TestApp::spawn().await;
    let mut alice = app.join("hw-gate", "alice", Role::Ta).await;
    let mut bob = app.join("hw-gate", "bob", Role::Ta).await;
    alice.expect_status("user_joined").await;

    alice
        .send_json(json!({"type": "request_grader_lock", "assignment_id": "hw-gate"}))
        .await;
    alice.expect_status("current_grader_changed").await;
    bob.expect_status("current_grader_changed").await;

    bob.send_json(json!({
        "type": "grade_update",
        "assignment_id": "hw-gate",
        "criteria_scores": {"q1": 3},
        "total_score": 3
    }))
    .await;

    let fault = bob.expect_status("error").await;
    assert_eq!(fault["details"]["code"], "lock_held");
    alice.expect_silence().await;
}

#[tokio::test]
async fn malformed_frames_do_not_close_the_socket() {
    let app = TestApp::spawn().await;
    let mut alice = app.join("hw-garbage", "alice", Role::Ta).await;

    alice.send_raw("definitely not json").await;
    let fault = alice.expect_status("error").await;
    assert_eq!(fault["details"]["code"], "invalid_envelope");

    alice.send_raw(r#"{"type":"cursor_moved"}"#).await;
    alice.expect_status("error").await;

    alice
        .send_json(json!({"type": "request_current_grader", "assignment_id": "hw-garbage"}))
        .await;
    let info = alice.expect_status("current_grader_info").await;
    assert!(info["details"]["current_grader"].is_null());
}

#[tokio::test]
async fn frames_for_another_room_are_dropped() {
    let app = TestApp::spawn().await;
    let mut alice = app.join("hw-a", "alice", Role::Ta).await;
    let mut bob = app.join("hw-a", "bob", Role::Ta).await;
    alice.expect_status("user_joined").await;

    alice
        .send_json(json!({
            "type": "criteria_comment_update",
            "assignment_id": "hw-b",
            "criteria_id": "q1",
            "comment": "wrong room"
        }))
        .await;

    bob.expect_silence().await;
}
