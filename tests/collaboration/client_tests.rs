//! The client core against a real server.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use grading_collab::client::{
    ClientConfig, ClientEvent, ClientView, CollaborationClient, ConnectionError, ConnectionState,
    Credential, StaticCredential,
};
use grading_collab::domain::{AssignmentId, Role, UserId};

use crate::common::{token, TestApp};

fn client(app: &TestApp, assignment: &str, user: &str, token: String) -> CollaborationClient {
    let credential = Credential::new(token, UserId::new(user));
    CollaborationClient::new(
        ClientConfig::new(app.http_url()),
        AssignmentId::new(assignment),
        Arc::new(StaticCredential(Some(credential))),
    )
    .unwrap()
}

fn grader(app: &TestApp, assignment: &str, user: &str) -> CollaborationClient {
    client(app, assignment, user, token(user, Role::Ta))
}

async fn wait_for(
    client: &CollaborationClient,
    predicate: impl FnMut(&ClientView) -> bool,
) -> ClientView {
    let mut rx = client.watch();
    let view = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("client never reached expected state")
        .expect("client driver stopped");
    view.clone()
}

fn users(view: &ClientView) -> usize {
    view.session.as_ref().map_or(0, |s| s.active_users.len())
}

#[tokio::test]
async fn two_clients_share_presence_and_lock() {
    let app = TestApp::spawn().await;
    let alice = grader(&app, "hw-e2e", "alice");
    let bob = grader(&app, "hw-e2e", "bob");

    alice.connect().await.unwrap();
    wait_for(&alice, |v| v.session.is_some()).await;
    bob.connect().await.unwrap();
    wait_for(&alice, |v| users(v) == 2).await;
    wait_for(&bob, |v| users(v) == 2).await;

    assert!(alice.request_grader_lock());
    let alice_view = wait_for(&alice, |v| v.current_grader().is_some()).await;
    assert!(alice_view.can_grade());
    let bob_view = wait_for(&bob, |v| v.current_grader().is_some()).await;
    assert!(!bob_view.can_grade());

    let snapshot = bob.session_status().await.unwrap().unwrap();
    assert_eq!(snapshot.current_grader, Some(UserId::new("alice")));

    alice.disconnect().await;
    assert!(!alice.is_connected());
    assert!(alice.view().session.is_none());

    let bob_view = wait_for(&bob, |v| users(v) == 1).await;
    assert_eq!(bob_view.current_grader(), None);
    assert!(bob_view.can_grade());
}

#[tokio::test]
async fn grade_updates_flow_between_clients() {
    let app = TestApp::spawn().await;
    let alice = grader(&app, "hw-e2e-relay", "alice");
    let bob = grader(&app, "hw-e2e-relay", "bob");
    let mut bob_events = bob.subscribe();

    alice.connect().await.unwrap();
    bob.connect().await.unwrap();
    wait_for(&alice, |v| users(v) == 2).await;
    wait_for(&bob, |v| users(v) == 2).await;

    let scores = BTreeMap::from([("q1".to_string(), 8.0), ("q2".to_string(), 9.0)]);
    assert!(alice.send_grade_update(scores.clone(), 17.0, "Good structure, needs citations"));

    let update = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let ClientEvent::GradeUpdate(update) = bob_events.recv().await.unwrap() {
                return update;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(update.criteria_scores, scores);
    assert_eq!(update.total_score, 17.0);
    assert_eq!(update.feedback, "Good structure, needs citations");
    assert_eq!(update.user_id, Some(UserId::new("alice")));
}

#[tokio::test]
async fn status_query_for_unknown_room_is_none() {
    let app = TestApp::spawn().await;
    let alice = grader(&app, "hw-nobody", "alice");

    assert_eq!(alice.session_status().await.unwrap(), None);
}

#[tokio::test]
async fn rejected_token_is_a_terminal_error() {
    let app = TestApp::spawn().await;
    let mallory = client(&app, "hw-e2e-auth", "mallory", "forged".into());

    mallory.connect().await.unwrap();
    let view = wait_for(&mallory, |v| v.error.is_some()).await;

    assert_eq!(view.error, Some(ConnectionError::Unauthorized(401)));
    assert_eq!(view.state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn server_shutdown_triggers_reconnect() {
    let app = TestApp::spawn().await;
    let alice = grader(&app, "hw-e2e-restart", "alice");

    alice.connect().await.unwrap();
    wait_for(&alice, ClientView::is_connected).await;

    app.shutdown().await;

    let view = wait_for(&alice, |v| v.state == ConnectionState::Reconnecting).await;
    assert_eq!(view.attempt, 1);
    alice.disconnect().await;
    assert_eq!(alice.state(), ConnectionState::Disconnected);
}
