use super::*;
use crate::db::models::Role;
use crate::state::test_helpers::{connect, drain, recv_message, seed_project, seed_user, test_app_state};
use serde_json::json;

fn join_text(project_id: Uuid) -> String {
    json!({ "event": "join_project", "data": { "projectId": project_id } }).to_string()
}

#[tokio::test]
async fn malformed_json_yields_invalid_message_error() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let (conn, _rx) = connect(&state, &alice).await;

    let replies = process_inbound_text(&state, conn, "{not json").await;
    assert_eq!(replies.len(), 1);
    let ServerMessage::Error { code, .. } = &replies[0] else {
        panic!("expected error event");
    };
    assert_eq!(code, "E_INVALID_MESSAGE");
}

#[tokio::test]
async fn unknown_event_yields_invalid_message_error() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let (conn, _rx) = connect(&state, &alice).await;

    let text = json!({ "event": "drop_tables", "data": {} }).to_string();
    let replies = process_inbound_text(&state, conn, &text).await;
    assert!(matches!(&replies[..], [ServerMessage::Error { code, .. }] if code == "E_INVALID_MESSAGE"));
}

#[tokio::test]
async fn join_routes_reply_through_connection_channel() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let project_id = seed_project(&state, &alice).await;
    let (conn, mut rx) = connect(&state, &alice).await;

    let replies = process_inbound_text(&state, conn, &join_text(project_id)).await;
    assert!(replies.is_empty());
    assert_eq!(
        recv_message(&mut rx).await,
        ServerMessage::JoinedProject { project_id, online_count: 1, role: Role::Owner }
    );
}

#[tokio::test]
async fn join_as_non_member_replies_error_and_keeps_connection() {
    let state = test_app_state();
    let owner = seed_user(&state, "owner").await;
    let mallory = seed_user(&state, "mallory").await;
    let project_id = seed_project(&state, &owner).await;
    let (conn, _rx) = connect(&state, &mallory).await;

    let replies = process_inbound_text(&state, conn, &join_text(project_id)).await;
    assert!(matches!(&replies[..], [ServerMessage::Error { code, .. }] if code == "E_NOT_MEMBER"));
    assert!(state.coordinator.read().await.presence.identity(conn).is_some());
}

#[tokio::test]
async fn leave_then_sync_since() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let project_id = seed_project(&state, &alice).await;
    let (conn, mut rx) = connect(&state, &alice).await;
    process_inbound_text(&state, conn, &join_text(project_id)).await;
    drain(&mut rx);

    let leave = json!({ "event": "leave_project", "data": { "projectId": project_id } }).to_string();
    assert!(process_inbound_text(&state, conn, &leave).await.is_empty());
    assert_eq!(state.coordinator.read().await.presence.online_count(project_id), 0);

    let sync = json!({ "event": "sync_since", "data": { "projectId": project_id } }).to_string();
    let replies = process_inbound_text(&state, conn, &sync).await;
    assert_eq!(replies, vec![ServerMessage::ActivityBatch { project_id, activities: Vec::new() }]);
}

fn fail_connection_task() {
    panic!("connection task failed");
}

#[tokio::test]
async fn guard_releases_connection_when_task_unwinds() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let project_id = seed_project(&state, &alice).await;
    let (conn, _rx) = connect(&state, &alice).await;
    collab::join_project(&state, conn, project_id).await.unwrap();

    let guard = ConnectionGuard::new(state.clone(), conn);
    let task = tokio::spawn(async move {
        let _guard = guard;
        fail_connection_task();
    });
    assert!(task.await.unwrap_err().is_panic());

    for _ in 0..50 {
        if state.coordinator.read().await.presence.identity(conn).is_none() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let hub = state.coordinator.read().await;
    assert!(hub.presence.identity(conn).is_none());
    assert_eq!(hub.presence.online_count(project_id), 0);
    assert!(hub.rooms.members(project_id).is_empty());
}

#[tokio::test]
async fn closed_guard_disconnects_before_returning() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let (conn, _rx) = connect(&state, &alice).await;
    let (other, _rx2) = connect(&state, &alice).await;

    ConnectionGuard::new(state.clone(), conn).close().await;

    let hub = state.coordinator.read().await;
    assert!(hub.presence.identity(conn).is_none());
    assert!(hub.presence.identity(other).is_some());
}
