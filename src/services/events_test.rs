use super::*;
use crate::db::models::{Role, TaskComment, now_ms};
use crate::protocol::{ColumnsReordered, MemberInfo};
use crate::services::collab;
use crate::state::test_helpers::{
    assert_no_message, connect, drain, recv_message, seed_member, seed_project, seed_user, test_app_state_with_store,
};

fn reorder_event() -> DomainEvent {
    DomainEvent::Board(BoardEventKind::ColumnsReordered(ColumnsReordered {
        board_id: Uuid::new_v4(),
        column_ids: vec![Uuid::new_v4()],
    }))
}

#[tokio::test]
async fn publish_persists_then_broadcasts_with_seq() {
    let (state, store) = test_app_state_with_store();
    let owner = seed_user(&state, "owner").await;
    let project_id = seed_project(&state, &owner).await;
    let (conn, mut rx) = connect(&state, &owner).await;
    collab::join_project(&state, conn, project_id).await.unwrap();
    drain(&mut rx);

    let seq = publish(&state, project_id, &owner, reorder_event()).await.unwrap();

    assert_eq!(store.activity_count(), 1);
    let history = state.store.activity_since(project_id, 0, 10).await.unwrap();
    assert_eq!(history[0].seq, seq);
    assert_eq!(history[0].action, "columns_reordered");
    assert!(history[0].payload.get("boardId").is_some());

    let ServerMessage::BoardEvent(event) = recv_message(&mut rx).await else {
        panic!("expected board_event");
    };
    assert_eq!(event.seq, seq);
    assert_eq!(event.project_id, project_id);
    assert_eq!(event.actor, owner.actor());
    assert_eq!(event.timestamp, history[0].created_at);
}

#[tokio::test]
async fn failed_append_broadcasts_nothing() {
    let (state, store) = test_app_state_with_store();
    let owner = seed_user(&state, "owner").await;
    let project_id = seed_project(&state, &owner).await;
    let (conn, mut rx) = connect(&state, &owner).await;
    collab::join_project(&state, conn, project_id).await.unwrap();
    drain(&mut rx);

    store.fail_appends(true);
    let err = publish(&state, project_id, &owner, reorder_event()).await.unwrap_err();
    assert!(matches!(err, EventError::Store(_)));
    assert_no_message(&mut rx).await;
    assert_eq!(store.activity_count(), 0);
}

#[tokio::test]
async fn seq_is_strictly_increasing_per_project() {
    let (state, _store) = test_app_state_with_store();
    let owner = seed_user(&state, "owner").await;
    let first = seed_project(&state, &owner).await;
    let second = seed_project(&state, &owner).await;

    let a = publish(&state, first, &owner, reorder_event()).await.unwrap();
    let b = publish(&state, first, &owner, reorder_event()).await.unwrap();
    let c = publish(&state, second, &owner, reorder_event()).await.unwrap();
    assert!(b > a);
    assert_eq!(c, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_publishes_arrive_in_seq_order() {
    let (state, _store) = test_app_state_with_store();
    let owner = seed_user(&state, "owner").await;
    let project_id = seed_project(&state, &owner).await;
    let (conn, mut rx) = connect(&state, &owner).await;
    collab::join_project(&state, conn, project_id).await.unwrap();
    drain(&mut rx);

    let mut handles = Vec::new();
    for _ in 0..20 {
        let state = state.clone();
        let owner = owner.clone();
        handles.push(tokio::spawn(async move { publish(&state, project_id, &owner, reorder_event()).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let mut last = 0;
    for _ in 0..20 {
        let ServerMessage::BoardEvent(event) = recv_message(&mut rx).await else {
            panic!("expected board_event");
        };
        assert!(event.seq > last, "seq {} after {last}", event.seq);
        last = event.seq;
    }
}

#[tokio::test]
async fn task_events_link_activity_to_task() {
    let (state, _store) = test_app_state_with_store();
    let owner = seed_user(&state, "owner").await;
    let project_id = seed_project(&state, &owner).await;
    let comment = TaskComment {
        id: Uuid::new_v4(),
        task_id: Uuid::new_v4(),
        user_id: owner.user_id,
        content: "hi".into(),
        created_at: now_ms(),
    };

    publish(&state, project_id, &owner, DomainEvent::Board(BoardEventKind::CommentAdded(comment.clone())))
        .await
        .unwrap();

    let history = state.store.activity_since(project_id, 0, 10).await.unwrap();
    assert_eq!(history[0].task_id, Some(comment.task_id));
    assert_eq!(history[0].action, "comment_added");
}

#[tokio::test]
async fn member_removed_evicts_every_tab_before_broadcast() {
    let (state, _store) = test_app_state_with_store();
    let owner = seed_user(&state, "owner").await;
    let bob = seed_user(&state, "bob").await;
    let project_id = seed_project(&state, &owner).await;
    seed_member(&state, project_id, &bob, Role::Member).await;

    let (tab1, mut rx1) = connect(&state, &bob).await;
    let (tab2, mut rx2) = connect(&state, &bob).await;
    collab::join_project(&state, tab1, project_id).await.unwrap();
    collab::join_project(&state, tab2, project_id).await.unwrap();
    drain(&mut rx1);
    drain(&mut rx2);

    let info = MemberInfo { user_id: bob.user_id, email: bob.email.clone(), name: bob.name.clone(), role: Role::Member };
    publish(&state, project_id, &owner, DomainEvent::Member(MemberEventKind::MemberRemoved(info)))
        .await
        .unwrap();

    assert_eq!(recv_message(&mut rx1).await, ServerMessage::RemovedFromProject { project_id });
    assert_eq!(recv_message(&mut rx2).await, ServerMessage::RemovedFromProject { project_id });
    assert_no_message(&mut rx1).await;
    assert_no_message(&mut rx2).await;
    assert_eq!(state.coordinator.read().await.presence.online_count(project_id), 0);
}

#[tokio::test]
async fn evicting_user_not_in_room_sends_nothing() {
    let (state, _store) = test_app_state_with_store();
    let owner = seed_user(&state, "owner").await;
    let bob = seed_user(&state, "bob").await;
    let project_id = seed_project(&state, &owner).await;
    let (conn, mut rx) = connect(&state, &owner).await;
    collab::join_project(&state, conn, project_id).await.unwrap();
    let (_bob_conn, mut bob_rx) = connect(&state, &bob).await;
    drain(&mut rx);

    evict_member(&state, project_id, bob.user_id).await;
    assert_no_message(&mut rx).await;
    assert_no_message(&mut bob_rx).await;
}
