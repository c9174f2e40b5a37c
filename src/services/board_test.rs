use super::*;
use crate::db::models::Role;
use crate::protocol::ServerMessage;
use crate::services::collab;
use crate::state::test_helpers::{
    assert_no_message, connect, drain, recv_message, seed_member, seed_project, seed_user, test_app_state,
    test_app_state_with_store,
};

fn new_task(title: &str) -> NewTask {
    NewTask { title: title.into(), ..NewTask::default() }
}

fn column_positions(view: &BoardView) -> Vec<i32> {
    view.columns.iter().map(|c| c.column.position).collect()
}

fn task_positions(column: &ColumnView) -> Vec<i32> {
    column.tasks.iter().map(|t| t.position).collect()
}

async fn board_with_owner() -> (AppState, Identity, BoardView) {
    let state = test_app_state();
    let owner = seed_user(&state, "owner").await;
    let project_id = seed_project(&state, &owner).await;
    let board = create_board(&state, &owner, project_id, "Sprint", "").await.unwrap();
    (state, owner, board)
}

// =============================================================================
// BOARDS
// =============================================================================

#[tokio::test]
async fn create_board_adds_default_columns_in_order() {
    let (_state, _owner, board) = board_with_owner().await;
    let titles: Vec<&str> = board.columns.iter().map(|c| c.column.title.as_str()).collect();
    assert_eq!(titles, vec!["Backlog", "To Do", "In Progress", "Review", "Done"]);
    assert_eq!(column_positions(&board), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn second_board_for_project_is_rejected() {
    let (state, owner, board) = board_with_owner().await;
    let err = create_board(&state, &owner, board.board.project_id, "Again", "")
        .await
        .unwrap_err();
    assert!(matches!(err, BoardError::BoardExists(_)));
}

#[tokio::test]
async fn viewer_cannot_mutate_but_can_read() {
    let (state, _owner, board) = board_with_owner().await;
    let viewer = seed_user(&state, "viewer").await;
    seed_member(&state, board.board.project_id, &viewer, Role::Viewer).await;

    let err = create_task(&state, &viewer, board.columns[0].column.id, new_task("nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, BoardError::Membership(MembershipError::Forbidden { .. })));

    let view = get_board(&state, &viewer, board.board.id).await.unwrap();
    assert_eq!(view.columns.len(), 5);
}

#[tokio::test]
async fn non_member_cannot_read_board() {
    let (state, _owner, board) = board_with_owner().await;
    let stranger = seed_user(&state, "stranger").await;
    let err = get_board(&state, &stranger, board.board.id).await.unwrap_err();
    assert!(matches!(err, BoardError::Membership(MembershipError::NotMember(_))));
    let err = get_project_board(&state, &stranger, board.board.project_id)
        .await
        .unwrap_err();
    assert!(matches!(err, BoardError::Membership(MembershipError::NotMember(_))));
}

// =============================================================================
// COLUMNS
// =============================================================================

#[tokio::test]
async fn create_column_at_position_shifts_later_columns() {
    let (state, owner, board) = board_with_owner().await;
    let column = create_column(&state, &owner, board.board.id, "Blocked", None, Some(1))
        .await
        .unwrap();
    assert_eq!(column.position, 1);
    assert_eq!(column.color, DEFAULT_COLUMN_COLOR);

    let view = get_board(&state, &owner, board.board.id).await.unwrap();
    assert_eq!(view.columns[1].column.id, column.id);
    assert_eq!(view.columns[2].column.title, "To Do");
    assert_eq!(column_positions(&view), vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn create_column_without_position_appends() {
    let (state, owner, board) = board_with_owner().await;
    let column = create_column(&state, &owner, board.board.id, "Archive", Some("#000000"), None)
        .await
        .unwrap();
    assert_eq!(column.position, 5);
}

#[tokio::test]
async fn blank_column_title_is_invalid() {
    let (state, owner, board) = board_with_owner().await;
    let err = create_column(&state, &owner, board.board.id, "   ", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BoardError::InvalidInput(_)));
}

#[tokio::test]
async fn update_column_keeps_position() {
    let (state, owner, board) = board_with_owner().await;
    let target = board.columns[2].column.id;
    let patch = ColumnPatch { title: Some("Doing".into()), color: None };
    let column = update_column(&state, &owner, target, patch).await.unwrap();
    assert_eq!(column.title, "Doing");
    assert_eq!(column.position, 2);
}

#[tokio::test]
async fn delete_column_removes_tasks_and_closes_gap() {
    let (state, owner, board) = board_with_owner().await;
    let doomed = board.columns[1].column.id;
    let task = create_task(&state, &owner, doomed, new_task("gone")).await.unwrap();

    delete_column(&state, &owner, doomed).await.unwrap();

    let view = get_board(&state, &owner, board.board.id).await.unwrap();
    assert_eq!(column_positions(&view), vec![0, 1, 2, 3]);
    assert!(view.columns.iter().all(|c| c.column.id != doomed));
    assert!(state.store.find_task(task.id).await.unwrap().is_none());
}

#[tokio::test]
async fn reorder_columns_applies_permutation() {
    let (state, owner, board) = board_with_owner().await;
    let mut ids: Vec<Uuid> = board.columns.iter().map(|c| c.column.id).collect();
    ids.reverse();

    let columns = reorder_columns(&state, &owner, board.board.id, &ids).await.unwrap();
    let order: Vec<Uuid> = columns.iter().map(|c| c.id).collect();
    assert_eq!(order, ids);
    assert_eq!(columns.iter().map(|c| c.position).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn partial_reorder_is_a_precondition_failure() {
    let (state, owner, board) = board_with_owner().await;
    let ids: Vec<Uuid> = board.columns.iter().take(3).map(|c| c.column.id).collect();

    let err = reorder_columns(&state, &owner, board.board.id, &ids).await.unwrap_err();
    assert!(matches!(err, BoardError::Ordering(OrderingError::NotAPermutation { expected: 5 })));
    assert_eq!(err.error_code(), "E_ORDERING_PRECONDITION");

    let view = get_board(&state, &owner, board.board.id).await.unwrap();
    assert_eq!(view.columns[0].column.title, "Backlog");
}

// =============================================================================
// TASKS
// =============================================================================

#[tokio::test]
async fn create_task_defaults_and_status_follow_column() {
    let (state, owner, board) = board_with_owner().await;
    let task = create_task(&state, &owner, board.columns[2].column.id, new_task("  Ship it  "))
        .await
        .unwrap();
    assert_eq!(task.title, "Ship it");
    assert_eq!(task.priority, Priority::Medium);
    assert_eq!(task.status, "In Progress");
    assert_eq!(task.position, 0);
    assert_eq!(task.last_modified_by, owner.user_id);
}

#[tokio::test]
async fn create_task_at_front_shifts_existing() {
    let (state, owner, board) = board_with_owner().await;
    let column_id = board.columns[0].column.id;
    let first = create_task(&state, &owner, column_id, new_task("first")).await.unwrap();
    let front = NewTask { position: Some(0), ..new_task("front") };
    let second = create_task(&state, &owner, column_id, front).await.unwrap();

    let view = get_board(&state, &owner, board.board.id).await.unwrap();
    let ids: Vec<Uuid> = view.columns[0].tasks.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
    assert_eq!(task_positions(&view.columns[0]), vec![0, 1]);
}

#[tokio::test]
async fn negative_estimate_is_invalid() {
    let (state, owner, board) = board_with_owner().await;
    let data = NewTask { estimated_hours: Some(-1.0), ..new_task("t") };
    let err = create_task(&state, &owner, board.columns[0].column.id, data).await.unwrap_err();
    assert!(matches!(err, BoardError::InvalidInput(_)));
}

#[tokio::test]
async fn update_task_can_clear_assignee() {
    let (state, owner, board) = board_with_owner().await;
    let data = NewTask { assigned_to: Some(owner.user_id), ..new_task("t") };
    let task = create_task(&state, &owner, board.columns[0].column.id, data).await.unwrap();

    let patch: TaskPatch = serde_json::from_str(r#"{"assignedTo": null, "priority": "high"}"#).unwrap();
    let updated = update_task(&state, &owner, task.id, patch).await.unwrap();
    assert_eq!(updated.assigned_to, None);
    assert_eq!(updated.priority, Priority::High);

    let untouched: TaskPatch = serde_json::from_str(r#"{"title": "renamed"}"#).unwrap();
    assert!(untouched.assigned_to.is_none());
}

#[tokio::test]
async fn move_task_across_columns_renumbers_both() {
    // Backlog = [], To Do = [T1, T2]; move T2 to Backlog index 0.
    let (state, owner, board) = board_with_owner().await;
    let backlog = board.columns[0].column.id;
    let todo = board.columns[1].column.id;
    let t1 = create_task(&state, &owner, todo, new_task("T1")).await.unwrap();
    let t2 = create_task(&state, &owner, todo, new_task("T2")).await.unwrap();

    let moved = move_task(&state, &owner, t2.id, backlog, 0).await.unwrap();
    assert_eq!(moved.column_id, backlog);
    assert_eq!(moved.position, 0);
    assert_eq!(moved.status, "Backlog");

    let view = get_board(&state, &owner, board.board.id).await.unwrap();
    assert_eq!(view.columns[0].tasks.iter().map(|t| t.id).collect::<Vec<_>>(), vec![t2.id]);
    assert_eq!(view.columns[1].tasks.iter().map(|t| t.id).collect::<Vec<_>>(), vec![t1.id]);
    assert_eq!(task_positions(&view.columns[0]), vec![0]);
    assert_eq!(task_positions(&view.columns[1]), vec![0]);
}

#[tokio::test]
async fn move_within_column_reorders() {
    let (state, owner, board) = board_with_owner().await;
    let column_id = board.columns[0].column.id;
    let mut ids = Vec::new();
    for title in ["a", "b", "c"] {
        ids.push(create_task(&state, &owner, column_id, new_task(title)).await.unwrap().id);
    }

    move_task(&state, &owner, ids[0], column_id, 99).await.unwrap();

    let tasks = state.store.list_tasks(column_id).await.unwrap();
    assert_eq!(tasks.iter().map(|t| t.id).collect::<Vec<_>>(), vec![ids[1], ids[2], ids[0]]);
    assert_eq!(tasks.iter().map(|t| t.position).collect::<Vec<_>>(), vec![0, 1, 2]);
}

#[tokio::test]
async fn no_op_move_publishes_nothing() {
    let (state, owner, board) = board_with_owner().await;
    let column_id = board.columns[0].column.id;
    let task = create_task(&state, &owner, column_id, new_task("a")).await.unwrap();
    let (conn, mut rx) = connect(&state, &owner).await;
    collab::join_project(&state, conn, board.board.project_id).await.unwrap();
    drain(&mut rx);

    let same = move_task(&state, &owner, task.id, column_id, 0).await.unwrap();
    assert_eq!(same.position, 0);
    assert_eq!(same.updated_at, task.updated_at);
    assert_no_message(&mut rx).await;
}

#[tokio::test]
async fn move_to_another_boards_column_is_rejected() {
    let (state, owner, board) = board_with_owner().await;
    let other_project = seed_project(&state, &owner).await;
    let other = create_board(&state, &owner, other_project, "Other", "").await.unwrap();
    let task = create_task(&state, &owner, board.columns[0].column.id, new_task("a")).await.unwrap();

    let err = move_task(&state, &owner, task.id, other.columns[0].column.id, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, BoardError::CrossBoardMove(_)));
}

#[tokio::test]
async fn delete_task_closes_gap_and_cascades_comments() {
    let (state, owner, board) = board_with_owner().await;
    let column_id = board.columns[0].column.id;
    let a = create_task(&state, &owner, column_id, new_task("a")).await.unwrap();
    let b = create_task(&state, &owner, column_id, new_task("b")).await.unwrap();
    let c = create_task(&state, &owner, column_id, new_task("c")).await.unwrap();
    add_comment(&state, &owner, b.id, "looks good").await.unwrap();

    delete_task(&state, &owner, b.id).await.unwrap();

    let tasks = state.store.list_tasks(column_id).await.unwrap();
    assert_eq!(tasks.iter().map(|t| t.id).collect::<Vec<_>>(), vec![a.id, c.id]);
    assert_eq!(tasks.iter().map(|t| t.position).collect::<Vec<_>>(), vec![0, 1]);
    assert!(state.store.list_comments(b.id).await.unwrap().is_empty());
    let err = delete_task(&state, &owner, b.id).await.unwrap_err();
    assert!(matches!(err, BoardError::TaskNotFound(_)));
}

#[tokio::test]
async fn blank_comment_is_invalid() {
    let (state, owner, board) = board_with_owner().await;
    let task = create_task(&state, &owner, board.columns[0].column.id, new_task("a")).await.unwrap();
    let err = add_comment(&state, &owner, task.id, "  ").await.unwrap_err();
    assert!(matches!(err, BoardError::InvalidInput(_)));
    let comment = add_comment(&state, &owner, task.id, "ok").await.unwrap();
    assert_eq!(list_comments(&state, &owner, task.id).await.unwrap(), vec![comment]);
}

// =============================================================================
// EVENTS
// =============================================================================

#[tokio::test]
async fn mutations_broadcast_board_events_with_increasing_seq() {
    let (state, owner, board) = board_with_owner().await;
    let member = seed_user(&state, "member").await;
    seed_member(&state, board.board.project_id, &member, Role::Member).await;
    let (conn, mut rx) = connect(&state, &member).await;
    collab::join_project(&state, conn, board.board.project_id).await.unwrap();
    drain(&mut rx);

    let task = create_task(&state, &owner, board.columns[0].column.id, new_task("a")).await.unwrap();
    move_task(&state, &owner, task.id, board.columns[1].column.id, 0).await.unwrap();

    let ServerMessage::BoardEvent(created) = recv_message(&mut rx).await else {
        panic!("expected board_event");
    };
    assert!(matches!(created.kind, BoardEventKind::TaskCreated(_)));
    assert_eq!(created.actor.id, owner.user_id);

    let ServerMessage::BoardEvent(moved) = recv_message(&mut rx).await else {
        panic!("expected board_event");
    };
    let BoardEventKind::TaskMoved(payload) = moved.kind else {
        panic!("expected task_moved");
    };
    assert_eq!(payload.from_column_id, board.columns[0].column.id);
    assert_eq!(payload.to_column_id, board.columns[1].column.id);
    assert!(moved.seq > created.seq);
}

#[tokio::test]
async fn failed_publish_keeps_mutation_and_broadcasts_nothing() {
    let (state, store) = test_app_state_with_store();
    let owner = seed_user(&state, "owner").await;
    let project_id = seed_project(&state, &owner).await;
    let board = create_board(&state, &owner, project_id, "Sprint", "").await.unwrap();
    let (conn, mut rx) = connect(&state, &owner).await;
    collab::join_project(&state, conn, project_id).await.unwrap();
    drain(&mut rx);

    store.fail_appends(true);
    let task = create_task(&state, &owner, board.columns[0].column.id, new_task("a")).await.unwrap();

    assert!(state.store.find_task(task.id).await.unwrap().is_some());
    assert_no_message(&mut rx).await;
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_moves_keep_positions_dense() {
    let (state, owner, board) = board_with_owner().await;
    let columns: Vec<Uuid> = board.columns.iter().map(|c| c.column.id).collect();
    let mut tasks = Vec::new();
    for i in 0..8 {
        let task = create_task(&state, &owner, columns[i % 2], new_task(&format!("t{i}")))
            .await
            .unwrap();
        tasks.push(task.id);
    }

    let mut handles = Vec::new();
    for (i, task_id) in tasks.iter().copied().enumerate() {
        let state = state.clone();
        let owner = owner.clone();
        let target = columns[(i + 1) % 3];
        handles.push(tokio::spawn(async move {
            move_task(&state, &owner, task_id, target, 0).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let view = get_board(&state, &owner, board.board.id).await.unwrap();
    let mut total = 0;
    for column in &view.columns {
        assert!(ordering::is_dense(&task_positions(column)), "column {} not dense", column.column.title);
        total += column.tasks.len();
    }
    assert_eq!(total, tasks.len());
}
