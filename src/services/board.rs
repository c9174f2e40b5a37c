//! Board service: boards, columns, tasks, and their positions.
//!
//! DESIGN
//! ======
//! Every mutation resolves the owning project, checks the caller's role, then
//! takes the board's lock before reading the current order from storage.
//! The lock makes the read-modify-write of positions atomic with respect to
//! other mutations on the same board, so concurrent moves cannot interleave
//! and break density. The position arithmetic lives in `ordering`.
//!
//! After a successful write the service publishes a board event. A failed
//! publish is logged and does not roll back the write.
//!
//! Reads need `Viewer`; writes need `Member`.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::StoreError;
use crate::db::models::{Board, Column, Priority, Role, Task, TaskComment, TaskPlacement, now_ms};
use crate::protocol::{
    BoardCreated, BoardEventKind, ColumnDeleted, ColumnsReordered, ErrorCode, TaskDeleted, TaskMoved,
};
use crate::services::auth::Identity;
use crate::services::events::{self, DomainEvent};
use crate::services::membership::{self, MembershipError};
use crate::services::ordering::{self, OrderingError};
use crate::state::AppState;

/// Columns every new board starts with, left to right.
pub const DEFAULT_COLUMNS: [(&str, &str); 5] = [
    ("Backlog", "#94a3b8"),
    ("To Do", "#3b82f6"),
    ("In Progress", "#f59e0b"),
    ("Review", "#8b5cf6"),
    ("Done", "#22c55e"),
];

const DEFAULT_COLUMN_COLOR: &str = "#64748b";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("board not found: {0}")]
    BoardNotFound(Uuid),
    #[error("project {0} has no board")]
    ProjectBoardNotFound(Uuid),
    #[error("column not found: {0}")]
    ColumnNotFound(Uuid),
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),
    #[error("project {0} already has a board")]
    BoardExists(Uuid),
    #[error("target column {0} belongs to another board")]
    CrossBoardMove(Uuid),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Ordering(#[from] OrderingError),
    #[error(transparent)]
    Membership(#[from] MembershipError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for BoardError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::BoardNotFound(_) | Self::ProjectBoardNotFound(_) => "E_BOARD_NOT_FOUND",
            Self::ColumnNotFound(_) => "E_COLUMN_NOT_FOUND",
            Self::TaskNotFound(_) => "E_TASK_NOT_FOUND",
            Self::BoardExists(_) => "E_BOARD_EXISTS",
            Self::CrossBoardMove(_) => "E_CROSS_BOARD_MOVE",
            Self::InvalidInput(_) => "E_INVALID_INPUT",
            Self::Ordering(e) => e.error_code(),
            Self::Membership(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
        }
    }
}

/// Column with its tasks in position order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnView {
    #[serde(flatten)]
    pub column: Column,
    pub tasks: Vec<Task>,
}

/// Board with its columns in position order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardView {
    #[serde(flatten)]
    pub board: Board,
    pub columns: Vec<ColumnView>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub priority: Option<Priority>,
    pub assigned_to: Option<Uuid>,
    pub estimated_hours: Option<f64>,
    /// Insert position; appended when absent.
    pub position: Option<i64>,
}

/// Partial task update. `assigned_to: Some(None)` clears the assignee.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    #[serde(default, with = "double_option")]
    pub assigned_to: Option<Option<Uuid>>,
    pub estimated_hours: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnPatch {
    pub title: Option<String>,
    pub color: Option<String>,
}

/// Distinguish an absent field from an explicit `null`.
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(de).map(Some)
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn require_title(title: &str, what: &str) -> Result<String, BoardError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(BoardError::InvalidInput(format!("{what} title is required")));
    }
    Ok(title.to_owned())
}

fn require_estimate(hours: f64) -> Result<f64, BoardError> {
    if !hours.is_finite() || hours < 0.0 {
        return Err(BoardError::InvalidInput("estimatedHours must be a non-negative number".into()));
    }
    Ok(hours)
}

async fn load_board(state: &AppState, board_id: Uuid) -> Result<Board, BoardError> {
    state
        .store
        .find_board(board_id)
        .await?
        .ok_or(BoardError::BoardNotFound(board_id))
}

async fn load_column(state: &AppState, column_id: Uuid) -> Result<(Column, Board), BoardError> {
    let column = state
        .store
        .find_column(column_id)
        .await?
        .ok_or(BoardError::ColumnNotFound(column_id))?;
    let board = load_board(state, column.board_id).await?;
    Ok((column, board))
}

async fn load_task(state: &AppState, task_id: Uuid) -> Result<(Task, Column, Board), BoardError> {
    let task = state
        .store
        .find_task(task_id)
        .await?
        .ok_or(BoardError::TaskNotFound(task_id))?;
    let (column, board) = load_column(state, task.column_id).await?;
    Ok((task, column, board))
}

async fn require(state: &AppState, project_id: Uuid, actor: &Identity, role: Role) -> Result<(), BoardError> {
    membership::require_role(state.store.as_ref(), project_id, actor.user_id, role).await?;
    Ok(())
}

async fn column_order(state: &AppState, board_id: Uuid) -> Result<Vec<Uuid>, BoardError> {
    Ok(state
        .store
        .list_columns(board_id)
        .await?
        .iter()
        .map(|c| c.id)
        .collect())
}

async fn task_order(state: &AppState, column_id: Uuid) -> Result<Vec<Uuid>, BoardError> {
    Ok(state.store.list_tasks(column_id).await?.iter().map(|t| t.id).collect())
}

async fn write_column_order(state: &AppState, order: &[Uuid]) -> Result<(), BoardError> {
    state
        .store
        .write_column_positions(&ordering::renumber(order))
        .await?;
    Ok(())
}

fn placements(column_id: Uuid, order: &[Uuid]) -> Vec<TaskPlacement> {
    ordering::renumber(order)
        .into_iter()
        .map(|(task_id, position)| TaskPlacement { task_id, column_id, position })
        .collect()
}

async fn emit(state: &AppState, project_id: Uuid, actor: &Identity, kind: BoardEventKind) {
    let action = kind.action();
    if let Err(e) = events::publish(state, project_id, actor, DomainEvent::Board(kind)).await {
        warn!(%project_id, action, error = %e, "board event publish failed");
    }
}

// =============================================================================
// BOARDS
// =============================================================================

/// Create the project's board with the default columns.
///
/// # Errors
///
/// `BoardExists` when the project already has one; membership errors for a
/// caller below `Member`.
pub async fn create_board(
    state: &AppState,
    actor: &Identity,
    project_id: Uuid,
    name: &str,
    description: &str,
) -> Result<BoardView, BoardError> {
    require(state, project_id, actor, Role::Member).await?;
    let name = require_title(name, "board")?;
    let _guard = state.board_locks.lock(project_id).await;
    if state.store.find_board_by_project(project_id).await?.is_some() {
        return Err(BoardError::BoardExists(project_id));
    }

    let now = now_ms();
    let board = Board {
        id: Uuid::new_v4(),
        project_id,
        name,
        description: description.to_owned(),
        created_by: actor.user_id,
        created_at: now,
    };
    state.store.insert_board(&board).await.map_err(|e| match e {
        StoreError::Conflict(_) => BoardError::BoardExists(project_id),
        other => other.into(),
    })?;

    let mut columns = Vec::with_capacity(DEFAULT_COLUMNS.len());
    for (i, (title, color)) in DEFAULT_COLUMNS.iter().enumerate() {
        let column = Column {
            id: Uuid::new_v4(),
            board_id: board.id,
            title: (*title).to_owned(),
            position: ordering::position_of(i),
            color: (*color).to_owned(),
            created_at: now,
        };
        state.store.insert_column(&column).await?;
        columns.push(ColumnView { column, tasks: Vec::new() });
    }
    info!(%project_id, board_id = %board.id, "board created");

    let created = BoardCreated {
        board_id: board.id,
        name: board.name.clone(),
        column_ids: columns.iter().map(|c| c.column.id).collect(),
    };
    emit(state, project_id, actor, BoardEventKind::BoardCreated(created)).await;
    Ok(BoardView { board, columns })
}

async fn assemble(state: &AppState, board: Board) -> Result<BoardView, BoardError> {
    let mut columns = Vec::new();
    for column in state.store.list_columns(board.id).await? {
        let tasks = state.store.list_tasks(column.id).await?;
        columns.push(ColumnView { column, tasks });
    }
    Ok(BoardView { board, columns })
}

/// Board with nested, ordered columns and tasks.
///
/// # Errors
///
/// `BoardNotFound`, or membership errors for non-members.
pub async fn get_board(state: &AppState, actor: &Identity, board_id: Uuid) -> Result<BoardView, BoardError> {
    let board = load_board(state, board_id).await?;
    require(state, board.project_id, actor, Role::Viewer).await?;
    assemble(state, board).await
}

/// The board belonging to a project.
///
/// # Errors
///
/// `ProjectBoardNotFound`, or membership errors for non-members.
pub async fn get_project_board(state: &AppState, actor: &Identity, project_id: Uuid) -> Result<BoardView, BoardError> {
    require(state, project_id, actor, Role::Viewer).await?;
    let board = state
        .store
        .find_board_by_project(project_id)
        .await?
        .ok_or(BoardError::ProjectBoardNotFound(project_id))?;
    assemble(state, board).await
}

// =============================================================================
// COLUMNS
// =============================================================================

/// Add a column at `position` (appended when absent), shifting later columns.
///
/// # Errors
///
/// `BoardNotFound`, `InvalidInput` for a blank title, membership errors.
pub async fn create_column(
    state: &AppState,
    actor: &Identity,
    board_id: Uuid,
    title: &str,
    color: Option<&str>,
    position: Option<i64>,
) -> Result<Column, BoardError> {
    let board = load_board(state, board_id).await?;
    require(state, board.project_id, actor, Role::Member).await?;
    let title = require_title(title, "column")?;
    let _guard = state.board_locks.lock(board.project_id).await;

    let mut order = column_order(state, board_id).await?;
    let id = Uuid::new_v4();
    let at = ordering::insert_at(&mut order, position.unwrap_or(i64::MAX), id);
    let column = Column {
        id,
        board_id,
        title,
        position: ordering::position_of(at),
        color: color.unwrap_or(DEFAULT_COLUMN_COLOR).to_owned(),
        created_at: now_ms(),
    };
    state.store.insert_column(&column).await?;
    write_column_order(state, &order).await?;

    emit(state, board.project_id, actor, BoardEventKind::ColumnCreated(column.clone())).await;
    Ok(column)
}

/// Rename or recolor a column. Position is untouched.
///
/// # Errors
///
/// `ColumnNotFound`, `InvalidInput`, membership errors.
pub async fn update_column(
    state: &AppState,
    actor: &Identity,
    column_id: Uuid,
    patch: ColumnPatch,
) -> Result<Column, BoardError> {
    let (_, board) = load_column(state, column_id).await?;
    require(state, board.project_id, actor, Role::Member).await?;
    let _guard = state.board_locks.lock(board.project_id).await;

    let (mut column, _) = load_column(state, column_id).await?;
    if let Some(title) = patch.title {
        column.title = require_title(&title, "column")?;
    }
    if let Some(color) = patch.color {
        column.color = color;
    }
    state.store.update_column(&column).await?;

    emit(state, board.project_id, actor, BoardEventKind::ColumnUpdated(column.clone())).await;
    Ok(column)
}

/// Delete a column with all its tasks, then close the gap.
///
/// # Errors
///
/// `ColumnNotFound`, membership errors.
pub async fn delete_column(state: &AppState, actor: &Identity, column_id: Uuid) -> Result<(), BoardError> {
    let (_, board) = load_column(state, column_id).await?;
    require(state, board.project_id, actor, Role::Member).await?;
    let _guard = state.board_locks.lock(board.project_id).await;

    if state.store.find_column(column_id).await?.is_none() {
        return Err(BoardError::ColumnNotFound(column_id));
    }
    let removed_task_ids = task_order(state, column_id).await?;
    state.store.delete_column(column_id).await?;
    let order = column_order(state, board.id).await?;
    write_column_order(state, &order).await?;
    info!(%column_id, board_id = %board.id, tasks = removed_task_ids.len(), "column deleted");

    let deleted = ColumnDeleted { column_id, board_id: board.id, removed_task_ids };
    emit(state, board.project_id, actor, BoardEventKind::ColumnDeleted(deleted)).await;
    Ok(())
}

/// Apply a complete column ordering.
///
/// # Errors
///
/// `Ordering(NotAPermutation)` unless `ordered_ids` lists every column of
/// the board exactly once.
pub async fn reorder_columns(
    state: &AppState,
    actor: &Identity,
    board_id: Uuid,
    ordered_ids: &[Uuid],
) -> Result<Vec<Column>, BoardError> {
    let board = load_board(state, board_id).await?;
    require(state, board.project_id, actor, Role::Member).await?;
    let _guard = state.board_locks.lock(board.project_id).await;

    let current = column_order(state, board_id).await?;
    ordering::check_permutation(&current, ordered_ids)?;
    write_column_order(state, ordered_ids).await?;
    let columns = state.store.list_columns(board_id).await?;

    let reordered = ColumnsReordered { board_id, column_ids: ordered_ids.to_vec() };
    emit(state, board.project_id, actor, BoardEventKind::ColumnsReordered(reordered)).await;
    Ok(columns)
}

// =============================================================================
// TASKS
// =============================================================================

/// Create a task at `data.position` (appended when absent).
///
/// # Errors
///
/// `ColumnNotFound`, `InvalidInput`, membership errors.
pub async fn create_task(state: &AppState, actor: &Identity, column_id: Uuid, data: NewTask) -> Result<Task, BoardError> {
    let (_, board) = load_column(state, column_id).await?;
    require(state, board.project_id, actor, Role::Member).await?;
    let title = require_title(&data.title, "task")?;
    let estimated_hours = require_estimate(data.estimated_hours.unwrap_or(0.0))?;
    let _guard = state.board_locks.lock(board.project_id).await;

    let (column, _) = load_column(state, column_id).await?;
    let mut order = task_order(state, column_id).await?;
    let id = Uuid::new_v4();
    let at = ordering::insert_at(&mut order, data.position.unwrap_or(i64::MAX), id);
    let now = now_ms();
    let task = Task {
        id,
        column_id,
        title,
        description: data.description,
        priority: data.priority.unwrap_or(Priority::Medium),
        assigned_to: data.assigned_to,
        estimated_hours,
        position: ordering::position_of(at),
        status: column.title.clone(),
        created_by: actor.user_id,
        last_modified_by: actor.user_id,
        created_at: now,
        updated_at: now,
    };
    state.store.insert_task(&task).await?;
    state.store.write_task_positions(&placements(column_id, &order)).await?;

    emit(state, board.project_id, actor, BoardEventKind::TaskCreated(task.clone())).await;
    Ok(task)
}

/// Edit task fields. Column and position are changed only by `move_task`.
///
/// # Errors
///
/// `TaskNotFound`, `InvalidInput`, membership errors.
pub async fn update_task(state: &AppState, actor: &Identity, task_id: Uuid, patch: TaskPatch) -> Result<Task, BoardError> {
    let (_, _, board) = load_task(state, task_id).await?;
    require(state, board.project_id, actor, Role::Member).await?;
    let _guard = state.board_locks.lock(board.project_id).await;

    let (mut task, _, _) = load_task(state, task_id).await?;
    if let Some(title) = patch.title {
        task.title = require_title(&title, "task")?;
    }
    if let Some(description) = patch.description {
        task.description = description;
    }
    if let Some(priority) = patch.priority {
        task.priority = priority;
    }
    if let Some(assigned_to) = patch.assigned_to {
        task.assigned_to = assigned_to;
    }
    if let Some(hours) = patch.estimated_hours {
        task.estimated_hours = require_estimate(hours)?;
    }
    task.last_modified_by = actor.user_id;
    task.updated_at = now_ms();
    state.store.update_task(&task).await?;

    emit(state, board.project_id, actor, BoardEventKind::TaskUpdated(task.clone())).await;
    Ok(task)
}

/// Move a task to `target_index` in `target_column_id`, renumbering both
/// columns. Status follows the target column's title.
///
/// # Errors
///
/// `TaskNotFound`, `ColumnNotFound`, `CrossBoardMove` for a column on a
/// different board, membership errors.
pub async fn move_task(
    state: &AppState,
    actor: &Identity,
    task_id: Uuid,
    target_column_id: Uuid,
    target_index: i64,
) -> Result<Task, BoardError> {
    let (_, _, board) = load_task(state, task_id).await?;
    require(state, board.project_id, actor, Role::Member).await?;
    let _guard = state.board_locks.lock(board.project_id).await;

    let (mut task, source, _) = load_task(state, task_id).await?;
    let (target, target_board) = load_column(state, target_column_id).await?;
    if target_board.id != board.id {
        return Err(BoardError::CrossBoardMove(target_column_id));
    }

    let from_column_id = source.id;
    let source_order = task_order(state, source.id).await?;
    let plan = if source.id == target.id {
        ordering::plan_move(&source_order, None, task_id, target_index)?
    } else {
        let target_order = task_order(state, target.id).await?;
        ordering::plan_move(&source_order, Some(&target_order), task_id, target_index)?
    };

    if plan.target.is_none() && plan.source == source_order {
        return Ok(task);
    }

    let mut writes = Vec::new();
    match &plan.target {
        None => writes.extend(placements(source.id, &plan.source)),
        Some(target_order) => {
            writes.extend(placements(source.id, &plan.source));
            writes.extend(placements(target.id, target_order));
        }
    }
    state.store.write_task_positions(&writes).await?;

    task.column_id = target.id;
    task.position = plan.position();
    task.status.clone_from(&target.title);
    task.last_modified_by = actor.user_id;
    task.updated_at = now_ms();
    state.store.update_task(&task).await?;
    info!(%task_id, from = %from_column_id, to = %target.id, position = task.position, "task moved");

    let moved = TaskMoved { task: task.clone(), from_column_id, to_column_id: target.id, position: task.position };
    emit(state, board.project_id, actor, BoardEventKind::TaskMoved(moved)).await;
    Ok(task)
}

/// Delete a task (with its comments and task-linked activity) and close the gap.
///
/// # Errors
///
/// `TaskNotFound`, membership errors.
pub async fn delete_task(state: &AppState, actor: &Identity, task_id: Uuid) -> Result<(), BoardError> {
    let (_, _, board) = load_task(state, task_id).await?;
    require(state, board.project_id, actor, Role::Member).await?;
    let _guard = state.board_locks.lock(board.project_id).await;

    let (task, _, _) = load_task(state, task_id).await?;
    state.store.delete_task(task_id).await?;
    let order = task_order(state, task.column_id).await?;
    state.store.write_task_positions(&placements(task.column_id, &order)).await?;

    let deleted = TaskDeleted { task_id, column_id: task.column_id };
    emit(state, board.project_id, actor, BoardEventKind::TaskDeleted(deleted)).await;
    Ok(())
}

/// Attach a comment to a task.
///
/// # Errors
///
/// `TaskNotFound`, `InvalidInput` for blank content, membership errors.
pub async fn add_comment(
    state: &AppState,
    actor: &Identity,
    task_id: Uuid,
    content: &str,
) -> Result<TaskComment, BoardError> {
    let (_, _, board) = load_task(state, task_id).await?;
    require(state, board.project_id, actor, Role::Member).await?;
    let content = content.trim();
    if content.is_empty() {
        return Err(BoardError::InvalidInput("comment content is required".into()));
    }

    let comment = TaskComment {
        id: Uuid::new_v4(),
        task_id,
        user_id: actor.user_id,
        content: content.to_owned(),
        created_at: now_ms(),
    };
    state.store.insert_comment(&comment).await?;
    emit(state, board.project_id, actor, BoardEventKind::CommentAdded(comment.clone())).await;
    Ok(comment)
}

/// Comments of a task, oldest first.
///
/// # Errors
///
/// `TaskNotFound`, membership errors.
pub async fn list_comments(state: &AppState, actor: &Identity, task_id: Uuid) -> Result<Vec<TaskComment>, BoardError> {
    let (_, _, board) = load_task(state, task_id).await?;
    require(state, board.project_id, actor, Role::Viewer).await?;
    Ok(state.store.list_comments(task_id).await?)
}

#[cfg(test)]
#[path = "board_test.rs"]
mod tests;
