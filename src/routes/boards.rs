//! Board routes: REST surface over the board service.
//!
//! Every mutation here is also published to the project room by the service,
//! so REST callers and websocket viewers see the same change.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use super::auth::AuthUser;
use super::projects::membership_error_to_status;
use crate::db::models::{Column, Task, TaskComment};
use crate::services::board::{self, BoardError, BoardView, ColumnPatch, NewTask, TaskPatch};
use crate::services::ordering::OrderingError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateBoardBody {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateColumnBody {
    pub title: String,
    pub color: Option<String>,
    pub position: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderColumnsBody {
    pub column_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveTaskBody {
    pub target_column_id: Uuid,
    pub position: i64,
}

#[derive(Debug, Deserialize)]
pub struct CommentBody {
    pub content: String,
}

pub(crate) fn board_error_to_status(err: BoardError) -> StatusCode {
    match err {
        BoardError::BoardNotFound(_)
        | BoardError::ProjectBoardNotFound(_)
        | BoardError::ColumnNotFound(_)
        | BoardError::TaskNotFound(_) => StatusCode::NOT_FOUND,
        BoardError::BoardExists(_) => StatusCode::CONFLICT,
        BoardError::CrossBoardMove(_)
        | BoardError::InvalidInput(_)
        | BoardError::Ordering(OrderingError::NotAPermutation { .. }) => StatusCode::BAD_REQUEST,
        BoardError::Ordering(e @ OrderingError::TaskNotInColumn(_)) => {
            warn!(error = %e, "board: ordering state inconsistent");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        BoardError::Membership(e) => membership_error_to_status(e),
        BoardError::Store(e) => {
            warn!(error = %e, "board: store failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// =============================================================================
// BOARDS
// =============================================================================

/// `POST /api/projects/{id}/board`: create the project's board.
pub async fn create_board(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<Uuid>,
    Json(body): Json<CreateBoardBody>,
) -> Result<impl IntoResponse, StatusCode> {
    let view = board::create_board(&state, &auth.identity, project_id, &body.name, &body.description)
        .await
        .map_err(board_error_to_status)?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// `GET /api/projects/{id}/board`: the project's board, nested.
pub async fn get_project_board(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<Uuid>,
) -> Result<Json<BoardView>, StatusCode> {
    board::get_project_board(&state, &auth.identity, project_id)
        .await
        .map(Json)
        .map_err(board_error_to_status)
}

/// `GET /api/boards/{id}`
pub async fn get_board(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
) -> Result<Json<BoardView>, StatusCode> {
    board::get_board(&state, &auth.identity, board_id)
        .await
        .map(Json)
        .map_err(board_error_to_status)
}

// =============================================================================
// COLUMNS
// =============================================================================

/// `POST /api/boards/{id}/columns`
pub async fn create_column(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
    Json(body): Json<CreateColumnBody>,
) -> Result<impl IntoResponse, StatusCode> {
    let column = board::create_column(
        &state,
        &auth.identity,
        board_id,
        &body.title,
        body.color.as_deref(),
        body.position,
    )
    .await
    .map_err(board_error_to_status)?;
    Ok((StatusCode::CREATED, Json(column)))
}

/// `PUT /api/boards/{id}/columns/order`: body must list every column once.
pub async fn reorder_columns(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
    Json(body): Json<ReorderColumnsBody>,
) -> Result<Json<Vec<Column>>, StatusCode> {
    board::reorder_columns(&state, &auth.identity, board_id, &body.column_ids)
        .await
        .map(Json)
        .map_err(board_error_to_status)
}

/// `PATCH /api/columns/{id}`
pub async fn update_column(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(column_id): Path<Uuid>,
    Json(patch): Json<ColumnPatch>,
) -> Result<Json<Column>, StatusCode> {
    board::update_column(&state, &auth.identity, column_id, patch)
        .await
        .map(Json)
        .map_err(board_error_to_status)
}

/// `DELETE /api/columns/{id}`
pub async fn delete_column(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(column_id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    board::delete_column(&state, &auth.identity, column_id)
        .await
        .map_err(board_error_to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// TASKS
// =============================================================================

/// `POST /api/columns/{id}/tasks`
pub async fn create_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(column_id): Path<Uuid>,
    Json(body): Json<NewTask>,
) -> Result<impl IntoResponse, StatusCode> {
    let task = board::create_task(&state, &auth.identity, column_id, body)
        .await
        .map_err(board_error_to_status)?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// `PATCH /api/tasks/{id}`
pub async fn update_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
    Json(patch): Json<TaskPatch>,
) -> Result<Json<Task>, StatusCode> {
    board::update_task(&state, &auth.identity, task_id, patch)
        .await
        .map(Json)
        .map_err(board_error_to_status)
}

/// `POST /api/tasks/{id}/move`
pub async fn move_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
    Json(body): Json<MoveTaskBody>,
) -> Result<Json<Task>, StatusCode> {
    board::move_task(&state, &auth.identity, task_id, body.target_column_id, body.position)
        .await
        .map(Json)
        .map_err(board_error_to_status)
}

/// `DELETE /api/tasks/{id}`
pub async fn delete_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    board::delete_task(&state, &auth.identity, task_id)
        .await
        .map_err(board_error_to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/tasks/{id}/comments`
pub async fn list_comments(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Vec<TaskComment>>, StatusCode> {
    board::list_comments(&state, &auth.identity, task_id)
        .await
        .map(Json)
        .map_err(board_error_to_status)
}

/// `POST /api/tasks/{id}/comments`
pub async fn add_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
    Json(body): Json<CommentBody>,
) -> Result<impl IntoResponse, StatusCode> {
    let comment = board::add_comment(&state, &auth.identity, task_id, &body.content)
        .await
        .map_err(board_error_to_status)?;
    Ok((StatusCode::CREATED, Json(comment)))
}

#[cfg(test)]
#[path = "boards_test.rs"]
mod tests;
