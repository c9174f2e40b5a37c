//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the websocket endpoint and the REST API under a single
//! Axum router. Everything except `/healthz` requires a bearer token.

pub mod auth;
pub mod boards;
pub mod projects;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{delete, get, patch, post, put};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/auth/me", get(auth::me))
        .route("/api/projects", get(projects::list_projects).post(projects::create_project))
        .route("/api/projects/{id}", delete(projects::delete_project))
        .route(
            "/api/projects/{id}/board",
            get(boards::get_project_board).post(boards::create_board),
        )
        .route("/api/projects/{id}/members", get(projects::list_members))
        .route(
            "/api/projects/{id}/members/{user_id}",
            patch(projects::change_role).delete(projects::remove_member),
        )
        .route("/api/projects/{id}/invitations", post(projects::invite))
        .route("/api/projects/{id}/presence", get(projects::project_presence))
        .route("/api/projects/{id}/activity", get(projects::project_activity))
        .route("/api/boards/{id}", get(boards::get_board))
        .route("/api/boards/{id}/columns", post(boards::create_column))
        .route("/api/boards/{id}/columns/order", put(boards::reorder_columns))
        .route(
            "/api/columns/{id}",
            patch(boards::update_column).delete(boards::delete_column),
        )
        .route("/api/columns/{id}/tasks", post(boards::create_task))
        .route(
            "/api/tasks/{id}",
            patch(boards::update_task).delete(boards::delete_task),
        )
        .route("/api/tasks/{id}/move", post(boards::move_task))
        .route(
            "/api/tasks/{id}/comments",
            get(boards::list_comments).post(boards::add_comment),
        )
        .route("/api/invitations/pending", get(projects::pending_invitations))
        .route("/api/invitations/accept", post(projects::accept_invitation))
        .route("/api/invitations/{id}/reject", post(projects::reject_invitation))
        .route("/api/invitations/{id}/revoke", post(projects::revoke_invitation))
        .route("/api/notifications", get(projects::notifications))
        .route("/api/notifications/unread-count", get(projects::unread_notifications))
        .route("/api/notifications/read-all", post(projects::mark_all_notifications_read))
        .route("/api/notifications/{id}/read", patch(projects::mark_notification_read))
        .route("/api/notifications/{id}", delete(projects::delete_notification))
        .route("/api/presence/stats", get(projects::presence_stats))
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
