//! Project routes: projects, members, invitations, presence, activity,
//! notifications.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::auth::AuthUser;
use crate::db::StoreError;
use crate::db::models::{Activity, Invitation, Notification, Role};
use crate::protocol::MemberInfo;
use crate::services::invitation::{self, InviteError, InviteOutcome};
use crate::services::membership::{self, MemberView, MembershipError, ProjectSummary};
use crate::services::notification::{self, NotificationError, UnreadCount};
use crate::services::presence::PresenceStats;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateProjectBody {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleBody {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct InviteBody {
    pub emails: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AcceptBody {
    pub token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPresence {
    pub project_id: Uuid,
    pub online_count: usize,
    pub user_ids: Vec<Uuid>,
}

fn store_error_to_status(err: &StoreError) -> StatusCode {
    warn!(error = %err, "projects: store failure");
    StatusCode::INTERNAL_SERVER_ERROR
}

pub(crate) fn membership_error_to_status(err: MembershipError) -> StatusCode {
    match err {
        MembershipError::ProjectNotFound(_) | MembershipError::MemberNotFound(_) => StatusCode::NOT_FOUND,
        MembershipError::NotMember(_) | MembershipError::Forbidden { .. } | MembershipError::OwnerImmutable => {
            StatusCode::FORBIDDEN
        }
        MembershipError::InvalidRole(_) | MembershipError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        MembershipError::Store(e) => store_error_to_status(&e),
    }
}

pub(crate) fn invite_error_to_status(err: InviteError) -> StatusCode {
    match err {
        InviteError::NotFound => StatusCode::NOT_FOUND,
        InviteError::AlreadyProcessed(_) => StatusCode::CONFLICT,
        InviteError::Expired => StatusCode::GONE,
        InviteError::EmailMismatch => StatusCode::FORBIDDEN,
        InviteError::InvalidEmail(_) | InviteError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        InviteError::Membership(e) => membership_error_to_status(e),
        InviteError::Store(e) => store_error_to_status(&e),
    }
}

pub(crate) fn notification_error_to_status(err: NotificationError) -> StatusCode {
    match err {
        NotificationError::NotFound(_) => StatusCode::NOT_FOUND,
        NotificationError::Store(e) => store_error_to_status(&e),
    }
}

// =============================================================================
// PROJECTS / MEMBERS
// =============================================================================

/// `GET /api/projects`: projects the caller belongs to.
pub async fn list_projects(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<ProjectSummary>>, StatusCode> {
    membership::list_user_projects(state.store.as_ref(), &auth.identity)
        .await
        .map(Json)
        .map_err(membership_error_to_status)
}

/// `POST /api/projects`: create a project owned by the caller.
pub async fn create_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateProjectBody>,
) -> Result<impl IntoResponse, StatusCode> {
    let project = membership::create_project(state.store.as_ref(), &auth.identity, &body.name, &body.description)
        .await
        .map_err(membership_error_to_status)?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// `DELETE /api/projects/{id}`: owner deletes the project.
pub async fn delete_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    membership::delete_project(&state, project_id, &auth.identity)
        .await
        .map_err(membership_error_to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/projects/{id}/members`
pub async fn list_members(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<Uuid>,
) -> Result<Json<Vec<MemberView>>, StatusCode> {
    membership::list_members(state.store.as_ref(), project_id, &auth.identity)
        .await
        .map(Json)
        .map_err(membership_error_to_status)
}

/// `PATCH /api/projects/{id}/members/{user_id}`: owner changes a member's role.
pub async fn change_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((project_id, user_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<ChangeRoleBody>,
) -> Result<Json<MemberInfo>, StatusCode> {
    membership::change_role(&state, project_id, user_id, body.role, &auth.identity)
        .await
        .map(Json)
        .map_err(membership_error_to_status)
}

/// `DELETE /api/projects/{id}/members/{user_id}`: owner removes a member.
pub async fn remove_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((project_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, StatusCode> {
    membership::remove_member(&state, project_id, user_id, &auth.identity)
        .await
        .map_err(membership_error_to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// INVITATIONS
// =============================================================================

/// `POST /api/projects/{id}/invitations`
pub async fn invite(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<Uuid>,
    Json(body): Json<InviteBody>,
) -> Result<(StatusCode, Json<InviteOutcome>), StatusCode> {
    let outcome = invitation::invite(&state, &auth.identity, project_id, &body.emails)
        .await
        .map_err(invite_error_to_status)?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// `GET /api/invitations/pending`: invitations addressed to the caller.
pub async fn pending_invitations(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Invitation>>, StatusCode> {
    invitation::pending_for_user(&state, &auth.identity)
        .await
        .map(Json)
        .map_err(invite_error_to_status)
}

/// `POST /api/invitations/accept`
pub async fn accept_invitation(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<AcceptBody>,
) -> Result<Json<Invitation>, StatusCode> {
    invitation::accept(&state, &body.token, &auth.identity)
        .await
        .map(Json)
        .map_err(invite_error_to_status)
}

/// `POST /api/invitations/{id}/reject`: invitee declines.
pub async fn reject_invitation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(invitation_id): Path<Uuid>,
) -> Result<Json<Invitation>, StatusCode> {
    invitation::reject(&state, invitation_id, &auth.identity)
        .await
        .map(Json)
        .map_err(invite_error_to_status)
}

/// `POST /api/invitations/{id}/revoke`: owner withdraws.
pub async fn revoke_invitation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(invitation_id): Path<Uuid>,
) -> Result<Json<Invitation>, StatusCode> {
    invitation::revoke(&state, invitation_id, &auth.identity)
        .await
        .map(Json)
        .map_err(invite_error_to_status)
}

// =============================================================================
// PRESENCE / ACTIVITY / NOTIFICATIONS
// =============================================================================

/// `GET /api/presence/stats`
pub async fn presence_stats(State(state): State<AppState>, _auth: AuthUser) -> Json<PresenceStats> {
    Json(state.coordinator.read().await.presence.stats())
}

/// `GET /api/projects/{id}/presence`: who is online in a project.
pub async fn project_presence(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<Uuid>,
) -> Result<Json<ProjectPresence>, StatusCode> {
    membership::require_role(state.store.as_ref(), project_id, auth.identity.user_id, Role::Viewer)
        .await
        .map_err(membership_error_to_status)?;
    let mut user_ids: Vec<Uuid> = state
        .coordinator
        .read()
        .await
        .presence
        .online_users(project_id)
        .into_iter()
        .collect();
    user_ids.sort_unstable();
    Ok(Json(ProjectPresence { project_id, online_count: user_ids.len(), user_ids }))
}

/// `GET /api/projects/{id}/activity?sinceSeq=N`
pub async fn project_activity(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<Uuid>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Activity>>, StatusCode> {
    membership::require_role(state.store.as_ref(), project_id, auth.identity.user_id, Role::Viewer)
        .await
        .map_err(membership_error_to_status)?;
    let since_seq = match params.get("sinceSeq") {
        Some(raw) => raw.parse::<i64>().map_err(|_| StatusCode::BAD_REQUEST)?,
        None => 0,
    };
    state
        .store
        .activity_since(project_id, since_seq, state.config.activity_sync_limit)
        .await
        .map(Json)
        .map_err(|e| store_error_to_status(&e))
}

/// `GET /api/notifications`: the caller's in-app notifications, newest first.
pub async fn notifications(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Notification>>, StatusCode> {
    notification::list(&state, &auth.identity)
        .await
        .map(Json)
        .map_err(notification_error_to_status)
}

/// `GET /api/notifications/unread-count`
pub async fn unread_notifications(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<UnreadCount>, StatusCode> {
    notification::unread_count(&state, &auth.identity)
        .await
        .map(Json)
        .map_err(notification_error_to_status)
}

/// `PATCH /api/notifications/{id}/read`
pub async fn mark_notification_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(notification_id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    notification::mark_read(&state, &auth.identity, notification_id)
        .await
        .map_err(notification_error_to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/notifications/read-all`
pub async fn mark_all_notifications_read(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let updated = notification::mark_all_read(&state, &auth.identity)
        .await
        .map_err(notification_error_to_status)?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}

/// `DELETE /api/notifications/{id}`
pub async fn delete_notification(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(notification_id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    notification::delete(&state, &auth.identity, notification_id)
        .await
        .map_err(notification_error_to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[path = "projects_test.rs"]
mod tests;
