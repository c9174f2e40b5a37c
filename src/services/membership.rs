//! Membership guard: project roles and the checks built on them.
//!
//! DESIGN
//! ======
//! `Role` is ordered `Viewer < Member < Admin < Owner`; a check passes when
//! the member's level is at least the required level. Every other component
//! (room joins, board mutations, invitations) asks this module instead of
//! reading `project_members` itself.
//!
//! INVARIANTS
//! ==========
//! - Each project has exactly one `Owner`, set at creation.
//! - The owner can be neither removed nor demoted, and no one can be
//!   promoted to owner.
//! - Only the owner can delete the project.

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::models::{Project, ProjectMember, Role, now_ms};
use crate::db::{Store, StoreError};
use crate::protocol::{MemberEventKind, MemberInfo};
use crate::services::auth::Identity;
use crate::services::events::{self, DomainEvent};
use crate::state::AppState;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error("project not found: {0}")]
    ProjectNotFound(Uuid),
    #[error("not a member of project {0}")]
    NotMember(Uuid),
    #[error("requires {required:?} role, have {actual:?}")]
    Forbidden { required: Role, actual: Role },
    #[error("member not found: {0}")]
    MemberNotFound(Uuid),
    #[error("the project owner cannot be removed or demoted")]
    OwnerImmutable,
    #[error("role cannot be granted: {0:?}")]
    InvalidRole(Role),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl crate::protocol::ErrorCode for MembershipError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ProjectNotFound(_) => "E_PROJECT_NOT_FOUND",
            Self::NotMember(_) => "E_NOT_MEMBER",
            Self::Forbidden { .. } => "E_FORBIDDEN",
            Self::MemberNotFound(_) => "E_MEMBER_NOT_FOUND",
            Self::OwnerImmutable => "E_OWNER_IMMUTABLE",
            Self::InvalidRole(_) => "E_INVALID_ROLE",
            Self::InvalidInput(_) => "E_INVALID_INPUT",
            Self::Store(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Store(e) if crate::protocol::ErrorCode::retryable(e))
    }
}

/// Answer to "is this user in this project?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub is_member: bool,
    pub role: Option<Role>,
}

/// Member row joined with the user it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub joined_at: i64,
}

/// A project as seen from one of its members.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    #[serde(flatten)]
    pub project: Project,
    pub role: Role,
    pub member_count: usize,
}

// =============================================================================
// CHECKS
// =============================================================================

#[must_use]
pub fn role_satisfies(actual: Role, min_role: Role) -> bool {
    actual.level() >= min_role.level()
}

/// # Errors
///
/// Returns a store error if the lookup fails.
pub async fn is_member(store: &dyn Store, project_id: Uuid, user_id: Uuid) -> Result<Membership, StoreError> {
    let row = store.find_member(project_id, user_id).await?;
    Ok(Membership { is_member: row.is_some(), role: row.map(|m| m.role) })
}

/// Pass when the user holds at least `min_role`; returns their actual role.
///
/// # Errors
///
/// `NotMember` if the user has no membership row, `Forbidden` if their role
/// is below `min_role`.
pub async fn require_role(
    store: &dyn Store,
    project_id: Uuid,
    user_id: Uuid,
    min_role: Role,
) -> Result<Role, MembershipError> {
    let Some(member) = store.find_member(project_id, user_id).await? else {
        return Err(MembershipError::NotMember(project_id));
    };
    if !role_satisfies(member.role, min_role) {
        return Err(MembershipError::Forbidden { required: min_role, actual: member.role });
    }
    Ok(member.role)
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Create a project with `owner` as its sole `Owner`.
///
/// # Errors
///
/// `InvalidInput` for a blank name; store errors otherwise.
pub async fn create_project(
    store: &dyn Store,
    owner: &Identity,
    name: &str,
    description: &str,
) -> Result<Project, MembershipError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(MembershipError::InvalidInput("project name is required".into()));
    }
    let now = now_ms();
    let project = Project {
        id: Uuid::new_v4(),
        name: name.to_owned(),
        description: description.to_owned(),
        owner_id: owner.user_id,
        is_shared: false,
        created_at: now,
    };
    store.insert_project(&project).await?;
    store
        .insert_member(&ProjectMember {
            id: Uuid::new_v4(),
            project_id: project.id,
            user_id: owner.user_id,
            role: Role::Owner,
            joined_at: now,
        })
        .await?;
    info!(project_id = %project.id, owner_id = %owner.user_id, "project created");
    Ok(project)
}

/// List a project's members. Any member may ask.
///
/// # Errors
///
/// `NotMember` if the requester is not in the project.
pub async fn list_members(
    store: &dyn Store,
    project_id: Uuid,
    requester: &Identity,
) -> Result<Vec<MemberView>, MembershipError> {
    require_role(store, project_id, requester.user_id, Role::Viewer).await?;
    let rows = store.list_members(project_id).await?;
    let mut out = Vec::with_capacity(rows.len());
    for m in rows {
        let (email, name) = match store.find_user(m.user_id).await? {
            Some(u) => (u.email, u.name),
            None => (String::new(), String::new()),
        };
        out.push(MemberView { user_id: m.user_id, email, name, role: m.role, joined_at: m.joined_at });
    }
    Ok(out)
}

/// Every project `user` belongs to, most recently joined first.
///
/// # Errors
///
/// Store errors only.
pub async fn list_user_projects(store: &dyn Store, user: &Identity) -> Result<Vec<ProjectSummary>, MembershipError> {
    let rows = store.list_user_projects(user.user_id).await?;
    let mut out = Vec::with_capacity(rows.len());
    for (project, role) in rows {
        let member_count = store.list_members(project.id).await?.len();
        out.push(ProjectSummary { project, role, member_count });
    }
    Ok(out)
}

/// Delete a project and everything under it. Owner only.
///
/// Connections joined to the project's room receive `removed_from_project`.
///
/// # Errors
///
/// `ProjectNotFound` for an unknown id, `NotMember` / `Forbidden` unless the
/// actor owns the project.
pub async fn delete_project(state: &AppState, project_id: Uuid, actor: &Identity) -> Result<(), MembershipError> {
    let store = state.store.as_ref();
    if store.find_project(project_id).await?.is_none() {
        return Err(MembershipError::ProjectNotFound(project_id));
    }
    require_role(store, project_id, actor.user_id, Role::Owner).await?;

    let _board = state.board_locks.lock(project_id).await;
    let _ordered = state.publish_locks.lock(project_id).await;
    store.delete_project(project_id).await?;
    let closed = events::close_room(state, project_id).await;
    info!(%project_id, deleted_by = %actor.user_id, closed, "project deleted");
    Ok(())
}

async fn member_info(store: &dyn Store, member: &ProjectMember) -> Result<MemberInfo, StoreError> {
    let user = store.find_user(member.user_id).await?;
    Ok(MemberInfo {
        user_id: member.user_id,
        email: user.as_ref().map(|u| u.email.clone()).unwrap_or_default(),
        name: user.map(|u| u.name).unwrap_or_default(),
        role: member.role,
    })
}

/// Remove a member. Only the owner may do this, and never to themselves.
///
/// The removed user's live connections are pulled out of the project room
/// as part of publishing `member_removed`.
///
/// # Errors
///
/// `NotMember` / `Forbidden` for an unauthorized actor, `MemberNotFound` for
/// an unknown target, `OwnerImmutable` when the target is the owner.
pub async fn remove_member(
    state: &AppState,
    project_id: Uuid,
    member_user_id: Uuid,
    actor: &Identity,
) -> Result<MemberInfo, MembershipError> {
    let store = state.store.as_ref();
    require_role(store, project_id, actor.user_id, Role::Owner).await?;
    let Some(member) = store.find_member(project_id, member_user_id).await? else {
        return Err(MembershipError::MemberNotFound(member_user_id));
    };
    if member.role == Role::Owner {
        return Err(MembershipError::OwnerImmutable);
    }

    store.delete_member(member.id).await?;
    let info = member_info(store, &member).await?;
    info!(%project_id, user_id = %member_user_id, removed_by = %actor.user_id, "member removed");

    let event = DomainEvent::Member(MemberEventKind::MemberRemoved(info.clone()));
    if let Err(e) = events::publish(state, project_id, actor, event).await {
        warn!(%project_id, error = %e, "member_removed publish failed");
    }
    Ok(info)
}

/// Change a member's role. Owner only; the owner role is neither granted
/// nor taken away here.
///
/// # Errors
///
/// As `remove_member`, plus `InvalidRole` when `role` is `Owner`.
pub async fn change_role(
    state: &AppState,
    project_id: Uuid,
    member_user_id: Uuid,
    role: Role,
    actor: &Identity,
) -> Result<MemberInfo, MembershipError> {
    let store = state.store.as_ref();
    require_role(store, project_id, actor.user_id, Role::Owner).await?;
    if role == Role::Owner {
        return Err(MembershipError::InvalidRole(role));
    }
    let Some(mut member) = store.find_member(project_id, member_user_id).await? else {
        return Err(MembershipError::MemberNotFound(member_user_id));
    };
    if member.role == Role::Owner {
        return Err(MembershipError::OwnerImmutable);
    }
    if member.role == role {
        return member_info(store, &member).await.map_err(Into::into);
    }

    store.update_member_role(member.id, role).await?;
    member.role = role;
    let info = member_info(store, &member).await?;
    info!(%project_id, user_id = %member_user_id, role = role.as_str(), "member role changed");

    let event = DomainEvent::Member(MemberEventKind::MemberRoleChanged(info.clone()));
    if let Err(e) = events::publish(state, project_id, actor, event).await {
        warn!(%project_id, error = %e, "member_role_changed publish failed");
    }
    Ok(info)
}

#[cfg(test)]
#[path = "membership_test.rs"]
mod tests;
