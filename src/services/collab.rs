//! Connection lifecycle: connect, join/leave project rooms, disconnect.
//!
//! LIFECYCLE
//! =========
//! 1. `connect` registers an authenticated connection with presence and
//!    attaches its outbound channel.
//! 2. `join_project` checks membership, marks the user online, adds the
//!    connection to the room, replies `joined_project` and broadcasts
//!    `presence_update(user_joined)`. The broadcast is sent on every join,
//!    even when the user was already online from another tab. The check and
//!    the room join run under the project's publish lock, the same lock
//!    `member_removed` eviction and project deletion take, so a removal
//!    either lands before the check or evicts the fresh join.
//! 3. `leave_project` broadcasts `presence_update(user_left)` only when the
//!    user's last connection in the project left.
//! 4. `disconnect` does the same for every project the connection had joined.
//!
//! ERROR HANDLING
//! ==============
//! A failed join (not a member, store error) is returned to the caller, which
//! turns it into an `error` event; the connection itself stays up.

use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::db::StoreError;
use crate::db::models::Role;
use crate::protocol::{ErrorCode, PresenceAction, ServerMessage};
use crate::services::auth::Identity;
use crate::services::membership::{self, MembershipError};
use crate::services::presence::PresenceError;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    #[error(transparent)]
    Presence(#[from] PresenceError),
    #[error(transparent)]
    Membership(#[from] MembershipError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for CollabError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Presence(e) => e.error_code(),
            Self::Membership(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Presence(e) => e.retryable(),
            Self::Membership(e) => e.retryable(),
            Self::Store(e) => e.retryable(),
        }
    }
}

/// Register a new authenticated connection. Returns its id and inbox.
pub async fn connect(state: &AppState, identity: Identity) -> (Uuid, mpsc::Receiver<ServerMessage>) {
    let connection_id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(state.config.ws_channel_capacity);
    let user_id = identity.user_id;

    let mut hub = state.coordinator.write().await;
    hub.presence.register(connection_id, identity);
    hub.rooms.attach(connection_id, tx);
    drop(hub);

    info!(%connection_id, %user_id, "collab: connection registered");
    (connection_id, rx)
}

/// Join a project room. Returns the project's online count.
///
/// # Errors
///
/// `NotMember` when the user has no membership in the project; the
/// connection is left untouched.
pub async fn join_project(state: &AppState, connection_id: Uuid, project_id: Uuid) -> Result<usize, CollabError> {
    let identity = state
        .coordinator
        .read()
        .await
        .presence
        .identity(connection_id)
        .cloned()
        .ok_or(PresenceError::UnknownConnection(connection_id))?;

    let _ordered = state.publish_locks.lock(project_id).await;
    let membership = membership::is_member(state.store.as_ref(), project_id, identity.user_id).await?;
    let Some(role) = membership.role else {
        return Err(MembershipError::NotMember(project_id).into());
    };

    let mut hub = state.coordinator.write().await;
    let online_count = hub.presence.join_project(connection_id, project_id)?;
    hub.rooms.join(project_id, connection_id);
    hub.rooms
        .send_to(connection_id, ServerMessage::JoinedProject { project_id, online_count, role });
    hub.rooms.broadcast(
        project_id,
        &ServerMessage::PresenceUpdate {
            project_id,
            online_count,
            action: PresenceAction::UserJoined,
            user_id: identity.user_id,
            user_name: Some(identity.name.clone()),
        },
    );
    drop(hub);

    info!(%connection_id, %project_id, user_id = %identity.user_id, online_count, "collab: joined project");
    Ok(online_count)
}

/// Leave a project room. Leaving a project never joined is a no-op.
pub async fn leave_project(state: &AppState, connection_id: Uuid, project_id: Uuid) {
    let mut hub = state.coordinator.write().await;
    hub.rooms.leave(project_id, connection_id);
    let identity = hub.presence.identity(connection_id).cloned();
    let Some(online_count) = hub.presence.leave_project(connection_id, project_id) else {
        return;
    };
    let Some(identity) = identity else {
        return;
    };
    hub.rooms.broadcast(
        project_id,
        &ServerMessage::PresenceUpdate {
            project_id,
            online_count,
            action: PresenceAction::UserLeft,
            user_id: identity.user_id,
            user_name: Some(identity.name),
        },
    );
    drop(hub);
    info!(%connection_id, %project_id, online_count, "collab: user went offline in project");
}

/// Tear down a connection. Broadcasts `user_left` to every project in which
/// the user is now offline.
pub async fn disconnect(state: &AppState, connection_id: Uuid) {
    let mut hub = state.coordinator.write().await;
    hub.rooms.detach(connection_id);
    let Some(departure) = hub.presence.unregister(connection_id) else {
        return;
    };
    for &(project_id, online_count) in &departure.offline_projects {
        hub.rooms.broadcast(
            project_id,
            &ServerMessage::PresenceUpdate {
                project_id,
                online_count,
                action: PresenceAction::UserLeft,
                user_id: departure.identity.user_id,
                user_name: Some(departure.identity.name.clone()),
            },
        );
    }
    drop(hub);
    info!(
        %connection_id,
        user_id = %departure.identity.user_id,
        offline_projects = departure.offline_projects.len(),
        "collab: connection closed"
    );
}

/// Activity recorded after `since_seq`, for reconnect reconciliation.
///
/// # Errors
///
/// `NotMember` when the caller cannot see the project.
pub async fn sync_since(
    state: &AppState,
    connection_id: Uuid,
    project_id: Uuid,
    since_seq: i64,
) -> Result<ServerMessage, CollabError> {
    let user_id = state
        .coordinator
        .read()
        .await
        .presence
        .identity(connection_id)
        .map(|i| i.user_id)
        .ok_or(PresenceError::UnknownConnection(connection_id))?;
    membership::require_role(state.store.as_ref(), project_id, user_id, Role::Viewer).await?;

    let activities = state
        .store
        .activity_since(project_id, since_seq, state.config.activity_sync_limit)
        .await?;
    Ok(ServerMessage::ActivityBatch { project_id, activities })
}

#[cfg(test)]
#[path = "collab_test.rs"]
mod tests;
