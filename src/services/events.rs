//! Event bus: persist as activity, then broadcast to the project room.
//!
//! DESIGN
//! ======
//! `publish` appends the event to the activity log first and only then fans
//! it out. If the append fails, nothing is broadcast, so clients never see an
//! event that is missing from history. The broadcast itself is fire-and-forget
//! with no acknowledgment; a client that misses events reconciles with
//! `sync_since` using the `seq` numbers it has seen.
//!
//! Append and broadcast for one project run under a per-project lock, so
//! room members receive events in `seq` order.
//!
//! `member_removed` additionally pulls the removed user's connections out of
//! the room before anything is persisted; revoking access does not wait on
//! the activity log.

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::StoreError;
use crate::db::models::NewActivity;
use crate::protocol::{Actor, BoardEventKind, EventEnvelope, MemberEventKind, PresenceAction, ServerMessage};
use crate::services::auth::Identity;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("event payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl crate::protocol::ErrorCode for EventError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Store(_) => "E_ACTIVITY_WRITE_FAILED",
            Self::Encode(_) => "E_EVENT_ENCODING",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

/// Anything that can be published to a project room.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    Board(BoardEventKind),
    Member(MemberEventKind),
}

impl DomainEvent {
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Self::Board(kind) => kind.action(),
            Self::Member(kind) => kind.action(),
        }
    }

    fn task_id(&self) -> Option<Uuid> {
        match self {
            Self::Board(kind) => kind.task_id(),
            Self::Member(_) => None,
        }
    }

    /// The `payload` half of the tagged event, as stored in the activity row.
    fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        fn inner(kind: &impl Serialize) -> Result<serde_json::Value, serde_json::Error> {
            let mut value = serde_json::to_value(kind)?;
            Ok(value.get_mut("payload").map(serde_json::Value::take).unwrap_or_default())
        }
        match self {
            Self::Board(kind) => inner(kind),
            Self::Member(kind) => inner(kind),
        }
    }

    fn into_message(self, project_id: Uuid, actor: Actor, timestamp: i64, seq: i64) -> ServerMessage {
        match self {
            Self::Board(kind) => ServerMessage::BoardEvent(EventEnvelope { project_id, actor, timestamp, seq, kind }),
            Self::Member(kind) => {
                ServerMessage::MemberEvent(EventEnvelope { project_id, actor, timestamp, seq, kind })
            }
        }
    }
}

/// Persist `event` as an activity row, then broadcast it to the project room.
/// Returns the activity sequence number.
///
/// # Errors
///
/// Returns an error if the activity cannot be encoded or written; in that
/// case nothing was broadcast.
pub async fn publish(state: &AppState, project_id: Uuid, actor: &Identity, event: DomainEvent) -> Result<i64, EventError> {
    let _ordered = state.publish_locks.lock(project_id).await;

    if let DomainEvent::Member(MemberEventKind::MemberRemoved(info)) = &event {
        evict_member(state, project_id, info.user_id).await;
    }

    let payload = event.payload()?;
    let action = event.action();
    let activity = state
        .store
        .append_activity(NewActivity {
            project_id,
            user_id: actor.user_id,
            task_id: event.task_id(),
            action: action.to_owned(),
            payload,
        })
        .await?;

    let msg = event.into_message(project_id, actor.actor(), activity.created_at, activity.seq);
    let delivered = state.coordinator.read().await.rooms.broadcast(project_id, &msg);
    info!(%project_id, action, seq = activity.seq, delivered, "event published");
    Ok(activity.seq)
}

/// Force every connection of `user_id` out of the project's room and
/// presence set, telling each one with `removed_from_project`.
pub async fn evict_member(state: &AppState, project_id: Uuid, user_id: Uuid) {
    let mut hub = state.coordinator.write().await;
    let mut evicted = 0_usize;
    let mut went_offline = None;
    let mut user_name = None;

    for connection_id in hub.presence.connections_of(user_id) {
        if !hub.presence.has_joined(connection_id, project_id) {
            continue;
        }
        if user_name.is_none() {
            user_name = hub.presence.identity(connection_id).map(|i| i.name.clone());
        }
        hub.rooms.leave(project_id, connection_id);
        if let Some(count) = hub.presence.leave_project(connection_id, project_id) {
            went_offline = Some(count);
        }
        hub.rooms.send_to(connection_id, ServerMessage::RemovedFromProject { project_id });
        evicted += 1;
    }

    if let Some(online_count) = went_offline {
        let update = ServerMessage::PresenceUpdate {
            project_id,
            online_count,
            action: PresenceAction::UserLeft,
            user_id,
            user_name,
        };
        hub.rooms.broadcast(project_id, &update);
    }
    debug!(%project_id, %user_id, evicted, "member evicted from room");
}

/// Empty a project's room after the project is gone. Every joined
/// connection gets `removed_from_project` and stays connected.
pub async fn close_room(state: &AppState, project_id: Uuid) -> usize {
    let mut hub = state.coordinator.write().await;
    let joined = hub.rooms.members(project_id);
    for &connection_id in &joined {
        hub.rooms.leave(project_id, connection_id);
        hub.presence.leave_project(connection_id, project_id);
        hub.rooms.send_to(connection_id, ServerMessage::RemovedFromProject { project_id });
    }
    drop(hub);
    debug!(%project_id, closed = joined.len(), "project room closed");
    joined.len()
}

#[cfg(test)]
#[path = "events_test.rs"]
mod tests;
