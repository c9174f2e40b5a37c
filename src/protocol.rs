//! Socket protocol: typed client and server messages.
//!
//! ARCHITECTURE
//! ============
//! Every websocket text frame is one JSON object `{"event": <name>, "data":
//! {...}}`. Inbound frames parse into `ClientMessage`; everything the server
//! pushes is a `ServerMessage`. Board and member events are closed tagged
//! unions so consumers match exhaustively on `type`.
//!
//! DESIGN
//! ======
//! - Field names on the wire are camelCase.
//! - `board_event` / `member_event` carry `{type, projectId, actor,
//!   timestamp, seq, payload}`; `seq` is the activity sequence number the
//!   event was persisted under, so a reconnecting client can ask for
//!   everything after the last `seq` it saw.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::{Activity, Column, Role, Task, TaskComment};

// =============================================================================
// ERROR CODES
// =============================================================================

/// Trait for errors that carry a grepable error code.
///
/// Implement on domain error enums so the socket layer can build structured
/// `error` events without matching on each variant.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// ACTOR
// =============================================================================

/// Who caused an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

// =============================================================================
// CLIENT -> SERVER
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinProject {
        #[serde(rename = "projectId")]
        project_id: Uuid,
    },
    LeaveProject {
        #[serde(rename = "projectId")]
        project_id: Uuid,
    },
    SyncSince {
        #[serde(rename = "projectId")]
        project_id: Uuid,
        #[serde(rename = "sinceSeq", default)]
        since_seq: i64,
    },
}

// =============================================================================
// SERVER -> CLIENT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceAction {
    UserJoined,
    UserLeft,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    JoinedProject {
        #[serde(rename = "projectId")]
        project_id: Uuid,
        #[serde(rename = "onlineCount")]
        online_count: usize,
        role: Role,
    },
    PresenceUpdate {
        #[serde(rename = "projectId")]
        project_id: Uuid,
        #[serde(rename = "onlineCount")]
        online_count: usize,
        action: PresenceAction,
        #[serde(rename = "userId")]
        user_id: Uuid,
        #[serde(rename = "userName", skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
    },
    BoardEvent(EventEnvelope<BoardEventKind>),
    MemberEvent(EventEnvelope<MemberEventKind>),
    RemovedFromProject {
        #[serde(rename = "projectId")]
        project_id: Uuid,
    },
    ActivityBatch {
        #[serde(rename = "projectId")]
        project_id: Uuid,
        activities: Vec<Activity>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    /// Structured `error` event from any coded error.
    pub fn error_from(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::Error { code: err.error_code().to_owned(), message: err.to_string() }
    }

    /// `error` event for malformed input that never reached a service.
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::Error { code: "E_INVALID_MESSAGE".into(), message: message.into() }
    }
}

/// Common header of every persisted-and-broadcast event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope<K> {
    pub project_id: Uuid,
    pub actor: Actor,
    pub timestamp: i64,
    pub seq: i64,
    #[serde(flatten)]
    pub kind: K,
}

// =============================================================================
// EVENT KINDS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum BoardEventKind {
    BoardCreated(BoardCreated),
    ColumnCreated(Column),
    ColumnUpdated(Column),
    ColumnDeleted(ColumnDeleted),
    ColumnsReordered(ColumnsReordered),
    TaskCreated(Task),
    TaskUpdated(Task),
    TaskMoved(TaskMoved),
    TaskDeleted(TaskDeleted),
    CommentAdded(TaskComment),
}

impl BoardEventKind {
    /// Wire `type` tag, also used as the activity action.
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Self::BoardCreated(_) => "board_created",
            Self::ColumnCreated(_) => "column_created",
            Self::ColumnUpdated(_) => "column_updated",
            Self::ColumnDeleted(_) => "column_deleted",
            Self::ColumnsReordered(_) => "columns_reordered",
            Self::TaskCreated(_) => "task_created",
            Self::TaskUpdated(_) => "task_updated",
            Self::TaskMoved(_) => "task_moved",
            Self::TaskDeleted(_) => "task_deleted",
            Self::CommentAdded(_) => "comment_added",
        }
    }

    /// Task the event is about, if it outlives the event.
    #[must_use]
    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            Self::TaskCreated(t) | Self::TaskUpdated(t) => Some(t.id),
            Self::TaskMoved(m) => Some(m.task.id),
            Self::CommentAdded(c) => Some(c.task_id),
            // a deleted task's history is cascaded away with it
            Self::TaskDeleted(_)
            | Self::BoardCreated(_)
            | Self::ColumnCreated(_)
            | Self::ColumnUpdated(_)
            | Self::ColumnDeleted(_)
            | Self::ColumnsReordered(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardCreated {
    pub board_id: Uuid,
    pub name: String,
    pub column_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDeleted {
    pub column_id: Uuid,
    pub board_id: Uuid,
    pub removed_task_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnsReordered {
    pub board_id: Uuid,
    pub column_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMoved {
    pub task: Task,
    pub from_column_id: Uuid,
    pub to_column_id: Uuid,
    pub position: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDeleted {
    pub task_id: Uuid,
    pub column_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MemberEventKind {
    MemberAdded(MemberInfo),
    MemberRemoved(MemberInfo),
    MemberRoleChanged(MemberInfo),
}

impl MemberEventKind {
    /// Wire `type` tag.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MemberAdded(_) => "member_added",
            Self::MemberRemoved(_) => "member_removed",
            Self::MemberRoleChanged(_) => "member_role_changed",
        }
    }

    /// Activity action recorded for the event.
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Self::MemberAdded(_) => "member_joined",
            Self::MemberRemoved(_) => "member_removed",
            Self::MemberRoleChanged(_) => "member_role_changed",
        }
    }

    #[must_use]
    pub fn member(&self) -> &MemberInfo {
        match self {
            Self::MemberAdded(m) | Self::MemberRemoved(m) | Self::MemberRoleChanged(m) => m,
        }
    }
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
