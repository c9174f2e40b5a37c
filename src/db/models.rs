//! Row types shared by every storage backend.
//!
//! DESIGN
//! ======
//! These mirror the Postgres tables one-to-one. Nested board views
//! (`BoardView` / `ColumnView`) are assembled by the board service, never
//! stored. Timestamps are milliseconds since the Unix epoch.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Milliseconds in one day.
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// ROLE
// =============================================================================

/// Project role. The single role type used by every component.
///
/// Ordering follows the permission hierarchy: `Viewer < Member < Admin < Owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Viewer,
    Member,
    Admin,
    Owner,
}

impl Role {
    /// Numeric level in the hierarchy.
    #[must_use]
    pub fn level(self) -> u8 {
        match self {
            Self::Viewer => 0,
            Self::Member => 1,
            Self::Admin => 2,
            Self::Owner => 3,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Viewer => "VIEWER",
            Self::Member => "MEMBER",
            Self::Admin => "ADMIN",
            Self::Owner => "OWNER",
        }
    }

    /// Exact-match parse. Lowercase spellings are rejected, not coerced.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "VIEWER" => Some(Self::Viewer),
            "MEMBER" => Some(Self::Member),
            "ADMIN" => Some(Self::Admin),
            "OWNER" => Some(Self::Owner),
            _ => None,
        }
    }
}

// =============================================================================
// USERS / PROJECTS / MEMBERS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub owner_id: Uuid,
    pub is_shared: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMember {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub joined_at: i64,
}

// =============================================================================
// BOARD / COLUMN / TASK
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub description: String,
    pub created_by: Uuid,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: Uuid,
    pub board_id: Uuid,
    pub title: String,
    pub position: i32,
    pub color: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub column_id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub assigned_to: Option<Uuid>,
    pub estimated_hours: f64,
    pub position: i32,
    /// Mirrors the title of the column the task sits in.
    pub status: String,
    pub created_by: Uuid,
    pub last_modified_by: Uuid,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Position assignment for one task, written in bulk after a reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskPlacement {
    pub task_id: Uuid,
    pub column_id: Uuid,
    pub position: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskComment {
    pub id: Uuid,
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: i64,
}

// =============================================================================
// INVITATIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Rejected,
    Revoked,
    Expired,
}

impl InvitationStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Revoked => "REVOKED",
            Self::Expired => "EXPIRED",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "ACCEPTED" => Some(Self::Accepted),
            "REJECTED" => Some(Self::Rejected),
            "REVOKED" => Some(Self::Revoked),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Every status except `Pending` is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Only `Pending` has outgoing edges, and never to itself.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self == Self::Pending && next != Self::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub id: Uuid,
    pub project_id: Uuid,
    pub email: String,
    /// Single-use secret. Never echoed back in activity payloads.
    #[serde(skip_serializing)]
    pub token: String,
    pub invited_by: Uuid,
    pub status: InvitationStatus,
    pub expires_at: i64,
    pub created_at: i64,
}

/// What `Store::accept_invitation` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// Invitation consumed and a `Member` row created.
    Joined,
    /// Invitation consumed; the user already belonged to the project.
    AlreadyMember,
    /// The invitation had already left `PENDING`; nothing was written.
    NotPending,
}

// =============================================================================
// ACTIVITY / NOTIFICATIONS
// =============================================================================

/// Append-only audit entry. `seq` is per-project and strictly increasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: Uuid,
    pub project_id: Uuid,
    pub seq: i64,
    pub user_id: Uuid,
    pub task_id: Option<Uuid>,
    pub action: String,
    pub payload: serde_json::Value,
    pub created_at: i64,
}

/// Activity fields supplied by the caller; the store assigns the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct NewActivity {
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub task_id: Option<Uuid>,
    pub action: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    ProjectInvitation,
    InvitationAccepted,
    InvitationRejected,
    MemberRemoved,
}

impl NotificationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProjectInvitation => "PROJECT_INVITATION",
            Self::InvitationAccepted => "INVITATION_ACCEPTED",
            Self::InvitationRejected => "INVITATION_REJECTED",
            Self::MemberRemoved => "MEMBER_REMOVED",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PROJECT_INVITATION" => Some(Self::ProjectInvitation),
            "INVITATION_ACCEPTED" => Some(Self::InvitationAccepted),
            "INVITATION_REJECTED" => Some(Self::InvitationRejected),
            "MEMBER_REMOVED" => Some(Self::MemberRemoved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
    pub read: bool,
    pub created_at: i64,
}

impl Notification {
    /// Build an unread notification stamped now.
    #[must_use]
    pub fn new(
        user_id: Uuid,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            title: title.into(),
            message: message.into(),
            data,
            read: false,
            created_at: now_ms(),
        }
    }
}
