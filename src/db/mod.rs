//! Storage collaborator: the `Store` trait, its backends, and pool setup.
//!
//! SYSTEM CONTEXT
//! ==============
//! Services never touch SQL directly; they call the async `Store` trait.
//! Production uses `PgStore` (SQLx pool with embedded migrations). When no
//! `DATABASE_URL` is configured, and in tests, `MemoryStore` backs the same
//! trait with process-local maps.
//!
//! INVARIANTS
//! ==========
//! - `transition_invitation` is a compare-and-set from `PENDING`; it returns
//!   `false` when the row already left `PENDING`, which is how at-most-once
//!   consumption is enforced under concurrency. `accept_invitation` does the
//!   same compare-and-set and the membership insert as one unit.
//! - `append_activity` assigns a per-project sequence strictly greater than
//!   every earlier activity of that project.
//! - `delete_task` cascades to the task's comments and task-linked activity;
//!   `delete_column` cascades to its tasks.

pub mod memory;
pub mod models;
pub mod postgres;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use models::{
    Acceptance, Activity, Board, Column, Invitation, InvitationStatus, NewActivity, Notification, Project, ProjectMember, Role,
    Task, TaskComment, TaskPlacement, User,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

// =============================================================================
// POOL
// =============================================================================

/// Initialize the `PostgreSQL` connection pool and run migrations.
///
/// # Errors
///
/// Returns an error if the connection or migrations fail.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    sqlx::migrate!("src/db/migrations").run(&pool).await?;

    Ok(pool)
}

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl crate::protocol::ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) | Self::Migrate(_) => "E_DATABASE",
            Self::Conflict(_) => "E_CONFLICT",
            Self::Corrupt(_) => "E_CORRUPT_ROW",
            Self::Unavailable(_) => "E_STORE_UNAVAILABLE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Unavailable(_))
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Generic create/find/update/delete surface over the relational store.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    // -- users / sessions ---------------------------------------------------
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;
    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn insert_session(&self, token: &str, user_id: Uuid, expires_at: i64) -> Result<(), StoreError>;
    async fn find_session_user(&self, token: &str, now: i64) -> Result<Option<User>, StoreError>;

    // -- projects / members -------------------------------------------------
    async fn insert_project(&self, project: &Project) -> Result<(), StoreError>;
    async fn find_project(&self, project_id: Uuid) -> Result<Option<Project>, StoreError>;
    async fn mark_project_shared(&self, project_id: Uuid) -> Result<(), StoreError>;
    /// Projects `user_id` belongs to, with their role, most recently joined first.
    async fn list_user_projects(&self, user_id: Uuid) -> Result<Vec<(Project, Role)>, StoreError>;
    /// Delete a project with its members, board, invitations and activity.
    async fn delete_project(&self, project_id: Uuid) -> Result<(), StoreError>;
    async fn insert_member(&self, member: &ProjectMember) -> Result<(), StoreError>;
    async fn find_member(&self, project_id: Uuid, user_id: Uuid) -> Result<Option<ProjectMember>, StoreError>;
    async fn list_members(&self, project_id: Uuid) -> Result<Vec<ProjectMember>, StoreError>;
    async fn update_member_role(&self, member_id: Uuid, role: Role) -> Result<(), StoreError>;
    async fn delete_member(&self, member_id: Uuid) -> Result<(), StoreError>;

    // -- boards / columns ---------------------------------------------------
    async fn insert_board(&self, board: &Board) -> Result<(), StoreError>;
    async fn find_board(&self, board_id: Uuid) -> Result<Option<Board>, StoreError>;
    async fn find_board_by_project(&self, project_id: Uuid) -> Result<Option<Board>, StoreError>;
    async fn insert_column(&self, column: &Column) -> Result<(), StoreError>;
    async fn find_column(&self, column_id: Uuid) -> Result<Option<Column>, StoreError>;
    /// Columns of a board ordered by position.
    async fn list_columns(&self, board_id: Uuid) -> Result<Vec<Column>, StoreError>;
    async fn update_column(&self, column: &Column) -> Result<(), StoreError>;
    async fn write_column_positions(&self, positions: &[(Uuid, i32)]) -> Result<(), StoreError>;
    async fn delete_column(&self, column_id: Uuid) -> Result<(), StoreError>;

    // -- tasks / comments ---------------------------------------------------
    async fn insert_task(&self, task: &Task) -> Result<(), StoreError>;
    async fn find_task(&self, task_id: Uuid) -> Result<Option<Task>, StoreError>;
    /// Tasks of a column ordered by position.
    async fn list_tasks(&self, column_id: Uuid) -> Result<Vec<Task>, StoreError>;
    async fn update_task(&self, task: &Task) -> Result<(), StoreError>;
    async fn write_task_positions(&self, placements: &[TaskPlacement]) -> Result<(), StoreError>;
    async fn delete_task(&self, task_id: Uuid) -> Result<(), StoreError>;
    async fn insert_comment(&self, comment: &TaskComment) -> Result<(), StoreError>;
    async fn list_comments(&self, task_id: Uuid) -> Result<Vec<TaskComment>, StoreError>;

    // -- invitations --------------------------------------------------------
    async fn insert_invitation(&self, invitation: &Invitation) -> Result<(), StoreError>;
    async fn find_invitation(&self, invitation_id: Uuid) -> Result<Option<Invitation>, StoreError>;
    async fn find_invitation_by_token(&self, token: &str) -> Result<Option<Invitation>, StoreError>;
    /// Move a `PENDING` invitation to `next`. Returns `false` if it was no longer pending.
    async fn transition_invitation(&self, invitation_id: Uuid, next: InvitationStatus) -> Result<bool, StoreError>;
    /// Mark every `PENDING` invitation with `expires_at < now` as `EXPIRED`.
    async fn expire_invitations(&self, now: i64) -> Result<u64, StoreError>;
    async fn list_pending_invitations(&self, email: &str, now: i64) -> Result<Vec<Invitation>, StoreError>;
    /// Atomically move a `PENDING` invitation to `ACCEPTED` and insert
    /// `member`. Either both happen or neither does.
    async fn accept_invitation(&self, invitation_id: Uuid, member: &ProjectMember) -> Result<Acceptance, StoreError>;

    // -- activity / notifications -------------------------------------------
    async fn append_activity(&self, activity: NewActivity) -> Result<Activity, StoreError>;
    /// Activities of a project with `seq > since_seq`, ascending, at most `limit`.
    async fn activity_since(&self, project_id: Uuid, since_seq: i64, limit: i64) -> Result<Vec<Activity>, StoreError>;
    async fn insert_notification(&self, notification: &Notification) -> Result<(), StoreError>;
    async fn list_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>, StoreError>;
    /// Returns `false` when no notification with that id belongs to `user_id`.
    async fn mark_notification_read(&self, notification_id: Uuid, user_id: Uuid) -> Result<bool, StoreError>;
    async fn mark_all_notifications_read(&self, user_id: Uuid) -> Result<u64, StoreError>;
    async fn count_unread_notifications(&self, user_id: Uuid) -> Result<i64, StoreError>;
    /// Returns `false` when no notification with that id belongs to `user_id`.
    async fn delete_notification(&self, notification_id: Uuid, user_id: Uuid) -> Result<bool, StoreError>;
}
