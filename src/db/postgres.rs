//! Postgres `Store` backend.
//!
//! DESIGN
//! ======
//! Plain `sqlx::query` with runtime binds; enums are stored as TEXT and parsed
//! back strictly, so an unexpected value surfaces as `StoreError::Corrupt`
//! instead of being coerced. Multi-row position writes run in one transaction
//! so a reorder is never half-applied.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::models::{
    Acceptance, Activity, Board, Column, Invitation, InvitationStatus, NewActivity, Notification, NotificationKind, Priority,
    Project, ProjectMember, Role, Task, TaskComment, TaskPlacement, User, now_ms,
};
use super::{Store, StoreError};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// =============================================================================
// ROW MAPPING
// =============================================================================

fn corrupt(what: &str, value: &str) -> StoreError {
    StoreError::Corrupt(format!("unexpected {what}: {value}"))
}

fn user_from_row(r: &PgRow) -> User {
    User { id: r.get("id"), email: r.get("email"), name: r.get("name") }
}

fn project_from_row(r: &PgRow) -> Project {
    Project {
        id: r.get("id"),
        name: r.get("name"),
        description: r.get("description"),
        owner_id: r.get("owner_id"),
        is_shared: r.get("is_shared"),
        created_at: r.get("created_at"),
    }
}

fn member_from_row(r: &PgRow) -> Result<ProjectMember, StoreError> {
    let role: String = r.get("role");
    Ok(ProjectMember {
        id: r.get("id"),
        project_id: r.get("project_id"),
        user_id: r.get("user_id"),
        role: Role::parse(&role).ok_or_else(|| corrupt("role", &role))?,
        joined_at: r.get("joined_at"),
    })
}

fn board_from_row(r: &PgRow) -> Board {
    Board {
        id: r.get("id"),
        project_id: r.get("project_id"),
        name: r.get("name"),
        description: r.get("description"),
        created_by: r.get("created_by"),
        created_at: r.get("created_at"),
    }
}

fn column_from_row(r: &PgRow) -> Column {
    Column {
        id: r.get("id"),
        board_id: r.get("board_id"),
        title: r.get("title"),
        position: r.get("position"),
        color: r.get("color"),
        created_at: r.get("created_at"),
    }
}

fn task_from_row(r: &PgRow) -> Result<Task, StoreError> {
    let priority: String = r.get("priority");
    Ok(Task {
        id: r.get("id"),
        column_id: r.get("column_id"),
        title: r.get("title"),
        description: r.get("description"),
        priority: Priority::parse(&priority).ok_or_else(|| corrupt("priority", &priority))?,
        assigned_to: r.get("assigned_to"),
        estimated_hours: r.get("estimated_hours"),
        position: r.get("position"),
        status: r.get("status"),
        created_by: r.get("created_by"),
        last_modified_by: r.get("last_modified_by"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

fn comment_from_row(r: &PgRow) -> TaskComment {
    TaskComment {
        id: r.get("id"),
        task_id: r.get("task_id"),
        user_id: r.get("user_id"),
        content: r.get("content"),
        created_at: r.get("created_at"),
    }
}

fn invitation_from_row(r: &PgRow) -> Result<Invitation, StoreError> {
    let status: String = r.get("status");
    Ok(Invitation {
        id: r.get("id"),
        project_id: r.get("project_id"),
        email: r.get("email"),
        token: r.get("token"),
        invited_by: r.get("invited_by"),
        status: InvitationStatus::parse(&status).ok_or_else(|| corrupt("invitation status", &status))?,
        expires_at: r.get("expires_at"),
        created_at: r.get("created_at"),
    })
}

fn activity_from_row(r: &PgRow) -> Activity {
    Activity {
        id: r.get("id"),
        project_id: r.get("project_id"),
        seq: r.get("seq"),
        user_id: r.get("user_id"),
        task_id: r.get("task_id"),
        action: r.get("action"),
        payload: r.get("payload"),
        created_at: r.get("created_at"),
    }
}

fn notification_from_row(r: &PgRow) -> Result<Notification, StoreError> {
    let kind: String = r.get("kind");
    Ok(Notification {
        id: r.get("id"),
        user_id: r.get("user_id"),
        kind: NotificationKind::parse(&kind).ok_or_else(|| corrupt("notification kind", &kind))?,
        title: r.get("title"),
        message: r.get("message"),
        data: r.get("data"),
        read: r.get("read"),
        created_at: r.get("created_at"),
    })
}

/// Map a unique-constraint violation to `Conflict`; pass other errors through.
fn conflict_or(err: sqlx::Error, what: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::Conflict(what.to_owned());
        }
    }
    StoreError::Database(err)
}

const TASK_COLUMNS: &str = "id, column_id, title, description, priority, assigned_to, estimated_hours, position, \
                            status, created_by, last_modified_by, created_at, updated_at";

const INVITATION_COLUMNS: &str = "id, project_id, email, token, invited_by, status, expires_at, created_at";

// =============================================================================
// STORE IMPL
// =============================================================================

#[async_trait::async_trait]
impl Store for PgStore {
    // -- users / sessions ---------------------------------------------------

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO users (id, email, name) VALUES ($1, $2, $3)")
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.name)
            .execute(&self.pool)
            .await
            .map_err(|e| conflict_or(e, "email already registered"))?;
        Ok(())
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT id, email, name FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT id, email, name FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn insert_session(&self, token: &str, user_id: Uuid, expires_at: i64) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(token)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_session_user(&self, token: &str, now: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            r"SELECT u.id, u.email, u.name
              FROM sessions s
              JOIN users u ON u.id = s.user_id
              WHERE s.token = $1 AND s.expires_at > $2",
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    // -- projects / members -------------------------------------------------

    async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO projects (id, name, description, owner_id, is_shared, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(project.id)
        .bind(&project.name)
        .bind(&project.description)
        .bind(project.owner_id)
        .bind(project.is_shared)
        .bind(project.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_project(&self, project_id: Uuid) -> Result<Option<Project>, StoreError> {
        let row =
            sqlx::query("SELECT id, name, description, owner_id, is_shared, created_at FROM projects WHERE id = $1")
                .bind(project_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.as_ref().map(project_from_row))
    }

    async fn mark_project_shared(&self, project_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE projects SET is_shared = TRUE WHERE id = $1")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_user_projects(&self, user_id: Uuid) -> Result<Vec<(Project, Role)>, StoreError> {
        let rows = sqlx::query(
            r"SELECT p.id, p.name, p.description, p.owner_id, p.is_shared, p.created_at, m.role
              FROM project_members m JOIN projects p ON p.id = m.project_id
              WHERE m.user_id = $1
              ORDER BY m.joined_at DESC, p.id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                let role: String = r.get("role");
                let role = Role::parse(&role).ok_or_else(|| corrupt("role", &role))?;
                Ok((project_from_row(r), role))
            })
            .collect()
    }

    async fn delete_project(&self, project_id: Uuid) -> Result<(), StoreError> {
        // Every dependent table references projects with ON DELETE CASCADE.
        sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_member(&self, member: &ProjectMember) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO project_members (id, project_id, user_id, role, joined_at) VALUES ($1, $2, $3, $4, $5)")
            .bind(member.id)
            .bind(member.project_id)
            .bind(member.user_id)
            .bind(member.role.as_str())
            .bind(member.joined_at)
            .execute(&self.pool)
            .await
            .map_err(|e| conflict_or(e, "user already a member"))?;
        Ok(())
    }

    async fn find_member(&self, project_id: Uuid, user_id: Uuid) -> Result<Option<ProjectMember>, StoreError> {
        let row = sqlx::query(
            "SELECT id, project_id, user_id, role, joined_at FROM project_members WHERE project_id = $1 AND user_id = $2",
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(member_from_row).transpose()
    }

    async fn list_members(&self, project_id: Uuid) -> Result<Vec<ProjectMember>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, project_id, user_id, role, joined_at FROM project_members WHERE project_id = $1 ORDER BY joined_at, id",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(member_from_row).collect()
    }

    async fn update_member_role(&self, member_id: Uuid, role: Role) -> Result<(), StoreError> {
        sqlx::query("UPDATE project_members SET role = $2 WHERE id = $1")
            .bind(member_id)
            .bind(role.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_member(&self, member_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM project_members WHERE id = $1")
            .bind(member_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -- boards / columns ---------------------------------------------------

    async fn insert_board(&self, board: &Board) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO boards (id, project_id, name, description, created_by, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(board.id)
        .bind(board.project_id)
        .bind(&board.name)
        .bind(&board.description)
        .bind(board.created_by)
        .bind(board.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, "project already has a board"))?;
        Ok(())
    }

    async fn find_board(&self, board_id: Uuid) -> Result<Option<Board>, StoreError> {
        let row =
            sqlx::query("SELECT id, project_id, name, description, created_by, created_at FROM boards WHERE id = $1")
                .bind(board_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.as_ref().map(board_from_row))
    }

    async fn find_board_by_project(&self, project_id: Uuid) -> Result<Option<Board>, StoreError> {
        let row = sqlx::query(
            "SELECT id, project_id, name, description, created_by, created_at FROM boards WHERE project_id = $1",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(board_from_row))
    }

    async fn insert_column(&self, column: &Column) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO columns (id, board_id, title, position, color, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(column.id)
        .bind(column.board_id)
        .bind(&column.title)
        .bind(column.position)
        .bind(&column.color)
        .bind(column.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_column(&self, column_id: Uuid) -> Result<Option<Column>, StoreError> {
        let row = sqlx::query("SELECT id, board_id, title, position, color, created_at FROM columns WHERE id = $1")
            .bind(column_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(column_from_row))
    }

    async fn list_columns(&self, board_id: Uuid) -> Result<Vec<Column>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, board_id, title, position, color, created_at FROM columns WHERE board_id = $1 ORDER BY position, created_at",
        )
        .bind(board_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(column_from_row).collect())
    }

    async fn update_column(&self, column: &Column) -> Result<(), StoreError> {
        sqlx::query("UPDATE columns SET title = $2, color = $3, position = $4 WHERE id = $1")
            .bind(column.id)
            .bind(&column.title)
            .bind(&column.color)
            .bind(column.position)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn write_column_positions(&self, positions: &[(Uuid, i32)]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for &(column_id, position) in positions {
            sqlx::query("UPDATE columns SET position = $2 WHERE id = $1")
                .bind(column_id)
                .bind(position)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_column(&self, column_id: Uuid) -> Result<(), StoreError> {
        // tasks, their comments and task-linked activity go via ON DELETE CASCADE
        sqlx::query("DELETE FROM columns WHERE id = $1")
            .bind(column_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -- tasks / comments ---------------------------------------------------

    async fn insert_task(&self, task: &Task) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO tasks ({TASK_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(task.id)
        .bind(task.column_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.priority.as_str())
        .bind(task.assigned_to)
        .bind(task.estimated_hours)
        .bind(task.position)
        .bind(&task.status)
        .bind(task.created_by)
        .bind(task.last_modified_by)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_task(&self, task_id: Uuid) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn list_tasks(&self, column_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE column_id = $1 ORDER BY position, created_at"
        ))
        .bind(column_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn update_task(&self, task: &Task) -> Result<(), StoreError> {
        sqlx::query(
            r"UPDATE tasks
              SET column_id = $2, title = $3, description = $4, priority = $5, assigned_to = $6,
                  estimated_hours = $7, position = $8, status = $9, last_modified_by = $10, updated_at = $11
              WHERE id = $1",
        )
        .bind(task.id)
        .bind(task.column_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.priority.as_str())
        .bind(task.assigned_to)
        .bind(task.estimated_hours)
        .bind(task.position)
        .bind(&task.status)
        .bind(task.last_modified_by)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn write_task_positions(&self, placements: &[TaskPlacement]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for p in placements {
            sqlx::query("UPDATE tasks SET column_id = $2, position = $3 WHERE id = $1")
                .bind(p.task_id)
                .bind(p.column_id)
                .bind(p.position)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_task(&self, task_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_comment(&self, comment: &TaskComment) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO task_comments (id, task_id, user_id, content, created_at) VALUES ($1, $2, $3, $4, $5)")
            .bind(comment.id)
            .bind(comment.task_id)
            .bind(comment.user_id)
            .bind(&comment.content)
            .bind(comment.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_comments(&self, task_id: Uuid) -> Result<Vec<TaskComment>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, task_id, user_id, content, created_at FROM task_comments WHERE task_id = $1 ORDER BY created_at, id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(comment_from_row).collect())
    }

    // -- invitations --------------------------------------------------------

    async fn insert_invitation(&self, invitation: &Invitation) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO invitations ({INVITATION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(invitation.id)
        .bind(invitation.project_id)
        .bind(&invitation.email)
        .bind(&invitation.token)
        .bind(invitation.invited_by)
        .bind(invitation.status.as_str())
        .bind(invitation.expires_at)
        .bind(invitation.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, "duplicate invitation token"))?;
        Ok(())
    }

    async fn find_invitation(&self, invitation_id: Uuid) -> Result<Option<Invitation>, StoreError> {
        let row = sqlx::query(&format!("SELECT {INVITATION_COLUMNS} FROM invitations WHERE id = $1"))
            .bind(invitation_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(invitation_from_row).transpose()
    }

    async fn find_invitation_by_token(&self, token: &str) -> Result<Option<Invitation>, StoreError> {
        let row = sqlx::query(&format!("SELECT {INVITATION_COLUMNS} FROM invitations WHERE token = $1"))
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(invitation_from_row).transpose()
    }

    async fn transition_invitation(&self, invitation_id: Uuid, next: InvitationStatus) -> Result<bool, StoreError> {
        if !InvitationStatus::Pending.can_transition_to(next) {
            return Ok(false);
        }
        let result = sqlx::query("UPDATE invitations SET status = $2 WHERE id = $1 AND status = 'PENDING'")
            .bind(invitation_id)
            .bind(next.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn accept_invitation(&self, invitation_id: Uuid, member: &ProjectMember) -> Result<Acceptance, StoreError> {
        let mut tx = self.pool.begin().await?;
        let consumed = sqlx::query("UPDATE invitations SET status = 'ACCEPTED' WHERE id = $1 AND status = 'PENDING'")
            .bind(invitation_id)
            .execute(&mut *tx)
            .await?;
        if consumed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(Acceptance::NotPending);
        }
        let inserted = sqlx::query(
            r"INSERT INTO project_members (id, project_id, user_id, role, joined_at)
              VALUES ($1, $2, $3, $4, $5)
              ON CONFLICT (project_id, user_id) DO NOTHING",
        )
        .bind(member.id)
        .bind(member.project_id)
        .bind(member.user_id)
        .bind(member.role.as_str())
        .bind(member.joined_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(if inserted.rows_affected() == 1 { Acceptance::Joined } else { Acceptance::AlreadyMember })
    }

    async fn expire_invitations(&self, now: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE invitations SET status = 'EXPIRED' WHERE status = 'PENDING' AND expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_pending_invitations(&self, email: &str, now: i64) -> Result<Vec<Invitation>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations \
             WHERE email = $1 AND status = 'PENDING' AND expires_at >= $2 ORDER BY created_at, id"
        ))
        .bind(email)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(invitation_from_row).collect()
    }

    // -- activity / notifications -------------------------------------------

    async fn append_activity(&self, activity: NewActivity) -> Result<Activity, StoreError> {
        let mut tx = self.pool.begin().await?;
        // Row lock on the project serializes seq assignment per project.
        let seq: i64 =
            sqlx::query_scalar("UPDATE projects SET activity_seq = activity_seq + 1 WHERE id = $1 RETURNING activity_seq")
                .bind(activity.project_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| StoreError::Conflict(format!("unknown project {}", activity.project_id)))?;

        let row = Activity {
            id: Uuid::new_v4(),
            project_id: activity.project_id,
            seq,
            user_id: activity.user_id,
            task_id: activity.task_id,
            action: activity.action,
            payload: activity.payload,
            created_at: now_ms(),
        };
        sqlx::query(
            r"INSERT INTO activities (id, project_id, seq, user_id, task_id, action, payload, created_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(row.id)
        .bind(row.project_id)
        .bind(row.seq)
        .bind(row.user_id)
        .bind(row.task_id)
        .bind(&row.action)
        .bind(&row.payload)
        .bind(row.created_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn activity_since(&self, project_id: Uuid, since_seq: i64, limit: i64) -> Result<Vec<Activity>, StoreError> {
        let rows = sqlx::query(
            r"SELECT id, project_id, seq, user_id, task_id, action, payload, created_at
              FROM activities
              WHERE project_id = $1 AND seq > $2
              ORDER BY seq
              LIMIT $3",
        )
        .bind(project_id)
        .bind(since_seq)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(activity_from_row).collect())
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO notifications (id, user_id, kind, title, message, data, read, created_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(notification.id)
        .bind(notification.user_id)
        .bind(notification.kind.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.data)
        .bind(notification.read)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>, StoreError> {
        let rows = sqlx::query(
            r"SELECT id, user_id, kind, title, message, data, read, created_at
              FROM notifications WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn mark_notification_read(&self, notification_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE notifications SET read = TRUE WHERE id = $1 AND user_id = $2")
            .bind(notification_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_all_notifications_read(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE notifications SET read = TRUE WHERE user_id = $1 AND read = FALSE")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_unread_notifications(&self, user_id: Uuid) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND read = FALSE")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn delete_notification(&self, notification_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
            .bind(notification_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
#[path = "postgres_test.rs"]
mod tests;
