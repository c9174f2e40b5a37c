//! In-memory `Store` backend.
//!
//! DESIGN
//! ======
//! One `std::sync::Mutex` guards every table so each trait call is atomic,
//! matching the per-statement atomicity the Postgres backend provides. The
//! lock is never held across an `.await`. Used when `DATABASE_URL` is unset
//! and by every unit test.

use std::collections::HashMap;
use std::sync::Mutex;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use uuid::Uuid;

use super::models::{
    Acceptance, Activity, Board, Column, Invitation, InvitationStatus, NewActivity, Notification, Project, ProjectMember, Role,
    Task, TaskComment, TaskPlacement, User, now_ms,
};
use super::{Store, StoreError};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    sessions: HashMap<String, (Uuid, i64)>,
    projects: HashMap<Uuid, Project>,
    activity_seq: HashMap<Uuid, i64>,
    members: HashMap<Uuid, ProjectMember>,
    boards: HashMap<Uuid, Board>,
    columns: HashMap<Uuid, Column>,
    tasks: HashMap<Uuid, Task>,
    comments: HashMap<Uuid, TaskComment>,
    invitations: HashMap<Uuid, Invitation>,
    activities: Vec<Activity>,
    notifications: Vec<Notification>,
}

impl Tables {
    fn remove_task_cascade(&mut self, task_id: Uuid) {
        self.tasks.remove(&task_id);
        self.comments.retain(|_, c| c.task_id != task_id);
        self.activities.retain(|a| a.task_id != Some(task_id));
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    #[cfg(test)]
    fail_appends: AtomicBool,
    #[cfg(test)]
    fail_member_writes: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Make every subsequent `append_activity` fail until reset.
    #[cfg(test)]
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Number of activity rows currently stored.
    #[cfg(test)]
    pub fn activity_count(&self) -> usize {
        self.lock().activities.len()
    }

    /// Make every subsequent membership write from `accept_invitation` fail
    /// until reset.
    #[cfg(test)]
    pub fn fail_member_writes(&self, fail: bool) {
        self.fail_member_writes.store(fail, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn appends_disabled(&self) -> bool {
        self.fail_appends.load(Ordering::SeqCst)
    }

    #[cfg(not(test))]
    #[allow(clippy::unused_self)]
    fn appends_disabled(&self) -> bool {
        false
    }

    #[cfg(test)]
    fn member_writes_disabled(&self) -> bool {
        self.fail_member_writes.load(Ordering::SeqCst)
    }

    #[cfg(not(test))]
    #[allow(clippy::unused_self)]
    fn member_writes_disabled(&self) -> bool {
        false
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    // -- users / sessions ---------------------------------------------------

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut t = self.lock();
        if t.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict(format!("email already registered: {}", user.email)));
        }
        t.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.lock().users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.lock().users.values().find(|u| u.email == email).cloned())
    }

    async fn insert_session(&self, token: &str, user_id: Uuid, expires_at: i64) -> Result<(), StoreError> {
        self.lock().sessions.insert(token.to_owned(), (user_id, expires_at));
        Ok(())
    }

    async fn find_session_user(&self, token: &str, now: i64) -> Result<Option<User>, StoreError> {
        let t = self.lock();
        let Some(&(user_id, expires_at)) = t.sessions.get(token) else {
            return Ok(None);
        };
        if expires_at <= now {
            return Ok(None);
        }
        Ok(t.users.get(&user_id).cloned())
    }

    // -- projects / members -------------------------------------------------

    async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        let mut t = self.lock();
        t.projects.insert(project.id, project.clone());
        t.activity_seq.insert(project.id, 0);
        Ok(())
    }

    async fn find_project(&self, project_id: Uuid) -> Result<Option<Project>, StoreError> {
        Ok(self.lock().projects.get(&project_id).cloned())
    }

    async fn mark_project_shared(&self, project_id: Uuid) -> Result<(), StoreError> {
        if let Some(p) = self.lock().projects.get_mut(&project_id) {
            p.is_shared = true;
        }
        Ok(())
    }

    async fn list_user_projects(&self, user_id: Uuid) -> Result<Vec<(Project, Role)>, StoreError> {
        let t = self.lock();
        let mut joined: Vec<(&ProjectMember, &Project)> = t
            .members
            .values()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| t.projects.get(&m.project_id).map(|p| (m, p)))
            .collect();
        joined.sort_by_key(|(m, p)| (std::cmp::Reverse(m.joined_at), p.id));
        Ok(joined.into_iter().map(|(m, p)| (p.clone(), m.role)).collect())
    }

    async fn delete_project(&self, project_id: Uuid) -> Result<(), StoreError> {
        let mut t = self.lock();
        t.projects.remove(&project_id);
        t.activity_seq.remove(&project_id);
        t.members.retain(|_, m| m.project_id != project_id);
        t.invitations.retain(|_, i| i.project_id != project_id);
        t.activities.retain(|a| a.project_id != project_id);
        let boards: Vec<Uuid> = t
            .boards
            .values()
            .filter(|b| b.project_id == project_id)
            .map(|b| b.id)
            .collect();
        for board_id in boards {
            t.boards.remove(&board_id);
            let columns: Vec<Uuid> = t
                .columns
                .values()
                .filter(|c| c.board_id == board_id)
                .map(|c| c.id)
                .collect();
            for column_id in columns {
                t.columns.remove(&column_id);
                let tasks: Vec<Uuid> = t
                    .tasks
                    .values()
                    .filter(|task| task.column_id == column_id)
                    .map(|task| task.id)
                    .collect();
                for task_id in tasks {
                    t.remove_task_cascade(task_id);
                }
            }
        }
        Ok(())
    }

    async fn insert_member(&self, member: &ProjectMember) -> Result<(), StoreError> {
        let mut t = self.lock();
        if t
            .members
            .values()
            .any(|m| m.project_id == member.project_id && m.user_id == member.user_id)
        {
            return Err(StoreError::Conflict(format!(
                "user {} already a member of {}",
                member.user_id, member.project_id
            )));
        }
        t.members.insert(member.id, member.clone());
        Ok(())
    }

    async fn find_member(&self, project_id: Uuid, user_id: Uuid) -> Result<Option<ProjectMember>, StoreError> {
        Ok(self
            .lock()
            .members
            .values()
            .find(|m| m.project_id == project_id && m.user_id == user_id)
            .cloned())
    }

    async fn list_members(&self, project_id: Uuid) -> Result<Vec<ProjectMember>, StoreError> {
        let mut rows: Vec<ProjectMember> = self
            .lock()
            .members
            .values()
            .filter(|m| m.project_id == project_id)
            .cloned()
            .collect();
        rows.sort_by_key(|m| (m.joined_at, m.id));
        Ok(rows)
    }

    async fn update_member_role(&self, member_id: Uuid, role: Role) -> Result<(), StoreError> {
        if let Some(m) = self.lock().members.get_mut(&member_id) {
            m.role = role;
        }
        Ok(())
    }

    async fn delete_member(&self, member_id: Uuid) -> Result<(), StoreError> {
        self.lock().members.remove(&member_id);
        Ok(())
    }

    // -- boards / columns ---------------------------------------------------

    async fn insert_board(&self, board: &Board) -> Result<(), StoreError> {
        let mut t = self.lock();
        if t.boards.values().any(|b| b.project_id == board.project_id) {
            return Err(StoreError::Conflict(format!("project {} already has a board", board.project_id)));
        }
        t.boards.insert(board.id, board.clone());
        Ok(())
    }

    async fn find_board(&self, board_id: Uuid) -> Result<Option<Board>, StoreError> {
        Ok(self.lock().boards.get(&board_id).cloned())
    }

    async fn find_board_by_project(&self, project_id: Uuid) -> Result<Option<Board>, StoreError> {
        Ok(self
            .lock()
            .boards
            .values()
            .find(|b| b.project_id == project_id)
            .cloned())
    }

    async fn insert_column(&self, column: &Column) -> Result<(), StoreError> {
        self.lock().columns.insert(column.id, column.clone());
        Ok(())
    }

    async fn find_column(&self, column_id: Uuid) -> Result<Option<Column>, StoreError> {
        Ok(self.lock().columns.get(&column_id).cloned())
    }

    async fn list_columns(&self, board_id: Uuid) -> Result<Vec<Column>, StoreError> {
        let mut rows: Vec<Column> = self
            .lock()
            .columns
            .values()
            .filter(|c| c.board_id == board_id)
            .cloned()
            .collect();
        rows.sort_by_key(|c| (c.position, c.created_at));
        Ok(rows)
    }

    async fn update_column(&self, column: &Column) -> Result<(), StoreError> {
        self.lock().columns.insert(column.id, column.clone());
        Ok(())
    }

    async fn write_column_positions(&self, positions: &[(Uuid, i32)]) -> Result<(), StoreError> {
        let mut t = self.lock();
        for &(column_id, position) in positions {
            if let Some(c) = t.columns.get_mut(&column_id) {
                c.position = position;
            }
        }
        Ok(())
    }

    async fn delete_column(&self, column_id: Uuid) -> Result<(), StoreError> {
        let mut t = self.lock();
        t.columns.remove(&column_id);
        let task_ids: Vec<Uuid> = t
            .tasks
            .values()
            .filter(|task| task.column_id == column_id)
            .map(|task| task.id)
            .collect();
        for task_id in task_ids {
            t.remove_task_cascade(task_id);
        }
        Ok(())
    }

    // -- tasks / comments ---------------------------------------------------

    async fn insert_task(&self, task: &Task) -> Result<(), StoreError> {
        self.lock().tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn find_task(&self, task_id: Uuid) -> Result<Option<Task>, StoreError> {
        Ok(self.lock().tasks.get(&task_id).cloned())
    }

    async fn list_tasks(&self, column_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let mut rows: Vec<Task> = self
            .lock()
            .tasks
            .values()
            .filter(|t| t.column_id == column_id)
            .cloned()
            .collect();
        rows.sort_by_key(|t| (t.position, t.created_at));
        Ok(rows)
    }

    async fn update_task(&self, task: &Task) -> Result<(), StoreError> {
        self.lock().tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn write_task_positions(&self, placements: &[TaskPlacement]) -> Result<(), StoreError> {
        let mut t = self.lock();
        for p in placements {
            if let Some(task) = t.tasks.get_mut(&p.task_id) {
                task.column_id = p.column_id;
                task.position = p.position;
            }
        }
        Ok(())
    }

    async fn delete_task(&self, task_id: Uuid) -> Result<(), StoreError> {
        self.lock().remove_task_cascade(task_id);
        Ok(())
    }

    async fn insert_comment(&self, comment: &TaskComment) -> Result<(), StoreError> {
        self.lock().comments.insert(comment.id, comment.clone());
        Ok(())
    }

    async fn list_comments(&self, task_id: Uuid) -> Result<Vec<TaskComment>, StoreError> {
        let mut rows: Vec<TaskComment> = self
            .lock()
            .comments
            .values()
            .filter(|c| c.task_id == task_id)
            .cloned()
            .collect();
        rows.sort_by_key(|c| (c.created_at, c.id));
        Ok(rows)
    }

    // -- invitations --------------------------------------------------------

    async fn insert_invitation(&self, invitation: &Invitation) -> Result<(), StoreError> {
        let mut t = self.lock();
        if t.invitations.values().any(|i| i.token == invitation.token) {
            return Err(StoreError::Conflict("duplicate invitation token".into()));
        }
        t.invitations.insert(invitation.id, invitation.clone());
        Ok(())
    }

    async fn find_invitation(&self, invitation_id: Uuid) -> Result<Option<Invitation>, StoreError> {
        Ok(self.lock().invitations.get(&invitation_id).cloned())
    }

    async fn find_invitation_by_token(&self, token: &str) -> Result<Option<Invitation>, StoreError> {
        Ok(self
            .lock()
            .invitations
            .values()
            .find(|i| i.token == token)
            .cloned())
    }

    async fn transition_invitation(&self, invitation_id: Uuid, next: InvitationStatus) -> Result<bool, StoreError> {
        let mut t = self.lock();
        let Some(inv) = t.invitations.get_mut(&invitation_id) else {
            return Ok(false);
        };
        if !inv.status.can_transition_to(next) {
            return Ok(false);
        }
        inv.status = next;
        Ok(true)
    }

    async fn accept_invitation(&self, invitation_id: Uuid, member: &ProjectMember) -> Result<Acceptance, StoreError> {
        let mut t = self.lock();
        let pending = t
            .invitations
            .get(&invitation_id)
            .is_some_and(|i| i.status == InvitationStatus::Pending);
        if !pending {
            return Ok(Acceptance::NotPending);
        }
        if self.member_writes_disabled() {
            return Err(StoreError::Unavailable("membership write rejected".into()));
        }
        if let Some(inv) = t.invitations.get_mut(&invitation_id) {
            inv.status = InvitationStatus::Accepted;
        }
        let already = t
            .members
            .values()
            .any(|m| m.project_id == member.project_id && m.user_id == member.user_id);
        if already {
            return Ok(Acceptance::AlreadyMember);
        }
        t.members.insert(member.id, member.clone());
        Ok(Acceptance::Joined)
    }

    async fn expire_invitations(&self, now: i64) -> Result<u64, StoreError> {
        let mut t = self.lock();
        let mut changed = 0_u64;
        for inv in t.invitations.values_mut() {
            if inv.status == InvitationStatus::Pending && inv.expires_at < now {
                inv.status = InvitationStatus::Expired;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn list_pending_invitations(&self, email: &str, now: i64) -> Result<Vec<Invitation>, StoreError> {
        let mut rows: Vec<Invitation> = self
            .lock()
            .invitations
            .values()
            .filter(|i| i.email == email && i.status == InvitationStatus::Pending && i.expires_at >= now)
            .cloned()
            .collect();
        rows.sort_by_key(|i| (i.created_at, i.id));
        Ok(rows)
    }

    // -- activity / notifications -------------------------------------------

    async fn append_activity(&self, activity: NewActivity) -> Result<Activity, StoreError> {
        if self.appends_disabled() {
            return Err(StoreError::Unavailable("activity log rejected write".into()));
        }
        let mut t = self.lock();
        let Some(seq) = t.activity_seq.get_mut(&activity.project_id) else {
            return Err(StoreError::Conflict(format!("unknown project {}", activity.project_id)));
        };
        *seq += 1;
        let row = Activity {
            id: Uuid::new_v4(),
            project_id: activity.project_id,
            seq: *seq,
            user_id: activity.user_id,
            task_id: activity.task_id,
            action: activity.action,
            payload: activity.payload,
            created_at: now_ms(),
        };
        t.activities.push(row.clone());
        Ok(row)
    }

    async fn activity_since(&self, project_id: Uuid, since_seq: i64, limit: i64) -> Result<Vec<Activity>, StoreError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let t = self.lock();
        let mut rows: Vec<Activity> = t
            .activities
            .iter()
            .filter(|a| a.project_id == project_id && a.seq > since_seq)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.seq);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        self.lock().notifications.push(notification.clone());
        Ok(())
    }

    async fn list_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>, StoreError> {
        let mut rows: Vec<Notification> = self
            .lock()
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        rows.reverse();
        Ok(rows)
    }

    async fn mark_notification_read(&self, notification_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        let mut t = self.lock();
        let Some(n) = t
            .notifications
            .iter_mut()
            .find(|n| n.id == notification_id && n.user_id == user_id)
        else {
            return Ok(false);
        };
        n.read = true;
        Ok(true)
    }

    async fn mark_all_notifications_read(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut changed = 0_u64;
        for n in self.lock().notifications.iter_mut().filter(|n| n.user_id == user_id && !n.read) {
            n.read = true;
            changed += 1;
        }
        Ok(changed)
    }

    async fn count_unread_notifications(&self, user_id: Uuid) -> Result<i64, StoreError> {
        let count = self
            .lock()
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.read)
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn delete_notification(&self, notification_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        let mut t = self.lock();
        let before = t.notifications.len();
        t.notifications.retain(|n| !(n.id == notification_id && n.user_id == user_id));
        Ok(t.notifications.len() < before)
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
