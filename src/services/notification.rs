//! In-app notification inbox: list, unread count, mark read, delete.
//!
//! Notifications are written by the invitation and membership flows; this
//! module only serves them back to their recipient. Every operation is
//! scoped to the caller, so another user's notification id behaves exactly
//! like an unknown one.

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::db::StoreError;
use crate::db::models::Notification;
use crate::protocol::ErrorCode;
use crate::services::auth::Identity;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification not found: {0}")]
    NotFound(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for NotificationError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_NOTIFICATION_NOT_FOUND",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.retryable())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub count: i64,
}

/// The caller's notifications, newest first.
///
/// # Errors
///
/// Store errors only.
pub async fn list(state: &AppState, who: &Identity) -> Result<Vec<Notification>, NotificationError> {
    Ok(state.store.list_notifications(who.user_id).await?)
}

/// # Errors
///
/// Store errors only.
pub async fn unread_count(state: &AppState, who: &Identity) -> Result<UnreadCount, NotificationError> {
    let count = state.store.count_unread_notifications(who.user_id).await?;
    Ok(UnreadCount { count })
}

/// Mark one notification read. Marking an already-read one succeeds.
///
/// # Errors
///
/// `NotFound` when the id is unknown or belongs to someone else.
pub async fn mark_read(state: &AppState, who: &Identity, notification_id: Uuid) -> Result<(), NotificationError> {
    if !state.store.mark_notification_read(notification_id, who.user_id).await? {
        return Err(NotificationError::NotFound(notification_id));
    }
    Ok(())
}

/// Mark every unread notification of the caller read. Returns how many changed.
///
/// # Errors
///
/// Store errors only.
pub async fn mark_all_read(state: &AppState, who: &Identity) -> Result<u64, NotificationError> {
    let changed = state.store.mark_all_notifications_read(who.user_id).await?;
    debug!(user_id = %who.user_id, changed, "notifications marked read");
    Ok(changed)
}

/// # Errors
///
/// `NotFound` when the id is unknown or belongs to someone else.
pub async fn delete(state: &AppState, who: &Identity, notification_id: Uuid) -> Result<(), NotificationError> {
    if !state.store.delete_notification(notification_id, who.user_id).await? {
        return Err(NotificationError::NotFound(notification_id));
    }
    Ok(())
}

#[cfg(test)]
#[path = "notification_test.rs"]
mod tests;
