//! Invitation state machine: invite, accept, reject, revoke, expire.
//!
//! DESIGN
//! ======
//! An invitation starts `PENDING` and leaves it exactly once, to one of
//! `ACCEPTED` (invitee accepts), `REJECTED` (invitee declines), `REVOKED`
//! (owner withdraws) or `EXPIRED` (past `expires_at`, found lazily on accept
//! or by the periodic sweep). Every exit is a compare-and-set on the stored
//! status, so when two requests race on the same token exactly one wins and
//! the other sees `AlreadyProcessed`.
//!
//! Accepting always grants `MEMBER`. The status change and the membership
//! row are written together by `Store::accept_invitation`, so a failed
//! membership write leaves the invitation `PENDING` and the token usable.
//! A fresh join publishes `member_added` to the project room; the other
//! transitions, and an accept by someone who already belongs, are recorded
//! as activity only.

use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::StoreError;
use crate::db::models::{
    Acceptance, DAY_MS, Invitation, InvitationStatus, NewActivity, Notification, NotificationKind, ProjectMember, Role, now_ms,
};
use crate::protocol::{ErrorCode, MemberEventKind, MemberInfo};
use crate::services::auth::{self, Identity};
use crate::services::events::{self, DomainEvent};
use crate::services::membership::{self, MembershipError};
use crate::state::AppState;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum InviteError {
    #[error("invitation not found")]
    NotFound,
    #[error("invitation already {}", .0.as_str())]
    AlreadyProcessed(InvitationStatus),
    #[error("invitation has expired")]
    Expired,
    #[error("invitation was sent to a different email address")]
    EmailMismatch,
    #[error("invalid email address: {0}")]
    InvalidEmail(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Membership(#[from] MembershipError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for InviteError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound => "E_INVITATION_NOT_FOUND",
            Self::AlreadyProcessed(_) => "E_ALREADY_PROCESSED",
            Self::Expired => "E_INVITATION_EXPIRED",
            Self::EmailMismatch => "E_EMAIL_MISMATCH",
            Self::InvalidEmail(_) => "E_INVALID_EMAIL",
            Self::InvalidInput(_) => "E_INVALID_INPUT",
            Self::Membership(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.retryable())
    }
}

/// Result of one `invite` call.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteOutcome {
    /// Normalized addresses that received a new invitation.
    pub invited: Vec<String>,
    /// Addresses skipped because they already belong to the project.
    pub already_members: Vec<String>,
    pub invitations: Vec<Invitation>,
}

/// Trimmed, lowercased address, or `None` when it is not `local@domain`.
#[must_use]
pub fn normalize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_ascii_lowercase();
    let (local, domain) = normalized.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    Some(normalized)
}

fn same_email(identity: &Identity, invitation: &Invitation) -> bool {
    normalize_email(&identity.email).is_some_and(|e| e == invitation.email)
}

async fn record(state: &AppState, invitation: &Invitation, user_id: Uuid, action: &str) {
    let activity = NewActivity {
        project_id: invitation.project_id,
        user_id,
        task_id: None,
        action: action.to_owned(),
        payload: json!({
            "invitationId": invitation.id,
            "email": invitation.email,
        }),
    };
    if let Err(e) = state.store.append_activity(activity).await {
        warn!(invitation_id = %invitation.id, action, error = %e, "invitation activity write failed");
    }
}

async fn notify(state: &AppState, notification: Notification) {
    let user_id = notification.user_id;
    if let Err(e) = state.store.insert_notification(&notification).await {
        warn!(%user_id, kind = notification.kind.as_str(), error = %e, "notification write failed");
    }
}

async fn load(state: &AppState, invitation_id: Uuid) -> Result<Invitation, InviteError> {
    state
        .store
        .find_invitation(invitation_id)
        .await?
        .ok_or(InviteError::NotFound)
}

/// Compare-and-set out of `PENDING`; the loser of a race sees the winner's status.
async fn transition(state: &AppState, invitation: &mut Invitation, next: InvitationStatus) -> Result<(), InviteError> {
    if state.store.transition_invitation(invitation.id, next).await? {
        invitation.status = next;
        info!(invitation_id = %invitation.id, project_id = %invitation.project_id, status = next.as_str(), "invitation transitioned");
        return Ok(());
    }
    let current = state
        .store
        .find_invitation(invitation.id)
        .await?
        .map_or(next, |i| i.status);
    Err(InviteError::AlreadyProcessed(current))
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Invite `emails` to the project. Whoever accepts joins as `Member`.
///
/// Addresses of existing members are reported in `already_members` and
/// skipped. The project is marked shared once anything was sent.
///
/// # Errors
///
/// `Forbidden` / `NotMember` unless the inviter owns the project, or
/// `InvalidEmail` for a malformed address (nothing is written in that case).
pub async fn invite(
    state: &AppState,
    inviter: &Identity,
    project_id: Uuid,
    emails: &[String],
) -> Result<InviteOutcome, InviteError> {
    membership::require_role(state.store.as_ref(), project_id, inviter.user_id, Role::Owner).await?;
    if emails.is_empty() {
        return Err(InviteError::InvalidInput("at least one email is required".into()));
    }

    let mut normalized: Vec<String> = Vec::with_capacity(emails.len());
    for raw in emails {
        let email = normalize_email(raw).ok_or_else(|| InviteError::InvalidEmail(raw.clone()))?;
        if !normalized.contains(&email) {
            normalized.push(email);
        }
    }

    let ttl_ms = state.config.invite_ttl_days.saturating_mul(DAY_MS);
    let mut outcome = InviteOutcome::default();
    for email in normalized {
        let existing = state.store.find_user_by_email(&email).await?;
        let is_member = match &existing {
            Some(user) => state.store.find_member(project_id, user.id).await?.is_some(),
            None => false,
        };
        if is_member {
            outcome.already_members.push(email);
            continue;
        }

        let now = now_ms();
        let invitation = Invitation {
            id: Uuid::new_v4(),
            project_id,
            email: email.clone(),
            token: auth::generate_token(),
            invited_by: inviter.user_id,
            status: InvitationStatus::Pending,
            expires_at: now.saturating_add(ttl_ms),
            created_at: now,
        };
        state.store.insert_invitation(&invitation).await?;
        record(state, &invitation, inviter.user_id, "invite_sent").await;

        if let Some(user) = existing {
            let data = json!({
                "invitationId": invitation.id,
                "projectId": project_id,
                "token": invitation.token,
            });
            let message = format!("{} invited you to a project", inviter.name);
            notify(state, Notification::new(user.id, NotificationKind::ProjectInvitation, "Project invitation", message, data))
                .await;
        }

        info!(%project_id, invitation_id = %invitation.id, %email, "invitation sent");
        outcome.invited.push(email);
        outcome.invitations.push(invitation);
    }

    if !outcome.invited.is_empty() {
        state.store.mark_project_shared(project_id).await?;
    }
    Ok(outcome)
}

/// Accept an invitation by token, joining the project as `Member`.
///
/// # Errors
///
/// `NotFound`, `AlreadyProcessed`, `Expired` (the row is moved to `EXPIRED`
/// as a side effect), or `EmailMismatch`. A store error leaves the
/// invitation `PENDING`.
pub async fn accept(state: &AppState, token: &str, who: &Identity) -> Result<Invitation, InviteError> {
    let mut invitation = state
        .store
        .find_invitation_by_token(token)
        .await?
        .ok_or(InviteError::NotFound)?;
    if invitation.status != InvitationStatus::Pending {
        return Err(InviteError::AlreadyProcessed(invitation.status));
    }
    if invitation.expires_at < now_ms() {
        if state
            .store
            .transition_invitation(invitation.id, InvitationStatus::Expired)
            .await?
        {
            debug!(invitation_id = %invitation.id, "invitation expired on accept");
        }
        return Err(InviteError::Expired);
    }
    if !same_email(who, &invitation) {
        return Err(InviteError::EmailMismatch);
    }

    let member = ProjectMember {
        id: Uuid::new_v4(),
        project_id: invitation.project_id,
        user_id: who.user_id,
        role: Role::Member,
        joined_at: now_ms(),
    };
    let acceptance = state.store.accept_invitation(invitation.id, &member).await?;
    if acceptance == Acceptance::NotPending {
        let current = load(state, invitation.id).await?.status;
        return Err(InviteError::AlreadyProcessed(current));
    }
    invitation.status = InvitationStatus::Accepted;
    info!(invitation_id = %invitation.id, project_id = %invitation.project_id, user_id = %who.user_id, "invitation accepted");

    let message = format!("{} accepted your invitation", who.name);
    let data = json!({ "invitationId": invitation.id, "projectId": invitation.project_id, "userId": who.user_id });
    notify(
        state,
        Notification::new(invitation.invited_by, NotificationKind::InvitationAccepted, "Invitation accepted", message, data),
    )
    .await;

    if acceptance == Acceptance::AlreadyMember {
        debug!(project_id = %invitation.project_id, user_id = %who.user_id, "invitee already a member");
        record(state, &invitation, who.user_id, "invitation_accepted").await;
        return Ok(invitation);
    }

    let info = MemberInfo { user_id: who.user_id, email: who.email.clone(), name: who.name.clone(), role: member.role };
    let event = DomainEvent::Member(MemberEventKind::MemberAdded(info));
    if let Err(e) = events::publish(state, invitation.project_id, who, event).await {
        warn!(project_id = %invitation.project_id, error = %e, "member_added publish failed");
    }
    Ok(invitation)
}

/// Decline an invitation addressed to `who`. Ends in `REJECTED`.
///
/// # Errors
///
/// `NotFound`, `AlreadyProcessed`, or `EmailMismatch`.
pub async fn reject(state: &AppState, invitation_id: Uuid, who: &Identity) -> Result<Invitation, InviteError> {
    let mut invitation = load(state, invitation_id).await?;
    if invitation.status != InvitationStatus::Pending {
        return Err(InviteError::AlreadyProcessed(invitation.status));
    }
    if !same_email(who, &invitation) {
        return Err(InviteError::EmailMismatch);
    }

    transition(state, &mut invitation, InvitationStatus::Rejected).await?;
    record(state, &invitation, who.user_id, "invitation_rejected").await;

    let message = format!("{} declined your invitation", who.name);
    let data = json!({ "invitationId": invitation.id, "projectId": invitation.project_id, "userId": who.user_id });
    notify(
        state,
        Notification::new(invitation.invited_by, NotificationKind::InvitationRejected, "Invitation declined", message, data),
    )
    .await;
    Ok(invitation)
}

/// Withdraw a pending invitation. Owner only. Ends in `REVOKED`.
///
/// # Errors
///
/// `NotFound`, `AlreadyProcessed`, or membership errors for a non-owner.
pub async fn revoke(state: &AppState, invitation_id: Uuid, owner: &Identity) -> Result<Invitation, InviteError> {
    let mut invitation = load(state, invitation_id).await?;
    membership::require_role(state.store.as_ref(), invitation.project_id, owner.user_id, Role::Owner).await?;
    if invitation.status != InvitationStatus::Pending {
        return Err(InviteError::AlreadyProcessed(invitation.status));
    }

    transition(state, &mut invitation, InvitationStatus::Revoked).await?;
    record(state, &invitation, owner.user_id, "invitation_revoked").await;
    Ok(invitation)
}

/// Pending, unexpired invitations addressed to `who`.
///
/// # Errors
///
/// Store errors only.
pub async fn pending_for_user(state: &AppState, who: &Identity) -> Result<Vec<Invitation>, InviteError> {
    let Some(email) = normalize_email(&who.email) else {
        return Ok(Vec::new());
    };
    Ok(state.store.list_pending_invitations(&email, now_ms()).await?)
}

/// Move every pending invitation past its expiry to `EXPIRED`.
/// Returns how many rows changed.
///
/// # Errors
///
/// Store errors only.
pub async fn sweep_expired(state: &AppState) -> Result<u64, InviteError> {
    let changed = state.store.expire_invitations(now_ms()).await?;
    if changed > 0 {
        info!(changed, "expired invitations swept");
    }
    Ok(changed)
}

/// Spawn the periodic expiry sweep. Returns a handle for shutdown.
pub fn spawn_sweep_task(state: AppState) -> JoinHandle<()> {
    let interval_secs = state.config.invite_sweep_interval_secs;
    info!(interval_secs, "invitation sweep configured");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_expired(&state).await {
                warn!(error = %e, "invitation sweep failed");
            }
        }
    })
}

#[cfg(test)]
#[path = "invitation_test.rs"]
mod tests;
