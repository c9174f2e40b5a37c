//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! passed by reference into every service. Live-connection bookkeeping
//! (presence + rooms) sits in one `Coordinator` behind a single `RwLock`;
//! nothing else in the process holds connection state.
//!
//! Presence is process-local. Running more than one instance splits rooms
//! and presence between them; that deployment shape is unsupported.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::Store;
use crate::services::auth::TokenVerifier;
use crate::services::presence::PresenceRegistry;
use crate::services::room::RoomTable;

// =============================================================================
// COORDINATOR
// =============================================================================

/// Owner of all in-memory connection state.
#[derive(Default)]
pub struct Coordinator {
    pub presence: PresenceRegistry,
    pub rooms: RoomTable,
}

// =============================================================================
// KEYED LOCKS
// =============================================================================

/// Lazily created async mutex per key (board id, project id).
///
/// Holding the guard serializes every critical section on the same key
/// across tasks; different keys never contend.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
}

impl KeyedLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: Uuid) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            // Drop slots nobody is holding or waiting on.
            map.retain(|k, m| *k == key || Arc::strong_count(m) > 1);
            Arc::clone(map.entry(key).or_default())
        };
        slot.lock_owned().await
    }

    /// Number of live lock slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state. Clone is required by Axum; every field is
/// Arc-backed.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub coordinator: Arc<RwLock<Coordinator>>,
    /// Serializes read-modify-write cycles on one board's positions.
    pub board_locks: KeyedLocks,
    /// Serializes append-then-broadcast per project so broadcast order
    /// matches activity `seq` order.
    pub publish_locks: KeyedLocks,
    pub config: Arc<AppConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, verifier: Arc<dyn TokenVerifier>, config: AppConfig) -> Self {
        Self {
            store,
            verifier,
            coordinator: Arc::new(RwLock::new(Coordinator::default())),
            board_locks: KeyedLocks::new(),
            publish_locks: KeyedLocks::new(),
            config: Arc::new(config),
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::db::MemoryStore;
    use crate::db::models::{Project, ProjectMember, Role, User, now_ms};
    use crate::protocol::ServerMessage;
    use crate::services::auth::{Identity, SessionVerifier};
    use crate::services::collab;
    use tokio::sync::mpsc;
    use tokio::time::{Duration, timeout};

    /// `AppState` over a fresh in-memory store.
    #[must_use]
    pub fn test_app_state() -> AppState {
        test_app_state_with_store().0
    }

    /// `AppState` plus a typed handle on its in-memory store.
    #[must_use]
    pub fn test_app_state_with_store() -> (AppState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let verifier = Arc::new(SessionVerifier::new(store.clone()));
        (AppState::new(store.clone(), verifier, AppConfig::default()), store)
    }

    /// Insert a user and return its identity.
    pub async fn seed_user(state: &AppState, name: &str) -> Identity {
        let user = User { id: Uuid::new_v4(), email: format!("{name}@example.com"), name: name.to_owned() };
        state.store.insert_user(&user).await.expect("seed user");
        Identity::from(user)
    }

    /// Insert a project owned by `owner` and return its ID.
    pub async fn seed_project(state: &AppState, owner: &Identity) -> Uuid {
        let project = Project {
            id: Uuid::new_v4(),
            name: "Launch".into(),
            description: String::new(),
            owner_id: owner.user_id,
            is_shared: false,
            created_at: now_ms(),
        };
        state.store.insert_project(&project).await.expect("seed project");
        seed_member(state, project.id, owner, Role::Owner).await;
        project.id
    }

    pub async fn seed_member(state: &AppState, project_id: Uuid, who: &Identity, role: Role) {
        let member =
            ProjectMember { id: Uuid::new_v4(), project_id, user_id: who.user_id, role, joined_at: now_ms() };
        state.store.insert_member(&member).await.expect("seed member");
    }

    /// Register a live connection for `who` and return its id and inbox.
    pub async fn connect(state: &AppState, who: &Identity) -> (Uuid, mpsc::Receiver<ServerMessage>) {
        collab::connect(state, who.clone()).await
    }

    pub async fn recv_message(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
        timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("message receive timed out")
            .expect("connection channel closed unexpectedly")
    }

    pub async fn assert_no_message(rx: &mut mpsc::Receiver<ServerMessage>) {
        assert!(
            timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
            "expected no message"
        );
    }

    /// Discard everything already queued on a connection.
    pub fn drain(rx: &mut mpsc::Receiver<ServerMessage>) {
        while rx.try_recv().is_ok() {}
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
