//! Presence registry: which users are online, and in which projects.
//!
//! DESIGN
//! ======
//! Three maps, all pruned eagerly so no key ever points at an empty set:
//! - `connections`: connection -> owning identity + projects it has joined
//! - `user_connections`: user -> live connections
//! - `project_users`: project -> online users
//!
//! A user is in `project_users[p]` iff at least one of their connections has
//! joined `p`. Tracking projects per connection (not per user) is what keeps
//! a user with two tabs online until both tabs leave.
//!
//! The registry is plain data with synchronous methods. It lives inside the
//! `Coordinator` behind one lock, so callers never see a half-applied update.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use super::auth::Identity;

struct ConnectionEntry {
    identity: Identity,
    projects: HashSet<Uuid>,
}

/// A connection went away. Carries whom it belonged to and the projects in
/// which that user is now offline, with each project's new online count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub identity: Identity,
    pub offline_projects: Vec<(Uuid, usize)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceStats {
    pub total_connected_users: usize,
    pub total_active_project_rooms: usize,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PresenceError {
    #[error("connection not registered: {0}")]
    UnknownConnection(Uuid),
}

impl crate::protocol::ErrorCode for PresenceError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownConnection(_) => "E_UNKNOWN_CONNECTION",
        }
    }
}

#[derive(Default)]
pub struct PresenceRegistry {
    connections: HashMap<Uuid, ConnectionEntry>,
    user_connections: HashMap<Uuid, HashSet<Uuid>>,
    project_users: HashMap<Uuid, HashSet<Uuid>>,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection to its user. Re-registering a known connection is a no-op.
    pub fn register(&mut self, connection_id: Uuid, identity: Identity) {
        if self.connections.contains_key(&connection_id) {
            return;
        }
        self.user_connections
            .entry(identity.user_id)
            .or_default()
            .insert(connection_id);
        self.connections
            .insert(connection_id, ConnectionEntry { identity, projects: HashSet::new() });
    }

    /// Drop a connection and everything it joined.
    ///
    /// Returns `None` for an unknown connection.
    pub fn unregister(&mut self, connection_id: Uuid) -> Option<Departure> {
        let entry = self.connections.remove(&connection_id)?;
        let user_id = entry.identity.user_id;

        if let Some(conns) = self.user_connections.get_mut(&user_id) {
            conns.remove(&connection_id);
            if conns.is_empty() {
                self.user_connections.remove(&user_id);
            }
        }

        let mut offline_projects = Vec::new();
        let mut projects: Vec<Uuid> = entry.projects.into_iter().collect();
        projects.sort_unstable();
        for project_id in projects {
            if !self.user_in_project(user_id, project_id) {
                offline_projects.push((project_id, self.remove_online(project_id, user_id)));
            }
        }

        Some(Departure { identity: entry.identity, offline_projects })
    }

    /// Mark a connection as joined to a project. Returns the project's online count.
    ///
    /// Membership must already have been checked by the caller.
    ///
    /// # Errors
    ///
    /// `UnknownConnection` if the connection was never registered.
    pub fn join_project(&mut self, connection_id: Uuid, project_id: Uuid) -> Result<usize, PresenceError> {
        let entry = self
            .connections
            .get_mut(&connection_id)
            .ok_or(PresenceError::UnknownConnection(connection_id))?;
        entry.projects.insert(project_id);
        let user_id = entry.identity.user_id;

        let online = self.project_users.entry(project_id).or_default();
        online.insert(user_id);
        Ok(online.len())
    }

    /// Mirror of `join_project`.
    ///
    /// Returns `Some(online_count)` only when the user went offline in the
    /// project, i.e. this was their last connection in it.
    pub fn leave_project(&mut self, connection_id: Uuid, project_id: Uuid) -> Option<usize> {
        let entry = self.connections.get_mut(&connection_id)?;
        if !entry.projects.remove(&project_id) {
            return None;
        }
        let user_id = entry.identity.user_id;
        if self.user_in_project(user_id, project_id) {
            return None;
        }
        Some(self.remove_online(project_id, user_id))
    }

    #[must_use]
    pub fn online_users(&self, project_id: Uuid) -> HashSet<Uuid> {
        self.project_users.get(&project_id).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn online_count(&self, project_id: Uuid) -> usize {
        self.project_users.get(&project_id).map_or(0, HashSet::len)
    }

    #[must_use]
    pub fn stats(&self) -> PresenceStats {
        PresenceStats {
            total_connected_users: self.user_connections.len(),
            total_active_project_rooms: self.project_users.len(),
        }
    }

    #[must_use]
    pub fn identity(&self, connection_id: Uuid) -> Option<&Identity> {
        self.connections.get(&connection_id).map(|e| &e.identity)
    }

    /// Live connections of a user.
    #[must_use]
    pub fn connections_of(&self, user_id: Uuid) -> Vec<Uuid> {
        self.user_connections
            .get(&user_id)
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn has_joined(&self, connection_id: Uuid, project_id: Uuid) -> bool {
        self.connections
            .get(&connection_id)
            .is_some_and(|e| e.projects.contains(&project_id))
    }

    fn user_in_project(&self, user_id: Uuid, project_id: Uuid) -> bool {
        self.user_connections.get(&user_id).is_some_and(|conns| {
            conns.iter().any(|c| {
                self.connections
                    .get(c)
                    .is_some_and(|e| e.projects.contains(&project_id))
            })
        })
    }

    fn remove_online(&mut self, project_id: Uuid, user_id: Uuid) -> usize {
        let Some(online) = self.project_users.get_mut(&project_id) else {
            return 0;
        };
        online.remove(&user_id);
        let remaining = online.len();
        if remaining == 0 {
            self.project_users.remove(&project_id);
        }
        remaining
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
