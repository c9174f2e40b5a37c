//! Rooms: per-project broadcast groups of live connections.
//!
//! DESIGN
//! ======
//! Each connection registers the sending half of its outbound channel once.
//! A room is just a set of connection ids keyed by project; it is created on
//! first join and removed when its last connection leaves. Delivery is
//! best-effort `try_send`: a full or closed channel drops the message for
//! that connection only.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::protocol::ServerMessage;

#[derive(Default)]
pub struct RoomTable {
    senders: HashMap<Uuid, mpsc::Sender<ServerMessage>>,
    rooms: HashMap<Uuid, HashSet<Uuid>>,
}

impl RoomTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, connection_id: Uuid, tx: mpsc::Sender<ServerMessage>) {
        self.senders.insert(connection_id, tx);
    }

    /// Forget a connection and pull it out of every room.
    pub fn detach(&mut self, connection_id: Uuid) {
        self.senders.remove(&connection_id);
        self.rooms.retain(|_, members| {
            members.remove(&connection_id);
            !members.is_empty()
        });
    }

    /// Add an attached connection to a project's room. Returns `false` if the
    /// connection has no outbound channel.
    pub fn join(&mut self, project_id: Uuid, connection_id: Uuid) -> bool {
        if !self.senders.contains_key(&connection_id) {
            return false;
        }
        self.rooms.entry(project_id).or_default().insert(connection_id);
        true
    }

    pub fn leave(&mut self, project_id: Uuid, connection_id: Uuid) {
        if let Some(members) = self.rooms.get_mut(&project_id) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.rooms.remove(&project_id);
            }
        }
    }

    #[must_use]
    pub fn members(&self, project_id: Uuid) -> HashSet<Uuid> {
        self.rooms.get(&project_id).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Fan a message out to every connection in the room. Returns how many
    /// channels accepted it.
    pub fn broadcast(&self, project_id: Uuid, msg: &ServerMessage) -> usize {
        let Some(members) = self.rooms.get(&project_id) else {
            return 0;
        };
        let mut delivered = 0;
        for connection_id in members {
            if self.send_to(*connection_id, msg.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Best-effort direct send to one connection.
    pub fn send_to(&self, connection_id: Uuid, msg: ServerMessage) -> bool {
        let Some(tx) = self.senders.get(&connection_id) else {
            return false;
        };
        match tx.try_send(msg) {
            Ok(()) => true,
            Err(e) => {
                debug!(%connection_id, error = %e, "room: dropped outbound message");
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
