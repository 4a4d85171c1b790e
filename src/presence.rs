use std::collections::HashSet;

use dashmap::DashMap;
use uuid::Uuid;

use crate::{ConnId, Peers, events::ServerEvent};

/// Online-presence registry: user id → set of live connection ids.
///
/// A user is online iff their set is non-empty; multiple simultaneous
/// connections per user (devices, tabs) are expected. Mutations are atomic
/// per user via the map's entry API, so two connections of the same user
/// registering concurrently cannot lose an update. No guard is ever held
/// across an await.
#[derive(Default)]
pub struct Presence {
    users: DashMap<Uuid, HashSet<ConnId>>,
}

impl Presence {
    /// Idempotent. Returns true iff the user transitioned offline→online,
    /// in which case the caller owes everyone a snapshot broadcast.
    pub fn register(&self, user: Uuid, conn: ConnId) -> bool {
        let mut entry = self.users.entry(user).or_default();
        let was_offline = entry.is_empty();
        entry.insert(conn);
        was_offline
    }

    /// Returns true iff the user transitioned online→offline.
    pub fn unregister(&self, user: Uuid, conn: ConnId) -> bool {
        let went_offline = match self.users.get_mut(&user) {
            Some(mut entry) => {
                entry.remove(&conn);
                entry.is_empty()
            }
            None => false,
        };
        if went_offline {
            // Re-checks emptiness under the shard lock; a connection that
            // registered in between keeps the entry.
            self.users.remove_if(&user, |_, conns| conns.is_empty());
        }
        went_offline
    }

    /// Current online-user-id set, sorted for stable output. Sent to late
    /// joiners and broadcast on every transition.
    pub fn snapshot(&self) -> Vec<Uuid> {
        let mut users: Vec<Uuid> = self
            .users
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| *entry.key())
            .collect();
        users.sort_unstable();
        users
    }
}

/// Pushes the full online snapshot to every connected peer. Called strictly
/// after the registry mutation that made it necessary.
pub fn broadcast_online(presence: &Presence, peers: &Peers) {
    peers.broadcast(&ServerEvent::OnlineUsers {
        users: presence.snapshot(),
    });
}
