use std::collections::HashSet;

use dashmap::DashMap;
use uuid::Uuid;

use crate::ConnId;

/// Ephemeral room subscriptions: group id → connections currently joined,
/// plus the reverse map so teardown is O(rooms joined by the connection).
///
/// Subscription is a delivery-routing optimization, never an authorization
/// cache: every send re-checks durable group membership.
#[derive(Default)]
pub struct RoomIndex {
    rooms: DashMap<Uuid, HashSet<ConnId>>,
    joined: DashMap<ConnId, HashSet<Uuid>>,
}

impl RoomIndex {
    /// Cheap and advisory; no membership check, no store round trip.
    pub fn join(&self, conn: ConnId, group_id: Uuid) {
        self.rooms.entry(group_id).or_default().insert(conn);
        self.joined.entry(conn).or_default().insert(group_id);
    }

    pub fn leave(&self, conn: ConnId, group_id: Uuid) {
        if let Some(mut subs) = self.rooms.get_mut(&group_id) {
            subs.remove(&conn);
        }
        if let Some(mut groups) = self.joined.get_mut(&conn) {
            groups.remove(&group_id);
        }
    }

    /// Retracts the connection from every room it had joined. Idempotent;
    /// safe to call on connections that never joined anything.
    pub fn disconnect(&self, conn: ConnId) {
        let Some((_, groups)) = self.joined.remove(&conn) else {
            return;
        };
        for group_id in groups {
            if let Some(mut subs) = self.rooms.get_mut(&group_id) {
                subs.remove(&conn);
            }
        }
    }

    /// Snapshot of the room's current subscriber set, for fan-out.
    pub fn subscribers(&self, group_id: Uuid) -> Vec<ConnId> {
        self.rooms
            .get(&group_id)
            .map(|subs| subs.iter().copied().collect())
            .unwrap_or_default()
    }
}
