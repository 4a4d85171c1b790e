pub mod appresult;
pub mod auth;
pub mod config;
pub mod db;
pub mod events;
pub mod groups;
pub mod media;
pub mod messages;
pub mod presence;
pub mod rooms;

use std::{path::PathBuf, sync::Arc};

use axum::extract::FromRef;
use dashmap::DashMap;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use appresult::{ApiError, ApiResult};

use auth::TokenAuthority;
use events::ServerEvent;
use groups::store::GroupStore;
use messages::store::MessageStore;
use presence::Presence;
use rooms::index::RoomIndex;

/// Unique id of one live duplex connection.
pub type ConnId = Uuid;

/// Connection id → outbound sender. The one place an event crosses from
/// shared state into a connection's writer task. Sends are non-blocking
/// and best-effort: a dead receiver only fails its own connection.
#[derive(Default)]
pub struct Peers {
    senders: DashMap<ConnId, mpsc::UnboundedSender<String>>,
}

impl Peers {
    pub fn insert(&self, conn: ConnId, sender: mpsc::UnboundedSender<String>) {
        self.senders.insert(conn, sender);
    }

    pub fn remove(&self, conn: ConnId) -> bool {
        self.senders.remove(&conn).is_some()
    }

    /// Delivers one already-serialized frame; failures are dropped.
    pub fn send_raw(&self, conn: ConnId, frame: String) {
        if let Some(sender) = self.senders.get(&conn) {
            let _ = sender.send(frame);
        }
    }

    pub fn send(&self, conn: ConnId, event: &ServerEvent) {
        if let Ok(frame) = serde_json::to_string(event) {
            self.send_raw(conn, frame);
        }
    }

    /// Delivers one event to every connected peer (serialized once).
    pub fn broadcast(&self, event: &ServerEvent) {
        let Ok(frame) = serde_json::to_string(event) else {
            return;
        };
        for entry in self.senders.iter() {
            let _ = entry.value().send(frame.clone());
        }
    }
}

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub auth: TokenAuthority,
    pub groups: GroupStore,
    pub messages: MessageStore,
    pub presence: Arc<Presence>,
    pub rooms: Arc<RoomIndex>,
    pub peers: Arc<Peers>,
    pub upload_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, jwt_secret: &[u8], upload_dir: PathBuf) -> Self {
        Self {
            groups: GroupStore::new(db_pool.clone()),
            messages: MessageStore::new(db_pool.clone()),
            db_pool,
            auth: TokenAuthority::new(jwt_secret),
            presence: Arc::new(Presence::default()),
            rooms: Arc::new(RoomIndex::default()),
            peers: Arc::new(Peers::default()),
            upload_dir: Arc::new(upload_dir),
        }
    }
}
