use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::messages::{MessagePayload, store::Message};

/// Inbound transport events, one JSON object per websocket frame,
/// discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Subscribe this connection to a group's room. Advisory only;
    /// authorization happens at send/read time.
    Join { group_id: Uuid },
    Leave { group_id: Uuid },
    Send {
        group_id: Uuid,
        payload: MessagePayload,
    },
    Typing { group_id: Uuid },
}

/// Outbound transport events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A message delivered to a room this connection has joined.
    Message { message: Message },
    /// Full snapshot of currently-online user ids; always the complete
    /// set, never a delta.
    OnlineUsers { users: Vec<Uuid> },
    Typing { user_id: Uuid, group_id: Uuid },
    /// A failure of an operation this connection initiated. Failures
    /// affecting other recipients are never reported here.
    Error { message: String },
}
