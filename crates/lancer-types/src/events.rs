use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, Notification};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: String },

    /// A message was persisted and should appear in the room
    MessageCreated { message: ChatMessage },

    /// A message was edited by its sender
    MessageEdited { message: ChatMessage },

    /// A message was deleted by its sender
    MessageDeleted { id: String, room_id: String },

    /// A user started typing in a room
    TypingStart { room_id: String, user_id: String },

    /// A user stopped typing in a room
    TypingStop { room_id: String, user_id: String },

    /// A user came online or went offline
    PresenceUpdate { user_id: String, online: bool },

    /// A durable notification was created for this user
    Notified { notification: Notification },
}

impl GatewayEvent {
    /// Returns the room id if this event is scoped to a specific room.
    /// Events that return `None` are delivered to the connection regardless
    /// of its joined rooms.
    pub fn room_id(&self) -> Option<&str> {
        match self {
            Self::MessageCreated { message } | Self::MessageEdited { message } => {
                Some(&message.room_id)
            }
            Self::MessageDeleted { room_id, .. } => Some(room_id),
            Self::TypingStart { room_id, .. } | Self::TypingStop { room_id, .. } => Some(room_id),
            // Ready, PresenceUpdate and Notified are connection-targeted or global
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
///
/// Join/Leave are idempotent membership changes with no acknowledgement;
/// a reconnecting client must re-Join and re-fetch history over REST,
/// the gateway keeps no backlog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Join a contract room to receive its live events
    Join { room_id: String },

    /// Leave a contract room
    Leave { room_id: String },

    /// Indicate typing in a room
    TypingStart { room_id: String },

    /// Indicate typing stopped in a room
    TypingStop { room_id: String },
}
