use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, MessageKind};

/// Events sent from the gateway to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Connection is authenticated and live.
    Ready { user_id: Uuid, name: String },

    /// A message was persisted and is being fanned out to its room.
    NewMessage(Message),

    /// Someone is typing in a conversation. Stateless relay — clients apply
    /// their own decay.
    Typing {
        conversation_id: Uuid,
        user_id: Uuid,
    },

    /// Command-level failure (e.g. joining a room without membership).
    Error { message: String },
}

impl GatewayEvent {
    /// The room this event belongs to, or `None` for connection-global events.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::NewMessage(msg) => Some(msg.conversation_id),
            Self::Typing {
                conversation_id, ..
            } => Some(*conversation_id),
            Self::Ready { .. } | Self::Error { .. } => None,
        }
    }
}

/// Commands sent from a client to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Join the broadcast room for a conversation. The gateway checks the
    /// caller against the conversation's member list before joining.
    JoinConversation { conversation_id: Uuid },

    /// Persist a message and broadcast it to the room.
    SendMessage {
        conversation_id: Uuid,
        content: String,
        #[serde(default)]
        kind: MessageKind,
    },

    /// Relay a typing signal to the room.
    Typing { conversation_id: Uuid },
}
