use anyhow::Result;
use parley_types::models::{Message, MessageKind, UserProfile};
use uuid::Uuid;

use crate::parse_rfc3339;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub avatar: Option<String>,
    pub is_verified: bool,
    pub otp: Option<String>,
    pub otp_expires_at: Option<String>,
    pub created_at: String,
}

impl UserRow {
    pub fn into_profile(self) -> Result<UserProfile> {
        Ok(UserProfile {
            id: self.id.parse::<Uuid>()?,
            name: self.name,
            email: self.email,
            avatar: self.avatar,
            is_verified: self.is_verified,
            created_at: parse_rfc3339(&self.created_at)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: String,
    pub name: Option<String>,
    pub is_group: bool,
    pub last_message: Option<String>,
    pub unread_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub kind: String,
    pub created_at: String,
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: self.id.parse::<Uuid>()?,
            conversation_id: self.conversation_id.parse::<Uuid>()?,
            sender_id: self.sender_id.parse::<Uuid>()?,
            content: self.content,
            kind: MessageKind::parse(&self.kind),
            created_at: parse_rfc3339(&self.created_at)?,
        })
    }
}
