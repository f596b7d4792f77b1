use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use uuid::Uuid;

use parley_db::Database;
use parley_types::events::GatewayEvent;
use parley_types::models::{Message, MessageKind};

use crate::dispatcher::Dispatcher;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Conversation not found")]
    NotFound,

    #[error("You are not a member of this conversation")]
    NotMember,

    #[error("Message content must not be empty")]
    EmptyContent,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// The single send path shared by the REST handler and the realtime
/// connection loop: membership check, transactional persist (message insert +
/// conversation preview update), then room broadcast.
#[derive(Clone)]
pub struct ChatService {
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

impl ChatService {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self { db, dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn send_message(
        &self,
        sender_id: Uuid,
        conversation_id: Uuid,
        content: String,
        kind: MessageKind,
    ) -> Result<Message, ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyContent);
        }

        self.check_member(conversation_id, sender_id).await?;

        // Truncate to the microsecond precision the store keeps, so the
        // returned message equals the persisted row exactly.
        let created_at = parley_db::parse_rfc3339(&parley_db::format_rfc3339(Utc::now()))
            .map_err(|e| anyhow!("timestamp round-trip failed: {}", e))?;

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            content,
            kind,
            created_at,
        };

        let db = self.db.clone();
        let row = message.clone();
        tokio::task::spawn_blocking(move || {
            db.create_message(
                &row.id.to_string(),
                &row.conversation_id.to_string(),
                &row.sender_id.to_string(),
                &row.content,
                row.kind.as_str(),
                &parley_db::format_rfc3339(row.created_at),
            )
        })
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

        self.dispatcher
            .broadcast(GatewayEvent::NewMessage(message.clone()));

        Ok(message)
    }

    /// Membership gate used by both room join and message send.
    pub async fn check_member(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ChatError> {
        let db = self.db.clone();
        let cid = conversation_id.to_string();
        let uid = user_id.to_string();

        let (exists, member) = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
            let exists = db.get_conversation(&cid)?.is_some();
            let member = exists && db.is_member(&cid, &uid)?;
            Ok((exists, member))
        })
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

        if !exists {
            return Err(ChatError::NotFound);
        }
        if !member {
            return Err(ChatError::NotMember);
        }
        Ok(())
    }

    /// Stateless typing relay — no persistence, no de-duplication.
    pub fn typing(&self, conversation_id: Uuid, user_id: Uuid) {
        self.dispatcher.broadcast(GatewayEvent::Typing {
            conversation_id,
            user_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_db::now_rfc3339;

    fn setup() -> (ChatService, Uuid, Uuid, Uuid) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        for (id, name, email) in [(alice, "Alice", "a@x.com"), (bob, "Bob", "b@x.com")] {
            db.create_user(&id.to_string(), name, email, "hash", &now_rfc3339())
                .unwrap();
        }
        let convo = Uuid::new_v4();
        db.create_direct_conversation(
            &convo.to_string(),
            &alice.to_string(),
            &bob.to_string(),
            &now_rfc3339(),
        )
        .unwrap();

        let service = ChatService::new(db, Dispatcher::new());
        (service, alice, bob, convo)
    }

    #[tokio::test]
    async fn send_persists_and_broadcasts_once() {
        let (service, alice, _bob, convo) = setup();
        let mut rx = service.dispatcher().subscribe();

        let message = service
            .send_message(alice, convo, "hi".into(), MessageKind::Text)
            .await
            .unwrap();
        assert_eq!(message.content, "hi");
        assert_eq!(message.conversation_id, convo);

        match rx.try_recv().unwrap() {
            GatewayEvent::NewMessage(broadcast) => {
                assert_eq!(broadcast.id, message.id);
                assert_eq!(broadcast.content, "hi");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err(), "exactly one event expected");
    }

    #[tokio::test]
    async fn outsiders_cannot_send() {
        let (service, _alice, _bob, convo) = setup();
        let outsider = Uuid::new_v4();

        let err = service
            .send_message(outsider, convo, "hi".into(), MessageKind::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotMember));
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let (service, alice, _bob, _convo) = setup();

        let err = service
            .send_message(alice, Uuid::new_v4(), "hi".into(), MessageKind::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound));
    }

    #[tokio::test]
    async fn empty_content_is_rejected_before_any_write() {
        let (service, alice, _bob, convo) = setup();
        let mut rx = service.dispatcher().subscribe();

        let err = service
            .send_message(alice, convo, "   ".into(), MessageKind::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::EmptyContent));
        assert!(rx.try_recv().is_err());
    }
}
