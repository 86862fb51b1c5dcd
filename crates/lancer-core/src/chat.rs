use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use lancer_db::Database;
use lancer_gateway::Hub;
use lancer_types::events::GatewayEvent;
use lancer_types::models::{ChatMessage, MessageKind, NotificationKind};

use crate::notify::Notifier;
use crate::{Error, Result, run_blocking};

const HISTORY_LIMIT_CAP: u32 = 200;

/// Owns the Message entity. The hub is only ever handed events after the
/// store confirms the mutation, so a broadcast for an unpersisted message
/// cannot happen; new-message broadcasts additionally fire inside the
/// store's critical section so subscribers see them in seq order.
#[derive(Clone)]
pub struct ChatEngine {
    db: Arc<Database>,
    hub: Hub,
    notifier: Notifier,
}

impl ChatEngine {
    pub fn new(db: Arc<Database>, hub: Hub, notifier: Notifier) -> Self {
        Self { db, hub, notifier }
    }

    /// Room membership is the contract's participant pair; anyone else is
    /// rejected before a row is written.
    pub async fn send_message(
        &self,
        room_id: &str,
        sender_id: &str,
        content: String,
        kind: MessageKind,
    ) -> Result<ChatMessage> {
        if content.trim().is_empty() {
            return Err(Error::Validation("content must not be empty"));
        }

        let contract = self.room_contract(room_id).await?;
        if contract.client_id != sender_id && contract.developer_id != sender_id {
            return Err(Error::Forbidden);
        }

        let db = self.db.clone();
        let hub = self.hub.clone();
        let id = Uuid::new_v4().to_string();
        let (room, sender) = (room_id.to_string(), sender_id.to_string());
        let message = run_blocking(move || {
            // The broadcast fires inside the store's critical section, so
            // delivery order to subscribers equals commit order (seq order)
            Ok(db.insert_message(&id, &room, &sender, &content, kind, Utc::now(), |message| {
                hub.broadcast(GatewayEvent::MessageCreated {
                    message: message.clone(),
                });
            })?)
        })
        .await?;

        let recipient = if contract.client_id == sender_id {
            contract.developer_id
        } else {
            contract.client_id
        };
        self.notifier
            .notify(
                &recipient,
                NotificationKind::Message,
                "New message on your contract",
                Some(format!("/contracts/{}/chat", contract.id)),
            )
            .await;

        Ok(message)
    }

    /// Sender-only. Authorization happens here, before the store mutation;
    /// the hub never checks.
    pub async fn edit_message(
        &self,
        message_id: &str,
        acting_id: &str,
        content: String,
    ) -> Result<ChatMessage> {
        if content.trim().is_empty() {
            return Err(Error::Validation("content must not be empty"));
        }

        let mut message = self.load_message(message_id).await?;
        if message.sender_id != acting_id {
            return Err(Error::Forbidden);
        }

        let db = self.db.clone();
        let id = message_id.to_string();
        let body = content.clone();
        let changed = run_blocking(move || Ok(db.edit_message(&id, &body)?)).await?;
        if !changed {
            return Err(Error::NotFound);
        }

        message.content = content;
        message.edited = true;

        self.hub.broadcast(GatewayEvent::MessageEdited {
            message: message.clone(),
        });

        Ok(message)
    }

    /// Sender-only soft delete.
    pub async fn delete_message(&self, message_id: &str, acting_id: &str) -> Result<()> {
        let message = self.load_message(message_id).await?;
        if message.sender_id != acting_id {
            return Err(Error::Forbidden);
        }

        let db = self.db.clone();
        let id = message_id.to_string();
        let changed = run_blocking(move || Ok(db.delete_message(&id)?)).await?;
        if !changed {
            return Err(Error::NotFound);
        }

        self.hub.broadcast(GatewayEvent::MessageDeleted {
            id: message.id,
            room_id: message.room_id,
        });

        Ok(())
    }

    /// Room history for a participant, ascending seq. `before` pages
    /// backwards from the oldest seq of the previous page.
    pub async fn history(
        &self,
        room_id: &str,
        acting_id: &str,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<ChatMessage>> {
        let contract = self.room_contract(room_id).await?;
        if contract.client_id != acting_id && contract.developer_id != acting_id {
            return Err(Error::Forbidden);
        }

        let db = self.db.clone();
        let room = room_id.to_string();
        let limit = limit.min(HISTORY_LIMIT_CAP);
        run_blocking(move || Ok(db.get_messages(&room, limit, before)?)).await
    }

    async fn room_contract(&self, room_id: &str) -> Result<lancer_types::models::Contract> {
        let db = self.db.clone();
        let room = room_id.to_string();
        run_blocking(move || Ok(db.get_contract_by_room(&room)?))
            .await?
            .ok_or(Error::NotFound)
    }

    async fn load_message(&self, message_id: &str) -> Result<ChatMessage> {
        let db = self.db.clone();
        let id = message_id.to_string();
        run_blocking(move || Ok(db.get_message(&id)?))
            .await?
            .ok_or(Error::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{TestEnv, env, seed_project};
    use lancer_types::models::Contract;

    async fn seed_contract(env: &TestEnv) -> Contract {
        let project = seed_project(env, "client").await;
        let bid = env
            .bids
            .submit_bid(&project.id, "dev1", 450.0, 5, "offer".into())
            .await
            .unwrap();
        let (_, contract) = env.bids.accept_bid(&bid.id, "client").await.unwrap();
        contract
    }

    #[tokio::test]
    async fn participants_can_chat_and_order_is_monotonic() {
        let env = env();
        let contract = seed_contract(&env).await;

        let m1 = env
            .chat
            .send_message(&contract.room_id, "client", "hello".into(), MessageKind::Text)
            .await
            .unwrap();
        let m2 = env
            .chat
            .send_message(&contract.room_id, "dev1", "hi there".into(), MessageKind::Text)
            .await
            .unwrap();
        assert!(m2.seq > m1.seq);

        let history = env
            .chat
            .history(&contract.room_id, "client", 50, None)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn non_participant_send_is_forbidden_and_persists_nothing() {
        let env = env();
        let contract = seed_contract(&env).await;

        let err = env
            .chat
            .send_message(&contract.room_id, "stranger", "let me in".into(), MessageKind::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden));

        let history = env
            .chat
            .history(&contract.room_id, "client", 50, None)
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn broadcast_happens_after_persist() {
        let env = env();
        let contract = seed_contract(&env).await;
        let mut rx = env.hub.subscribe();

        let sent = env
            .chat
            .send_message(&contract.room_id, "client", "hello".into(), MessageKind::Text)
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            GatewayEvent::MessageCreated { message } => {
                assert_eq!(message.id, sent.id);
                // The broadcast message is already durable
                assert!(env.db.get_message(&message.id).unwrap().is_some());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn concurrent_sends_broadcast_in_commit_order() {
        let env = env();
        let contract = seed_contract(&env).await;
        let mut rx = env.hub.subscribe();

        let mut handles = Vec::new();
        for i in 0..8 {
            let chat = env.chat.clone();
            let room = contract.room_id.clone();
            let sender = if i % 2 == 0 { "client" } else { "dev1" };
            handles.push(tokio::spawn(async move {
                chat.send_message(&room, sender, format!("message {}", i), MessageKind::Text)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Whatever order the tasks ran in, subscribers see seq order
        let mut seqs = Vec::new();
        for _ in 0..8 {
            if let GatewayEvent::MessageCreated { message } = rx.recv().await.unwrap() {
                seqs.push(message.seq);
            }
        }
        assert_eq!(seqs, (1..=8).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn only_the_sender_can_edit() {
        let env = env();
        let contract = seed_contract(&env).await;

        let message = env
            .chat
            .send_message(&contract.room_id, "client", "hello".into(), MessageKind::Text)
            .await
            .unwrap();

        let err = env
            .chat
            .edit_message(&message.id, "dev1", "hijacked".into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden));

        let stored = env.db.get_message(&message.id).unwrap().unwrap();
        assert_eq!(stored.content, "hello");
        assert!(!stored.edited);

        let edited = env
            .chat
            .edit_message(&message.id, "client", "hello, edited".into())
            .await
            .unwrap();
        assert!(edited.edited);
        assert_eq!(edited.content, "hello, edited");
    }

    #[tokio::test]
    async fn only_the_sender_can_delete() {
        let env = env();
        let contract = seed_contract(&env).await;

        let message = env
            .chat
            .send_message(&contract.room_id, "dev1", "oops".into(), MessageKind::Text)
            .await
            .unwrap();

        let err = env
            .chat
            .delete_message(&message.id, "client")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden));

        env.chat.delete_message(&message.id, "dev1").await.unwrap();

        // Deleted messages disappear from history and further edits 404
        let history = env
            .chat
            .history(&contract.room_id, "dev1", 50, None)
            .await
            .unwrap();
        assert!(history.is_empty());
        let err = env
            .chat
            .delete_message(&message.id, "dev1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[tokio::test]
    async fn history_pages_backwards_with_cursor() {
        let env = env();
        let contract = seed_contract(&env).await;

        for i in 0..5 {
            env.chat
                .send_message(
                    &contract.room_id,
                    "client",
                    format!("message {}", i),
                    MessageKind::Text,
                )
                .await
                .unwrap();
        }

        let page = env
            .chat
            .history(&contract.room_id, "client", 2, None)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[1].seq, 5);

        let older = env
            .chat
            .history(&contract.room_id, "client", 2, Some(page[0].seq))
            .await
            .unwrap();
        assert_eq!(older.len(), 2);
        assert!(older.iter().all(|m| m.seq < page[0].seq));
    }

    #[tokio::test]
    async fn unknown_room_is_not_found() {
        let env = env();
        seed_contract(&env).await;

        let err = env
            .chat
            .send_message("no-such-room", "client", "hello".into(), MessageKind::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }
}
