use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use lancer_db::Database;
use lancer_gateway::Hub;
use lancer_types::events::GatewayEvent;
use lancer_types::models::{Notification, NotificationKind};

use crate::run_blocking;

/// Synchronous helper invoked by the engines after their primary mutation
/// commits. Writes the durable notification row, then pushes a live event
/// if the recipient currently holds a gateway connection.
///
/// Notification delivery is a secondary effect: every failure here is
/// logged and swallowed, never rolled back against the triggering mutation.
#[derive(Clone)]
pub struct Notifier {
    db: Arc<Database>,
    hub: Hub,
}

impl Notifier {
    pub fn new(db: Arc<Database>, hub: Hub) -> Self {
        Self { db, hub }
    }

    pub async fn notify(
        &self,
        recipient_id: &str,
        kind: NotificationKind,
        message: impl Into<String>,
        link: Option<String>,
    ) {
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            recipient_id: recipient_id.to_string(),
            kind,
            message: message.into(),
            link,
            read: false,
            created_at: Utc::now(),
        };

        let db = self.db.clone();
        let row = notification.clone();
        let persisted = run_blocking(move || Ok(db.insert_notification(&row)?)).await;
        if let Err(e) = persisted {
            warn!(
                recipient = recipient_id,
                kind = kind.as_str(),
                "failed to persist notification: {}",
                e
            );
            return;
        }

        // Advisory presence check only skips wasted sends; send_to_user is
        // itself a no-op for absent users
        if self.hub.is_online(recipient_id).await {
            self.hub
                .send_to_user(recipient_id, GatewayEvent::Notified { notification })
                .await;
        }
    }
}
