use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use lancer_types::events::GatewayEvent;

/// Manages all connected clients and fans out live events.
///
/// Room-scoped events go through one process-wide broadcast channel; each
/// connection filters against its own joined-rooms set (see
/// `connection::run_loop`). Targeted events (notifications) go through
/// per-user channels. The presence map is advisory only; it optimizes
/// live delivery and is never consulted for business decisions.
///
/// Constructed once at process start and handed by clone to every engine
/// that emits live events; there is no process-global instance.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    /// Broadcast channel for room-scoped events
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Advisory presence map: user ids currently connected
    online_users: RwLock<HashMap<String, usize>>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<String, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

impl Hub {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(HubInner {
                broadcast_tx,
                online_users: RwLock::new(HashMap::new()),
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to the room-event stream. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Fan an event out to all connections. Room-scoped events are filtered
    /// per connection against its joined rooms; no subscribers is not an
    /// error.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a per-user targeted channel. Returns (conn_id, receiver).
    /// A newer connection for the same user displaces the older channel.
    pub async fn register_user_channel(
        &self,
        user_id: &str,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .insert(user_id.to_string(), (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user channel, but only if conn_id still owns it.
    pub async fn unregister_user_channel(&self, user_id: &str, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some((stored_conn_id, _)) = channels.get(user_id) {
            if *stored_conn_id == conn_id {
                channels.remove(user_id);
            }
        }
    }

    /// Send a targeted event to a specific user, if connected. Best-effort:
    /// a missing or closed channel is silently ignored.
    pub async fn send_to_user(&self, user_id: &str, event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some((_, tx)) = channels.get(user_id) {
            let _ = tx.send(event);
        }
    }

    /// Advisory check used by the notification dispatcher to skip the live
    /// emit for offline users.
    pub async fn is_online(&self, user_id: &str) -> bool {
        self.inner.online_users.read().await.contains_key(user_id)
    }

    /// Mark a connection of this user online. Ref-counted so a user with
    /// two tabs stays online until the last one drops.
    pub async fn user_online(&self, user_id: &str) {
        let became_online = {
            let mut online = self.inner.online_users.write().await;
            let count = online.entry(user_id.to_string()).or_insert(0);
            *count += 1;
            *count == 1
        };

        if became_online {
            self.broadcast(GatewayEvent::PresenceUpdate {
                user_id: user_id.to_string(),
                online: true,
            });
        }
    }

    pub async fn user_offline(&self, user_id: &str) {
        let went_offline = {
            let mut online = self.inner.online_users.write().await;
            match online.get_mut(user_id) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    online.remove(user_id);
                    true
                }
                None => false,
            }
        };

        if went_offline {
            self.broadcast(GatewayEvent::PresenceUpdate {
                user_id: user_id.to_string(),
                online: false,
            });
        }
    }

    /// Snapshot of currently-online user ids.
    pub async fn online_users(&self) -> Vec<String> {
        self.inner
            .online_users
            .read()
            .await
            .keys()
            .cloned()
            .collect()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let hub = Hub::new();
        let mut rx = hub.subscribe();

        hub.broadcast(GatewayEvent::TypingStart {
            room_id: "r1".into(),
            user_id: "u1".into(),
        });

        match rx.recv().await.unwrap() {
            GatewayEvent::TypingStart { room_id, user_id } => {
                assert_eq!(room_id, "r1");
                assert_eq!(user_id, "u1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn targeted_send_only_reaches_registered_user() {
        let hub = Hub::new();
        let (_conn, mut rx) = hub.register_user_channel("u1").await;

        hub.send_to_user("u2", GatewayEvent::Ready {
            user_id: "u2".into(),
        })
        .await;
        hub.send_to_user("u1", GatewayEvent::Ready {
            user_id: "u1".into(),
        })
        .await;

        match rx.recv().await.unwrap() {
            GatewayEvent::Ready { user_id } => assert_eq!(user_id, "u1"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn presence_is_refcounted_per_connection() {
        let hub = Hub::new();

        hub.user_online("u1").await;
        hub.user_online("u1").await;
        hub.user_offline("u1").await;
        assert!(hub.is_online("u1").await);

        hub.user_offline("u1").await;
        assert!(!hub.is_online("u1").await);
    }

    #[tokio::test]
    async fn stale_conn_cannot_unregister_newer_channel() {
        let hub = Hub::new();
        let (old_conn, _old_rx) = hub.register_user_channel("u1").await;
        let (_new_conn, mut new_rx) = hub.register_user_channel("u1").await;

        hub.unregister_user_channel("u1", old_conn).await;

        hub.send_to_user("u1", GatewayEvent::Ready {
            user_id: "u1".into(),
        })
        .await;
        assert!(new_rx.recv().await.is_some());
    }
}
