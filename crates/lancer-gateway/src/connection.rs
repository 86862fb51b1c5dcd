use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use lancer_types::events::{GatewayCommand, GatewayEvent};

use crate::hub::Hub;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a pre-authenticated WebSocket connection. The token was already
/// validated at the HTTP upgrade layer, so we go straight to Ready and the
/// event loop. The hub keeps no backlog: a reconnecting client must re-Join
/// its rooms and re-fetch history over REST.
pub async fn handle_connection(socket: WebSocket, hub: Hub, user_id: String) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} connected to gateway", user_id);

    let ready = GatewayEvent::Ready {
        user_id: user_id.clone(),
    };
    let Ok(text) = serde_json::to_string(&ready) else {
        return;
    };
    if sender.send(Message::Text(text.into())).await.is_err() {
        return;
    }

    // Register the targeted channel and go online
    let (conn_id, mut user_rx) = hub.register_user_channel(&user_id).await;
    hub.user_online(&user_id).await;

    let mut broadcast_rx = hub.subscribe();
    let hub_recv = hub.clone();
    let user_id_send = user_id.clone();

    // Joined rooms, shared between the send filter and the command handler
    let joined_rooms: Arc<std::sync::RwLock<HashSet<String>>> =
        Arc::new(std::sync::RwLock::new(HashSet::new()));
    let send_rooms = joined_rooms.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events to the client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    {
                        let rooms = send_rooms.read().expect("room lock poisoned");
                        if !should_deliver(&event, &user_id_send, &rooms) {
                            continue;
                        }
                    }

                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };

                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client
    let user_id_recv = user_id.clone();
    let recv_rooms = joined_rooms.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&hub_recv, &user_id_recv, cmd, &recv_rooms);
                    }
                    Err(e) => {
                        warn!("Unparseable gateway command from {}: {}", user_id_recv, e);
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Whichever half finishes first tears down the other
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.user_offline(&user_id).await;
    hub.unregister_user_channel(&user_id, conn_id).await;

    info!("{} disconnected from gateway", user_id);
}

/// Send-side filter for the broadcast stream. Room-scoped events require
/// membership in that room, and typing indicators are never echoed back to
/// the user who produced them.
fn should_deliver(event: &GatewayEvent, user_id: &str, joined_rooms: &HashSet<String>) -> bool {
    if let Some(room_id) = event.room_id() {
        if !joined_rooms.contains(room_id) {
            return false;
        }
    }

    match event {
        GatewayEvent::TypingStart { user_id: from, .. }
        | GatewayEvent::TypingStop { user_id: from, .. } => from != user_id,
        _ => true,
    }
}

fn handle_command(
    hub: &Hub,
    user_id: &str,
    cmd: GatewayCommand,
    joined_rooms: &Arc<std::sync::RwLock<HashSet<String>>>,
) {
    match cmd {
        // Join/Leave are idempotent and unacknowledged
        GatewayCommand::Join { room_id } => {
            joined_rooms
                .write()
                .expect("room lock poisoned")
                .insert(room_id);
        }
        GatewayCommand::Leave { room_id } => {
            joined_rooms
                .write()
                .expect("room lock poisoned")
                .remove(&room_id);
        }
        // Typing indicators are ephemeral best-effort; clients expire them
        // after ~1.5s if no TypingStop arrives
        GatewayCommand::TypingStart { room_id } => {
            let joined = joined_rooms
                .read()
                .expect("room lock poisoned")
                .contains(&room_id);
            if joined {
                hub.broadcast(GatewayEvent::TypingStart {
                    room_id,
                    user_id: user_id.to_string(),
                });
            }
        }
        GatewayCommand::TypingStop { room_id } => {
            let joined = joined_rooms
                .read()
                .expect("room lock poisoned")
                .contains(&room_id);
            if joined {
                hub.broadcast(GatewayEvent::TypingStop {
                    room_id,
                    user_id: user_id.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(rooms: &[&str]) -> HashSet<String> {
        rooms.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn room_scoped_events_require_membership() {
        let event = GatewayEvent::MessageDeleted {
            id: "m1".into(),
            room_id: "r1".into(),
        };

        assert!(should_deliver(&event, "alice", &joined(&["r1"])));
        assert!(!should_deliver(&event, "alice", &joined(&["r2"])));
    }

    #[test]
    fn typing_is_not_echoed_to_its_originator() {
        let event = GatewayEvent::TypingStart {
            room_id: "r1".into(),
            user_id: "alice".into(),
        };
        let rooms = joined(&["r1"]);

        assert!(!should_deliver(&event, "alice", &rooms));
        assert!(should_deliver(&event, "bob", &rooms));

        let stop = GatewayEvent::TypingStop {
            room_id: "r1".into(),
            user_id: "alice".into(),
        };
        assert!(!should_deliver(&stop, "alice", &rooms));
    }

    #[test]
    fn unscoped_events_always_pass() {
        let event = GatewayEvent::PresenceUpdate {
            user_id: "alice".into(),
            online: true,
        };
        assert!(should_deliver(&event, "alice", &joined(&[])));
    }
}
