use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use parley_types::events::{GatewayCommand, GatewayEvent};

use crate::service::{ChatError, ChatService};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a pre-authenticated WebSocket connection. The access token was
/// already verified at the HTTP upgrade layer, so the connection starts in
/// the authenticated state and goes straight to Ready + event loop.
pub async fn handle_connection(socket: WebSocket, chat: ChatService, user_id: Uuid, name: String) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected to gateway", name, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        name: name.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    // Rooms this connection has joined (shared between send and recv tasks).
    let joined: Arc<std::sync::RwLock<HashSet<Uuid>>> =
        Arc::new(std::sync::RwLock::new(HashSet::new()));
    let send_joined = joined.clone();

    // Targeted events for this connection only (join refusals, send errors).
    let (conn_tx, mut conn_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let mut broadcast_rx = chat.dispatcher().subscribe();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room broadcasts + targeted events -> client, with heartbeat
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

                    if let Some(conversation_id) = event.conversation_id() {
                        let rooms = send_joined.read().expect("room lock poisoned");
                        if !rooms.contains(&conversation_id) {
                            continue;
                        }
                    }

                    if sender
                        .send(Message::Text(serde_json::to_string(&event).unwrap().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                event = conn_rx.recv() => {
                    let Some(event) = event else { break };
                    if sender
                        .send(Message::Text(serde_json::to_string(&event).unwrap().into()))
                        .await
                        .is_err()
                    {
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

    // Read commands from client
    let recv_joined = joined.clone();
    let chat_recv = chat.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&chat_recv, user_id, cmd, &recv_joined, &conn_tx).await;
                    }
                    Err(e) => {
                        warn!("{} bad command ({} bytes): {}", user_id, text.len(), e);
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

    // Wait for either task to finish; disconnect drops room membership with it.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("{} ({}) disconnected from gateway", name, user_id);
}

async fn handle_command(
    chat: &ChatService,
    user_id: Uuid,
    cmd: GatewayCommand,
    joined: &Arc<std::sync::RwLock<HashSet<Uuid>>>,
    conn_tx: &mpsc::UnboundedSender<GatewayEvent>,
) {
    match cmd {
        GatewayCommand::JoinConversation { conversation_id } => {
            // Membership is checked before the join; non-members never enter
            // the room.
            match chat.check_member(conversation_id, user_id).await {
                Ok(()) => {
                    info!("{} joined room {}", user_id, conversation_id);
                    joined
                        .write()
                        .expect("room lock poisoned")
                        .insert(conversation_id);
                }
                Err(err @ (ChatError::NotFound | ChatError::NotMember)) => {
                    warn!("{} refused room {}: {}", user_id, conversation_id, err);
                    let _ = conn_tx.send(GatewayEvent::Error {
                        message: err.to_string(),
                    });
                }
                Err(err) => {
                    error!("room join failed for {}: {}", user_id, err);
                    let _ = conn_tx.send(GatewayEvent::Error {
                        message: "Internal error".into(),
                    });
                }
            }
        }

        GatewayCommand::SendMessage {
            conversation_id,
            content,
            kind,
        } => {
            // Same service path as the REST handler; the broadcast happens
            // inside ChatService::send_message.
            match chat.send_message(user_id, conversation_id, content, kind).await {
                Ok(_) => {}
                Err(err @ ChatError::Internal(_)) => {
                    error!("send failed for {}: {}", user_id, err);
                    let _ = conn_tx.send(GatewayEvent::Error {
                        message: "Internal error".into(),
                    });
                }
                Err(err) => {
                    warn!("send refused for {}: {}", user_id, err);
                    let _ = conn_tx.send(GatewayEvent::Error {
                        message: err.to_string(),
                    });
                }
            }
        }

        GatewayCommand::Typing { conversation_id } => {
            // Relay only from connections that joined the room.
            let is_joined = joined
                .read()
                .expect("room lock poisoned")
                .contains(&conversation_id);
            if is_joined {
                chat.typing(conversation_id, user_id);
            }
        }
    }
}
