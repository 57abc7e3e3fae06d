use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use slateboard_shared::messages::{ClientFrame, ServerFrame};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::channels::{drop_if_empty, get_or_create_channel, normalize_channel_name};
use crate::state::{AppState, Channel};

pub async fn ping_handler() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

/// Injects transport configuration for the static pages.
pub async fn config_handler() -> impl IntoResponse {
    let ws_url = std::env::var("SLATEBOARD_WS_URL").unwrap_or_default();
    let encoded = serde_json::to_string(&ws_url).unwrap_or_else(|_| "\"\"".to_string());
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        format!("window.SLATEBOARD_WS_URL = {encoded};\n"),
    )
}

pub async fn ws_handler(
    Path(channel_name): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let channel_name = match normalize_channel_name(&channel_name) {
        Some(name) => name,
        None => return StatusCode::NOT_FOUND.into_response(),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, channel_name))
}

async fn handle_socket(socket: WebSocket, state: AppState, channel_name: String) {
    let (mut socket_sender, mut socket_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();
    let connection_id = Uuid::new_v4();

    let channel = get_or_create_channel(&state, &channel_name).await;
    {
        let mut channel = channel.write().await;
        channel.peers.insert(connection_id, tx);
        info!(
            "ws connected channel={channel_name} conn={connection_id} peers={}",
            channel.peers.len()
        );
    }

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Ok(payload) = serde_json::to_string(&frame) {
                if socket_sender.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
        }
    });

    while let Some(Ok(message)) = socket_receiver.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => apply_client_frame(&channel, connection_id, frame).await,
                Err(error) => debug!("ignoring malformed frame: {error}"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    let roster = {
        let mut channel_guard = channel.write().await;
        channel_guard.peers.remove(&connection_id);
        let had_presence = channel_guard.presence.remove(&connection_id).is_some();
        info!(
            "ws disconnected channel={channel_name} conn={connection_id} peers={}",
            channel_guard.peers.len()
        );
        had_presence.then(|| channel_guard.roster())
    };
    if let Some(roster) = roster {
        broadcast_all(&channel, ServerFrame::PresenceSync { peers: roster }).await;
    }
    send_task.abort();
    drop_if_empty(&state, &channel_name, &channel).await;
}

async fn apply_client_frame(channel: &Arc<RwLock<Channel>>, sender: Uuid, frame: ClientFrame) {
    match frame {
        // Best-effort fan-out to every other subscriber; the sender never
        // hears its own broadcasts.
        ClientFrame::Broadcast { event, payload } => {
            broadcast_except(channel, sender, ServerFrame::Broadcast { event, payload }).await;
        }
        ClientFrame::Track { meta } => {
            let roster = {
                let mut channel = channel.write().await;
                channel.presence.insert(sender, meta);
                channel.roster()
            };
            broadcast_all(channel, ServerFrame::PresenceSync { peers: roster }).await;
        }
    }
}

pub async fn broadcast_except(channel: &Arc<RwLock<Channel>>, sender: Uuid, frame: ServerFrame) {
    let mut stale = Vec::new();
    {
        let channel = channel.read().await;
        for (id, tx) in channel.peers.iter() {
            if *id == sender {
                continue;
            }
            if tx.send(frame.clone()).is_err() {
                stale.push(*id);
            }
        }
    }
    prune(channel, stale).await;
}

pub async fn broadcast_all(channel: &Arc<RwLock<Channel>>, frame: ServerFrame) {
    let mut stale = Vec::new();
    {
        let channel = channel.read().await;
        for (id, tx) in channel.peers.iter() {
            if tx.send(frame.clone()).is_err() {
                stale.push(*id);
            }
        }
    }
    prune(channel, stale).await;
}

async fn prune(channel: &Arc<RwLock<Channel>>, stale: Vec<Uuid>) {
    if stale.is_empty() {
        return;
    }
    let mut channel = channel.write().await;
    for id in stale {
        channel.peers.remove(&id);
        channel.presence.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use slateboard_shared::messages::{PresenceMeta, Role};

    async fn peer(
        channel: &Arc<RwLock<Channel>>,
    ) -> (Uuid, mpsc::UnboundedReceiver<ServerFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        channel.write().await.peers.insert(id, tx);
        (id, rx)
    }

    #[tokio::test]
    async fn broadcast_skips_the_sender() {
        let channel = Arc::new(RwLock::new(Channel::default()));
        let (sender, mut sender_rx) = peer(&channel).await;
        let (_, mut other_rx) = peer(&channel).await;

        apply_client_frame(
            &channel,
            sender,
            ClientFrame::Broadcast {
                event: "draw_batch".to_string(),
                payload: json!({"username": "ada", "batch": []}),
            },
        )
        .await;

        assert!(sender_rx.try_recv().is_err());
        match other_rx.try_recv() {
            Ok(ServerFrame::Broadcast { event, .. }) => assert_eq!(event, "draw_batch"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn track_fans_presence_to_everyone() {
        let channel = Arc::new(RwLock::new(Channel::default()));
        let (tracker, mut tracker_rx) = peer(&channel).await;
        let (_, mut other_rx) = peer(&channel).await;

        apply_client_frame(
            &channel,
            tracker,
            ClientFrame::Track {
                meta: PresenceMeta {
                    role: Role::Student,
                    username: "ada".to_string(),
                },
            },
        )
        .await;

        for rx in [&mut tracker_rx, &mut other_rx] {
            match rx.try_recv() {
                Ok(ServerFrame::PresenceSync { peers }) => {
                    assert_eq!(peers.len(), 1);
                    assert_eq!(peers[0].username, "ada");
                }
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn dead_peers_are_pruned_on_fanout() {
        let channel = Arc::new(RwLock::new(Channel::default()));
        let (sender, _sender_rx) = peer(&channel).await;
        let (dead, dead_rx) = peer(&channel).await;
        drop(dead_rx);

        broadcast_except(
            &channel,
            sender,
            ServerFrame::Broadcast {
                event: "next_question".to_string(),
                payload: json!({}),
            },
        )
        .await;

        let channel = channel.read().await;
        assert!(!channel.peers.contains_key(&dead));
        assert!(channel.peers.contains_key(&sender));
    }
}
