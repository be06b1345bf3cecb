use super::state::{AppState, ScenePeer};
use crate::map::Scene;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Messages pushed to scene-feed clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SceneMessage {
    /// Full scene snapshot, sent on connect and after every revision
    Scene { scene: Scene },
    Pong,
    Error { message: String },
}

/// Messages accepted from scene-feed clients
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SceneRequest {
    Ping,
    /// Ask for the current snapshot without waiting for a revision
    Resync,
}

/// Configuration for scene-feed connections
pub struct WsConfig {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
        }
    }
}

/// GET /ws/scene - WebSocket upgrade for live scene snapshots
pub async fn scene_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    info!("New scene connection: {}", connection_id);

    let (tx, mut rx) = mpsc::channel::<SceneMessage>(32);

    {
        let now = Instant::now();
        let mut connections = state.connections.write().await;
        connections.insert(
            connection_id,
            ScenePeer {
                id: connection_id,
                connected_at: now,
                last_seen: now,
                last_revision: 0,
            },
        );
        metrics::gauge!("fieldwatch_ws_connections_active").set(connections.len() as f64);
    }

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize scene message: {}", e);
                }
            }
        }
    });

    // Revisions landing during a pending send coalesce into one snapshot
    let push_tx = tx.clone();
    let push_state = state.clone();
    let push_task = tokio::spawn(async move {
        let mut revisions = push_state.session.subscribe();
        loop {
            revisions.borrow_and_update();
            let scene = push_state.session.scene().await;
            let revision = scene.revision;
            if push_tx.send(SceneMessage::Scene { scene }).await.is_err() {
                break;
            }
            if let Some(peer) = push_state.connections.write().await.get_mut(&connection_id) {
                peer.last_revision = revision;
            }
            if revisions.changed().await.is_err() {
                break;
            }
        }
    });

    let ping_state = state.clone();
    let mut ping_task = tokio::spawn(async move {
        let config = WsConfig::default();
        let mut interval = tokio::time::interval(config.ping_interval);
        loop {
            interval.tick().await;
            let timed_out = {
                let connections = ping_state.connections.read().await;
                connections.get(&connection_id).is_none_or(|peer| {
                    peer.last_seen.elapsed() > config.ping_timeout + config.ping_interval
                })
            };
            if timed_out {
                debug!("Scene connection {} timed out", connection_id);
                break;
            }
        }
    });

    loop {
        let result = tokio::select! {
            next = ws_receiver.next() => match next {
                Some(result) => result,
                None => break,
            },
            _ = &mut ping_task => break,
        };

        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                error!("WebSocket error for {}: {}", connection_id, e);
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                touch(&state, connection_id).await;
                match serde_json::from_str::<SceneRequest>(&text) {
                    Ok(SceneRequest::Ping) => {
                        let _ = tx.send(SceneMessage::Pong).await;
                    }
                    Ok(SceneRequest::Resync) => {
                        let scene = state.session.scene().await;
                        let _ = tx.send(SceneMessage::Scene { scene }).await;
                    }
                    Err(e) => {
                        warn!("Failed to parse scene request: {}", e);
                        let _ = tx
                            .send(SceneMessage::Error {
                                message: format!("Invalid message format: {}", e),
                            })
                            .await;
                    }
                }
            }
            Message::Pong(_) => touch(&state, connection_id).await,
            Message::Ping(_) | Message::Binary(_) => {}
            Message::Close(_) => {
                info!("Client {} requested close", connection_id);
                break;
            }
        }
    }

    ping_task.abort();
    push_task.abort();
    send_task.abort();

    {
        let mut connections = state.connections.write().await;
        connections.remove(&connection_id);
        metrics::gauge!("fieldwatch_ws_connections_active").set(connections.len() as f64);
    }

    info!("Scene connection closed: {}", connection_id);
}

async fn touch(state: &AppState, connection_id: Uuid) {
    if let Some(peer) = state.connections.write().await.get_mut(&connection_id) {
        peer.last_seen = Instant::now();
    }
}
