use std::sync::Arc;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::Query,
    extract::State,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    routing::get,
};
use colored::*;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Relay server settings. CLI flags override the defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Per-room broadcast capacity. Receivers that lag past it skip
    /// frames; the bus is best-effort.
    pub room_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3900,
            room_capacity: 256,
        }
    }
}

/// A frame in flight through a room, tagged with the connection that
/// published it so it is never echoed back to its sender.
struct Envelope {
    conn_id: Uuid,
    text: String,
}

type Room = broadcast::Sender<Arc<Envelope>>;

#[derive(Clone)]
pub struct AppState {
    rooms: Arc<DashMap<String, Room>>,
    room_capacity: usize,
}

pub async fn serve(config: ServerConfig) -> Result<()> {
    let state = AppState {
        rooms: Arc::new(DashMap::new()),
        room_capacity: config.room_capacity,
    };

    let app = Router::new()
        .route("/", get(|| async { "Relay Channel Server" }))
        .route("/health", get(|| async { Json("OK") }))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let addr = format!("{}:{}", config.bind, config.port);
    println!(
        "{} Relay running at {}",
        "✓".green(),
        format!("ws://{}/ws", addr).bright_blue()
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Deserialize)]
struct WsQuery {
    channel: String,
}

async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(state, socket, query.channel))
}

async fn handle_ws(state: AppState, socket: WebSocket, channel: String) {
    let conn_id = Uuid::new_v4();
    // Subscribe while the entry guard is held: a departing connection's
    // receiver_count check takes the same shard lock, so it can never
    // observe the room empty between insert and subscribe and strand this
    // peer on an evicted sender.
    let (room, mut rx) = {
        let entry = state
            .rooms
            .entry(channel.clone())
            .or_insert_with(|| broadcast::channel(state.room_capacity).0);
        (entry.clone(), entry.subscribe())
    };

    let (mut sender, mut receiver) = socket.split();

    tracing::info!(%channel, %conn_id, "peer joined");

    // Forward room traffic from other connections to this client.
    let forward_channel = channel.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(env) => {
                    if env.conn_id == conn_id {
                        continue;
                    }
                    if sender.send(Message::Text(env.text.clone().into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(channel = %forward_channel, %conn_id, skipped, "receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Publish frames from this client into the room. Only well-formed
    // JSON is relayed; anything else is logged and dropped.
    let recv_room = room.clone();
    let recv_channel = channel.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let text: String = text.to_string();
                    if serde_json::from_str::<serde_json::Value>(&text).is_ok() {
                        let _ = recv_room.send(Arc::new(Envelope { conn_id, text }));
                    } else {
                        tracing::warn!(
                            kind = "malformed_message",
                            channel = %recv_channel,
                            %conn_id,
                            "dropping non-JSON frame"
                        );
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Binary(_)) | Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Err(_) => break,
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::info!(%channel, %conn_id, "peer left");

    // Drop the empty room once its last subscriber is gone.
    drop(room);
    state
        .rooms
        .remove_if(&channel, |_, tx| tx.receiver_count() == 0);
}
