// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket server implementation.
//!
//! Handles client connections, room membership, mutation replies and
//! broadcast fanout. Each connection keeps its own set of joined rooms;
//! room-scoped broadcasts only reach members.

use std::collections::HashSet;
use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use pnr_core::{update_id_of, EventKind, RealtimeEvent, RetryUpdate, RoomRequest, UpdateConfirmation};

use crate::state::{RelayState, ReplyMode};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Rejection reason sent in reject mode.
pub(crate) const REJECTION: &str = "Rejected by relay";

/// Run the WebSocket server on the given address.
pub async fn run(addr: SocketAddr, state: RelayState) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on: {}", addr);

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let state = state.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, state).await {
                error!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }
}

/// Handle a single WebSocket connection.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: RelayState,
) -> Result<(), BoxError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    info!("New WebSocket connection from: {}", peer_addr);

    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let mut broadcast_rx = state.subscribe();
    let mut session = Session { peer: peer_addr.to_string(), rooms: HashSet::new() };

    loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let replies = match handle_client_message(&text, &state, &mut session).await {
                            Ok(replies) => replies,
                            Err(e) => {
                                warn!("Bad message from {}: {}", peer_addr, e);
                                vec![RealtimeEvent::new(
                                    EventKind::SystemMessage,
                                    json!({ "error": e.to_string() }),
                                    state.now_ms(),
                                )]
                            }
                        };
                        for reply in replies {
                            ws_sink.send(Message::Text(reply.to_json()?.into())).await?;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} disconnected", peer_addr);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sink.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(_)) => {
                        // Ignore other message types (Binary, Pong, Frame)
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", peer_addr, e);
                        break;
                    }
                    None => {
                        info!("Client {} stream ended", peer_addr);
                        break;
                    }
                }
            }

            // Handle broadcast messages to send to client
            broadcast = broadcast_rx.recv() => {
                match broadcast {
                    Ok(msg) => {
                        if !session.receives(msg.room.as_deref()) {
                            continue;
                        }
                        let json = msg.event.to_json()?;
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            warn!("Failed to send broadcast to {}: {}", peer_addr, e);
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} lagged by {} messages", peer_addr, n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }

    info!("Connection closed: {}", peer_addr);
    Ok(())
}

/// Per-connection state.
pub(crate) struct Session {
    pub(crate) peer: String,
    pub(crate) rooms: HashSet<String>,
}

impl Session {
    fn receives(&self, room: Option<&str>) -> bool {
        room.is_none_or(|room| self.rooms.contains(room))
    }
}

/// Process a client message and return the direct replies.
pub(crate) async fn handle_client_message(
    text: &str,
    state: &RelayState,
    session: &mut Session,
) -> Result<Vec<RealtimeEvent>, BoxError> {
    let event = RealtimeEvent::from_json(text)?;
    debug!("Received {} from {}", event.kind, session.peer);

    match event.kind {
        EventKind::JoinRoom => {
            let RoomRequest { room_id } = event.payload()?;
            session.rooms.insert(room_id.clone());
            state.broadcast(Some(room_id.clone()), presence(state, &room_id, &session.peer, "joined"));
            Ok(Vec::new())
        }

        EventKind::LeaveRoom => {
            let RoomRequest { room_id } = event.payload()?;
            session.rooms.remove(&room_id);
            state.broadcast(Some(room_id.clone()), presence(state, &room_id, &session.peer, "left"));
            Ok(Vec::new())
        }

        EventKind::RetryUpdate => {
            let retry: RetryUpdate = event.payload()?;
            debug!("Retry {} of {}", retry.retry_count, retry.update_id);
            Ok(resolve_mutation(state, &retry.update_id, retry.data, None).await)
        }

        _ => {
            let Some(update_id) = update_id_of(&event.data) else {
                debug!("Ignoring {} without updateId", event.kind);
                return Ok(Vec::new());
            };
            let data = event.data.get("data").cloned().unwrap_or(Value::Null);
            let room = event.data.get("roomId").and_then(Value::as_str).map(str::to_string);
            Ok(resolve_mutation(state, update_id, data, room).await)
        }
    }
}

/// Answers a mutation according to the reply mode.
async fn resolve_mutation(
    state: &RelayState,
    update_id: &str,
    data: Value,
    room: Option<String>,
) -> Vec<RealtimeEvent> {
    let confirmation = match state.mode() {
        ReplyMode::Silent => {
            debug!("Leaving {} unanswered", update_id);
            return Vec::new();
        }
        ReplyMode::Reject => UpdateConfirmation::rejected(update_id, REJECTION),
        ReplyMode::Confirm => {
            if let Some(id) = data.get("id").and_then(Value::as_str) {
                state.store(id, data.clone()).await;
            }
            state.broadcast(room, RealtimeEvent::new(EventKind::PnrStatusUpdate, data, state.now_ms()));
            UpdateConfirmation::accepted(update_id)
        }
    };

    match serde_json::to_value(&confirmation) {
        Ok(payload) => vec![RealtimeEvent::new(EventKind::UpdateConfirmation, payload, state.now_ms())],
        Err(e) => {
            error!("Could not encode confirmation for {}: {}", update_id, e);
            Vec::new()
        }
    }
}

fn presence(state: &RelayState, room_id: &str, peer: &str, action: &str) -> RealtimeEvent {
    RealtimeEvent::new(
        EventKind::UserPresence,
        json!({ "roomId": room_id, "connectionId": peer, "action": action }),
        state.now_ms(),
    )
}
