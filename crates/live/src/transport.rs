// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Transport abstraction for the realtime connection.
//!
//! A [`Connector`] dials a URL and hands back a [`Link`]: a pair of channels
//! carrying [`RealtimeEvent`] frames in each direction. The connection
//! manager never touches sockets directly, which enables:
//! - Real WebSocket connections for production ([`WebSocketConnector`])
//! - In-memory links for unit testing
//!
//! Dropping the outbound sender closes the link.

use std::future::Future;
use std::pin::Pin;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use pnr_core::RealtimeEvent;

/// Error type for transport operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// The handshake did not finish within the connect timeout.
    #[error("connection attempt timed out")]
    Timeout,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Something that happened on an open link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A frame from the server.
    Message(RealtimeEvent),
    /// The link is gone; the string says why.
    Closed(String),
}

/// An open bidirectional connection.
#[derive(Debug)]
pub struct Link {
    /// Identifier of this connection, for status display.
    pub connection_id: String,
    /// Frames to send to the server.
    pub outbound: mpsc::UnboundedSender<RealtimeEvent>,
    /// Frames and lifecycle events from the server, in arrival order.
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Future returned by [`Connector::connect`].
pub type ConnectFuture = Pin<Box<dyn Future<Output = TransportResult<Link>> + Send + 'static>>;

/// Dials the realtime server.
///
/// This trait abstracts over the actual transport mechanism, allowing
/// for easy testing with in-memory implementations.
pub trait Connector: Send + Sync {
    /// Opens a new link to `url`.
    fn connect(&self, url: &str) -> ConnectFuture;
}

/// WebSocket connector using tokio-tungstenite.
///
/// Each link is served by a background pump task that bridges the socket
/// and the link channels. Text frames are JSON [`RealtimeEvent`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a new WebSocket connector.
    pub fn new() -> Self {
        WebSocketConnector
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self, url: &str) -> ConnectFuture {
        let url = url.to_string();
        Box::pin(async move {
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

            let (outbound, outbound_rx) = mpsc::unbounded_channel();
            let (inbound_tx, inbound) = mpsc::unbounded_channel();
            let connection_id = uuid::Uuid::new_v4().to_string();

            debug!(%url, %connection_id, "websocket open");
            tokio::spawn(pump(ws_stream, outbound_rx, inbound_tx));

            Ok(Link { connection_id, outbound, inbound })
        })
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Moves frames between the socket and the link channels until either side closes.
async fn pump(
    ws_stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<RealtimeEvent>,
    inbound: mpsc::UnboundedSender<LinkEvent>,
) {
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(event) = frame else {
                    // Link dropped by the client
                    let _ = sink.close().await;
                    return;
                };
                let json = match event.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(kind = %event.kind, error = %e, "dropping unserializable frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    let _ = inbound.send(LinkEvent::Closed(
                        TransportError::SendFailed(e.to_string()).to_string(),
                    ));
                    return;
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match RealtimeEvent::from_json(&text) {
                        Ok(event) => {
                            if inbound.send(LinkEvent::Message(event)).is_err() {
                                let _ = sink.close().await;
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "ignoring malformed frame");
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = inbound.send(LinkEvent::Closed(
                            TransportError::ConnectionClosed.to_string(),
                        ));
                        return;
                    }
                    Some(Ok(_)) => {
                        // Ignore ping/pong and binary frames
                    }
                    Some(Err(e)) => {
                        let _ = inbound.send(LinkEvent::Closed(
                            TransportError::ReceiveFailed(e.to_string()).to_string(),
                        ));
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
