//! Chat WebSocket handler.
//!
//! One task per socket drives the connection through
//! handshake, history replay, the read loop and teardown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};

use crate::chat::{ChatHub, ChatMessage, ClientMessage, Connection};
use crate::file::{decode_data_uri, UploadStore};
use crate::{RelayError, Result};

/// State for the WebSocket chat handler.
#[derive(Clone)]
pub struct ChatWsState {
    /// Shared chat hub.
    pub hub: Arc<ChatHub>,
    /// Where decoded images are written.
    pub uploads: Arc<UploadStore>,
    /// Inactivity bound for a socket.
    pub idle_timeout: Duration,
}

impl ChatWsState {
    /// Create a new chat WebSocket state.
    pub fn new(hub: Arc<ChatHub>, uploads: Arc<UploadStore>, idle_timeout: Duration) -> Self {
        Self {
            hub,
            uploads,
            idle_timeout,
        }
    }
}

/// WebSocket chat handler.
///
/// GET /ws
///
/// The first text frame must carry `{"username": "..."}`.
pub async fn chat_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ChatWsState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let origin = client_origin(&headers, peer.map(|ConnectInfo(addr)| addr));
    tracing::debug!(%origin, "WebSocket upgrade requested");

    ws.on_upgrade(move |socket| handle_socket(socket, state, origin))
}

/// Resolve the client's network origin.
///
/// Prefers `X-Real-IP`, then the first `X-Forwarded-For` entry, then the
/// peer address.
pub fn client_origin(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or_default().trim().to_string())
            .filter(|v| !v.is_empty())
    };

    header("x-real-ip")
        .or_else(|| header("x-forwarded-for"))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<ChatWsState>, origin: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let username = match read_identity(&mut ws_receiver, state.idle_timeout).await {
        Ok(username) => username,
        Err(e) => {
            tracing::debug!(%origin, error = %e, "Handshake failed");
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    let conn = Arc::new(Connection::new(origin, username, ws_sender));
    state.hub.join(&conn).await;

    read_loop(&state, &conn, &mut ws_receiver).await;

    state.hub.leave(&conn).await;
}

/// Wait for the identity frame and return the declared username.
async fn read_identity(
    receiver: &mut SplitStream<WebSocket>,
    idle_timeout: Duration,
) -> Result<String> {
    loop {
        let frame = tokio::time::timeout(idle_timeout, receiver.next())
            .await
            .map_err(|_| RelayError::Transport("handshake timed out".to_string()))?;

        match frame {
            Some(Ok(Message::Text(text))) => {
                let hello = ClientMessage::parse(&text)?;
                let username = hello.username.trim();
                if username.is_empty() {
                    return Err(RelayError::Protocol("empty username".to_string()));
                }
                return Ok(username.to_string());
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Binary(_))) => {
                return Err(RelayError::Protocol("binary identity frame".to_string()));
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(RelayError::Transport("closed during handshake".to_string()));
            }
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

/// Read frames until the socket closes, idles out, or the connection is closed
/// from elsewhere (eviction, failed broadcast).
async fn read_loop(
    state: &ChatWsState,
    conn: &Arc<Connection>,
    receiver: &mut SplitStream<WebSocket>,
) {
    loop {
        tokio::select! {
            _ = conn.closed() => {
                tracing::debug!(origin = %conn.origin(), username = %conn.username(), "Connection closed by server");
                break;
            }
            frame = tokio::time::timeout(state.idle_timeout, receiver.next()) => {
                match frame {
                    Err(_) => {
                        tracing::info!(origin = %conn.origin(), username = %conn.username(), "Idle timeout");
                        break;
                    }
                    Ok(Some(Ok(Message::Text(text)))) => {
                        match accept_frame(state, conn, &text).await {
                            Ok(msg) => {
                                if let Err(e) = state.hub.post(msg).await {
                                    tracing::warn!(error = %e, "Failed to post message");
                                }
                            }
                            Err(e) => {
                                tracing::warn!(
                                    origin = %conn.origin(),
                                    username = %conn.username(),
                                    error = %e,
                                    "Dropped message"
                                );
                            }
                        }
                    }
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                        tracing::debug!(origin = %conn.origin(), username = %conn.username(), "WebSocket closed by client");
                        break;
                    }
                    Ok(Some(Ok(Message::Binary(data)))) => {
                        tracing::debug!(
                            origin = %conn.origin(),
                            username = %conn.username(),
                            size = data.len(),
                            "Ignoring binary frame"
                        );
                    }
                    // Ping and pong only renew the idle timer
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(e))) => {
                        tracing::debug!(origin = %conn.origin(), error = %e, "WebSocket error");
                        break;
                    }
                }
            }
        }
    }
}

/// Turn a client frame into the message to log and broadcast.
///
/// The author is always the handshake identity and the time is always the
/// server clock. Image payloads are decoded and stored first.
async fn accept_frame(state: &ChatWsState, conn: &Connection, text: &str) -> Result<ChatMessage> {
    let frame = ClientMessage::parse(text)?;
    let time = state.hub.now();

    if frame.is_image() {
        let bytes = decode_data_uri(&frame.content)?;
        let path = state.uploads.store(&bytes, conn.username()).await?;
        tracing::debug!(username = %conn.username(), %path, size = bytes.len(), "Image stored");
        Ok(ChatMessage::image(conn.username(), path, time))
    } else {
        Ok(ChatMessage::text(conn.username(), frame.content, time))
    }
}
