//! A registered client connection.
//!
//! The write half of the socket sits behind a mutex so that the broadcaster,
//! the presence publisher and the history replay never interleave frames.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, Notify};

use crate::{RelayError, Result};

/// Boxed write half of a WebSocket.
pub type WsSink = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A client connection after a successful handshake.
pub struct Connection {
    /// Process-unique handle, increasing with registration order.
    id: u64,
    /// Network origin (client IP).
    origin: String,
    /// Identity declared in the handshake.
    username: String,
    sink: Mutex<WsSink>,
    closed: AtomicBool,
    evicted: AtomicBool,
    torn_down: AtomicBool,
    close_notify: Notify,
}

impl Connection {
    /// Wrap the write half of a socket.
    pub fn new<S>(origin: impl Into<String>, username: impl Into<String>, sink: S) -> Self
    where
        S: Sink<Message, Error = axum::Error> + Send + 'static,
    {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            origin: origin.into(),
            username: username.into(),
            sink: Mutex::new(Box::pin(sink)),
            closed: AtomicBool::new(false),
            evicted: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            close_notify: Notify::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Acquire the write lock. Frames sent through the guard go out back to back.
    pub async fn writer(&self) -> ConnectionWriter<'_> {
        ConnectionWriter {
            sink: self.sink.lock().await,
            closed: &self.closed,
        }
    }

    /// Serialize `value` and send it as one text frame.
    pub async fn send_json<T: Serialize>(&self, value: &T) -> Result<()> {
        self.writer().await.send_json(value).await
    }

    /// Signal the owning read loop to stop. Does not block.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.close_notify.notify_waiters();
        }
    }

    /// Close because another connection from the same origin replaced this one.
    pub(crate) fn evict(&self) {
        self.evicted.store(true, Ordering::Release);
        self.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether this connection was replaced by a same-origin registration.
    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }

    /// Claim the teardown. Returns true only for the first caller.
    pub(crate) fn begin_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::AcqRel)
    }

    /// Resolves once [`Connection::close`] has been called.
    pub async fn closed(&self) {
        let notified = self.close_notify.notified();
        if self.is_closed() {
            return;
        }
        notified.await;
    }

    /// Send a close frame and shut the write half. Errors are ignored.
    pub async fn shutdown(&self) {
        self.close();
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("username", &self.username)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Exclusive write access to one connection.
pub struct ConnectionWriter<'a> {
    sink: MutexGuard<'a, WsSink>,
    closed: &'a AtomicBool,
}

impl ConnectionWriter<'_> {
    /// Serialize `value` and send it as one text frame.
    pub async fn send_json<T: Serialize>(&mut self, value: &T) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RelayError::Transport("connection closed".to_string()));
        }
        let json = serde_json::to_string(value)?;
        self.sink.send(Message::Text(json.into())).await?;
        Ok(())
    }
}
