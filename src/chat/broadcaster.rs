//! Broadcast fan-out.
//!
//! A single task drains a bounded FIFO queue and writes each message to every
//! registered connection. Producers wait while the queue is full, so a slow
//! fan-out throttles senders instead of dropping messages.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::connection::Connection;
use super::message::{ChatMessage, MessageKind};
use super::registry::ConnectionRegistry;
use crate::{RelayError, Result};

/// Producer handle for the broadcast queue.
#[derive(Clone)]
pub struct Broadcaster {
    sender: mpsc::Sender<ChatMessage>,
}

impl Broadcaster {
    /// Start the consumer task.
    pub fn spawn(registry: Arc<ConnectionRegistry>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let handle = tokio::spawn(run(registry, receiver));
        (Self { sender }, handle)
    }

    /// Queue a message for fan-out, waiting for space if the queue is full.
    pub async fn enqueue(&self, msg: ChatMessage) -> Result<()> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| RelayError::Transport("broadcaster stopped".to_string()))
    }
}

async fn run(registry: Arc<ConnectionRegistry>, mut receiver: mpsc::Receiver<ChatMessage>) {
    tracing::debug!("Broadcaster started");
    while let Some(msg) = receiver.recv().await {
        deliver(&registry, &msg).await;
    }
    tracing::debug!("Broadcaster stopped");
}

/// Whether `msg` should be written to `conn`.
///
/// Text messages are not echoed to their author; everything else goes to all.
pub fn should_deliver(msg: &ChatMessage, conn: &Connection) -> bool {
    msg.kind != MessageKind::Text || conn.username() != msg.username
}

/// Write one message to every eligible member. Returns the number of successful writes.
///
/// A member whose write fails is closed and unregistered; the others still
/// receive the message.
pub async fn deliver(registry: &ConnectionRegistry, msg: &ChatMessage) -> usize {
    let mut delivered = 0;

    for conn in registry.snapshot().await {
        if !should_deliver(msg, &conn) {
            continue;
        }
        match conn.send_json(msg).await {
            Ok(()) => delivered += 1,
            Err(e) => {
                tracing::warn!(
                    origin = %conn.origin(),
                    username = %conn.username(),
                    error = %e,
                    "Broadcast write failed, dropping connection"
                );
                conn.close();
                registry.unregister(&conn).await;
            }
        }
    }

    delivered
}
