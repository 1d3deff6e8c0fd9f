//! Registry of live connections.
//!
//! Holds at most one connection per network origin. Registering a second
//! connection from the same origin evicts the first.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::connection::Connection;

/// Authoritative set of registered connections, keyed by connection id.
pub struct ConnectionRegistry {
    members: RwLock<HashMap<u64, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            members: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection.
    ///
    /// Any member sharing the connection's origin is removed and signalled to
    /// close within the same critical section, and returned.
    pub async fn register(&self, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        let mut members = self.members.write().await;

        let previous = members
            .values()
            .find(|c| c.origin() == conn.origin() && c.id() != conn.id())
            .map(|c| c.id());
        let evicted = previous.and_then(|id| members.remove(&id));
        if let Some(ref old) = evicted {
            old.evict();
            tracing::info!(
                origin = %old.origin(),
                evicted = %old.username(),
                replacement = %conn.username(),
                "Evicted previous connection from same origin"
            );
        }

        members.insert(conn.id(), conn);
        evicted
    }

    /// Remove a connection.
    ///
    /// Returns true if it was registered. Removing twice is a no-op.
    pub async fn unregister(&self, conn: &Connection) -> bool {
        self.members.write().await.remove(&conn.id()).is_some()
    }

    /// All registered connections, in registration order.
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        let mut members: Vec<_> = self.members.read().await.values().cloned().collect();
        members.sort_by_key(|c| c.id());
        members
    }

    /// Whether any registered connection comes from `origin`.
    pub async fn has_origin(&self, origin: &str) -> bool {
        self.members
            .read()
            .await
            .values()
            .any(|c| c.origin() == origin)
    }

    /// Whether the given connection is registered.
    pub async fn contains(&self, conn: &Connection) -> bool {
        self.members.read().await.contains_key(&conn.id())
    }

    /// Number of registered connections.
    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
