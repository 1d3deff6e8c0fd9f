//! Online user list.

use std::collections::HashMap;
use std::sync::Arc;

use super::message::{UserInfo, UsersMessage};
use super::registry::ConnectionRegistry;

/// Pushes the online user list to every member.
///
/// Best effort: failed writes are logged and not retried. Cleanup of broken
/// connections is left to the broadcaster and the connection's own handler.
pub struct PresencePublisher {
    registry: Arc<ConnectionRegistry>,
}

impl PresencePublisher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// One entry per origin; the most recent registration wins.
    pub async fn online_users(&self) -> Vec<UserInfo> {
        let mut by_origin: HashMap<String, (u64, String)> = HashMap::new();
        for conn in self.registry.snapshot().await {
            let newer = by_origin
                .get(conn.origin())
                .map_or(true, |(id, _)| conn.id() > *id);
            if newer {
                by_origin.insert(
                    conn.origin().to_string(),
                    (conn.id(), conn.username().to_string()),
                );
            }
        }

        let mut users: Vec<_> = by_origin.into_iter().collect();
        users.sort_by_key(|(_, (id, _))| *id);
        users
            .into_iter()
            .map(|(origin, (_, username))| UserInfo { username, origin })
            .collect()
    }

    /// Send the current user list to every registered connection.
    ///
    /// Returns the number of successful writes.
    pub async fn publish(&self) -> usize {
        let frame = UsersMessage::new(self.online_users().await);
        let mut delivered = 0;

        for conn in self.registry.snapshot().await {
            match conn.send_json(&frame).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        origin = %conn.origin(),
                        username = %conn.username(),
                        error = %e,
                        "Failed to send user list"
                    );
                }
            }
        }

        delivered
    }
}
