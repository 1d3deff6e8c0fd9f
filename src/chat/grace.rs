//! Reconnect grace tracking.
//!
//! Remembers who disconnected from which origin so that a quick reconnect
//! (page reload, brief network loss) does not produce a leave/join pair.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// A disconnection that may still be undone by a reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentDisconnect {
    pub username: String,
    pub origin: String,
    pub disconnected_at: Instant,
}

/// Recent disconnections keyed by origin.
pub struct ReconnectGrace {
    entries: RwLock<HashMap<String, RecentDisconnect>>,
}

impl ReconnectGrace {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Record that `username` disconnected from `origin`. Replaces any earlier record.
    pub async fn mark_disconnected(&self, origin: &str, username: &str, now: Instant) {
        self.entries.write().await.insert(
            origin.to_string(),
            RecentDisconnect {
                username: username.to_string(),
                origin: origin.to_string(),
                disconnected_at: now,
            },
        );
    }

    /// Consume the record for `origin`.
    ///
    /// Returns true if it belonged to `username` and is younger than `window`.
    /// The origin's record is removed either way, since the origin is now
    /// registered again.
    pub async fn consume_if_recent(
        &self,
        origin: &str,
        username: &str,
        now: Instant,
        window: Duration,
    ) -> bool {
        match self.entries.write().await.remove(origin) {
            Some(entry) => {
                entry.username == username
                    && now.saturating_duration_since(entry.disconnected_at) < window
            }
            None => false,
        }
    }

    /// Drop records older than `window`. Returns how many were removed.
    pub async fn sweep(&self, now: Instant, window: Duration) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| now.saturating_duration_since(e.disconnected_at) <= window);
        before - entries.len()
    }

    /// Look up the record for `origin` without consuming it.
    pub async fn get(&self, origin: &str) -> Option<RecentDisconnect> {
        self.entries.read().await.get(origin).cloned()
    }

    /// Number of tracked records.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for ReconnectGrace {
    fn default() -> Self {
        Self::new()
    }
}
