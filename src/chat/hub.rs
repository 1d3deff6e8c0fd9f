//! Chat hub: joins, departures and posting.
//!
//! The hub ties the registry, history, reconnect tracker, broadcaster and
//! presence publisher together. Connection handlers only talk to the hub.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use super::broadcaster::Broadcaster;
use super::connection::Connection;
use super::grace::ReconnectGrace;
use super::log::MessageLog;
use super::message::ChatMessage;
use super::presence::PresencePublisher;
use super::registry::ConnectionRegistry;
use crate::config::Config;
use crate::datetime::clock_now;
use crate::Result;

/// Timing knobs for the hub.
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// How long a "left" notice waits for a same-origin reconnect.
    pub leave_delay: Duration,
    /// How recent a disconnect must be for a rejoin to skip the "joined" notice.
    pub rejoin_window: Duration,
    /// Capacity of the broadcast queue.
    pub queue_capacity: usize,
    /// Timezone for server timestamps.
    pub timezone: String,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for HubSettings {
    fn from(config: &Config) -> Self {
        Self {
            leave_delay: config.relay.leave_delay(),
            rejoin_window: config.relay.rejoin_window(),
            queue_capacity: config.relay.queue_capacity,
            timezone: config.server.timezone.clone(),
        }
    }
}

/// Result of a successful join.
#[derive(Debug)]
pub struct JoinOutcome {
    /// Same-origin connection that was replaced, if any.
    pub evicted: Option<Arc<Connection>>,
    /// True if the join continued a recent session and no notice was posted.
    pub reconnect: bool,
    /// Number of history messages replayed.
    pub replayed: usize,
}

/// Shared chat state.
pub struct ChatHub {
    registry: Arc<ConnectionRegistry>,
    log: Arc<MessageLog>,
    grace: ReconnectGrace,
    presence: PresencePublisher,
    broadcaster: Broadcaster,
    settings: HubSettings,
}

impl ChatHub {
    /// Create a hub around `log` and start its broadcaster.
    pub fn start(log: MessageLog, settings: HubSettings) -> (Arc<Self>, JoinHandle<()>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let (broadcaster, handle) =
            Broadcaster::spawn(Arc::clone(&registry), settings.queue_capacity.max(1));

        let hub = Arc::new(Self {
            presence: PresencePublisher::new(Arc::clone(&registry)),
            registry,
            log: Arc::new(log),
            grace: ReconnectGrace::new(),
            broadcaster,
            settings,
        });
        (hub, handle)
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn log(&self) -> &Arc<MessageLog> {
        &self.log
    }

    pub fn grace(&self) -> &ReconnectGrace {
        &self.grace
    }

    pub fn presence(&self) -> &PresencePublisher {
        &self.presence
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    /// Current server clock, as stamped on messages.
    pub fn now(&self) -> String {
        clock_now(&self.settings.timezone)
    }

    /// Log a message and queue it for broadcast.
    pub async fn post(&self, msg: ChatMessage) -> Result<()> {
        self.log.append(msg.clone()).await;
        self.broadcaster.enqueue(msg).await
    }

    /// Bring a handshaken connection online.
    ///
    /// The connection's write lock is held from registration until the history
    /// replay ends, so broadcasts addressed to it queue up behind the replay.
    pub async fn join(&self, conn: &Arc<Connection>) -> JoinOutcome {
        let reconnect = self
            .grace
            .consume_if_recent(
                conn.origin(),
                conn.username(),
                Instant::now(),
                self.settings.rejoin_window,
            )
            .await;

        let (evicted, replayed) = {
            let mut writer = conn.writer().await;
            let evicted = self.registry.register(Arc::clone(conn)).await;

            // Snapshot after registering: a message in flight may arrive twice, never zero times
            let history = self.log.snapshot_all().await;
            let mut replayed = 0;
            for msg in &history {
                if let Err(e) = writer.send_json(msg).await {
                    tracing::warn!(
                        origin = %conn.origin(),
                        username = %conn.username(),
                        error = %e,
                        "History replay failed"
                    );
                    conn.close();
                    break;
                }
                replayed += 1;
            }
            (evicted, replayed)
        };

        tracing::info!(
            origin = %conn.origin(),
            username = %conn.username(),
            reconnect,
            replayed,
            "User joined"
        );

        if !reconnect {
            let notice = ChatMessage::joined(conn.username(), self.now());
            if let Err(e) = self.post(notice).await {
                tracing::warn!(error = %e, "Failed to post join notice");
            }
        }

        self.presence.publish().await;

        JoinOutcome {
            evicted,
            reconnect,
            replayed,
        }
    }

    /// Take a connection offline.
    ///
    /// Safe to call more than once; only the first call has any effect.
    /// Returns the deferred "left" check, if one was scheduled.
    pub async fn leave(self: &Arc<Self>, conn: &Connection) -> Option<JoinHandle<()>> {
        if !conn.begin_teardown() {
            return None;
        }

        self.registry.unregister(conn).await;
        conn.shutdown().await;

        let pending = if conn.is_evicted() {
            tracing::debug!(
                origin = %conn.origin(),
                username = %conn.username(),
                "Replaced connection closed"
            );
            None
        } else {
            tracing::info!(
                origin = %conn.origin(),
                username = %conn.username(),
                "User disconnected"
            );
            self.grace
                .mark_disconnected(conn.origin(), conn.username(), Instant::now())
                .await;
            Some(self.schedule_leave_notice(
                conn.origin().to_string(),
                conn.username().to_string(),
            ))
        };

        self.presence.publish().await;
        pending
    }

    /// After `leave_delay`, post a "left" notice unless the origin is back.
    ///
    /// Any live connection from the origin suppresses the notice, whatever its
    /// username.
    fn schedule_leave_notice(self: &Arc<Self>, origin: String, username: String) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(hub.settings.leave_delay).await;

            if hub.registry.has_origin(&origin).await {
                tracing::debug!(%origin, %username, "Origin reconnected, leave notice suppressed");
                return;
            }

            let notice = ChatMessage::left(&username, hub.now());
            if let Err(e) = hub.post(notice).await {
                tracing::warn!(error = %e, "Failed to post leave notice");
            }
        })
    }

    /// Drop reconnect records older than the rejoin window.
    pub async fn sweep_disconnects(&self) -> usize {
        self.grace
            .sweep(Instant::now(), self.settings.rejoin_window)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::connection::test_support::{broken_connection, connection, Inbox};
    use crate::chat::MessageKind;
    use tempfile::TempDir;

    fn test_settings() -> HubSettings {
        HubSettings {
            leave_delay: Duration::from_millis(50),
            rejoin_window: Duration::from_secs(5),
            queue_capacity: 16,
            timezone: "UTC".to_string(),
        }
    }

    fn setup_hub() -> (TempDir, Arc<ChatHub>) {
        let temp_dir = TempDir::new().unwrap();
        let log = MessageLog::new(temp_dir.path().join("chat_history.json"));
        let (hub, _handle) = ChatHub::start(log, test_settings());
        (temp_dir, hub)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    fn system_contents(log: &[ChatMessage]) -> Vec<String> {
        log.iter()
            .filter(|m| m.kind == MessageKind::System)
            .map(|m| m.content.clone())
            .collect()
    }

    fn chat_frames(inbox: &mut Inbox) -> Vec<serde_json::Value> {
        inbox
            .drain()
            .into_iter()
            .filter(|f| f["type"] != "users")
            .collect()
    }

    #[tokio::test]
    async fn test_first_join_posts_notice() {
        let (_dir, hub) = setup_hub();
        let (alice, mut inbox) = connection("10.0.0.1", "alice");

        let outcome = hub.join(&alice).await;
        assert!(!outcome.reconnect);
        assert!(outcome.evicted.is_none());
        assert_eq!(outcome.replayed, 0);
        settle().await;

        let log = hub.log().snapshot_all().await;
        assert_eq!(system_contents(&log), vec!["alice 加入了聊天室"]);

        let frames = inbox.drain();
        assert!(frames.iter().any(|f| f["type"] == "users"));
        assert!(frames.iter().any(|f| f["content"] == "alice 加入了聊天室"));
    }

    #[tokio::test]
    async fn test_join_replays_history_in_order() {
        let (_dir, hub) = setup_hub();
        for i in 0..3 {
            hub.log()
                .append(ChatMessage::text("bob", format!("m{i}"), "09:00:00"))
                .await;
        }

        let (alice, mut inbox) = connection("10.0.0.1", "alice");
        let outcome = hub.join(&alice).await;
        assert_eq!(outcome.replayed, 3);
        settle().await;

        let frames = chat_frames(&mut inbox);
        let contents: Vec<_> = frames.iter().map(|f| f["content"].clone()).collect();
        assert_eq!(contents[..3], ["m0", "m1", "m2"]);
        // Join notice arrives after the replay
        assert_eq!(frames[3]["content"], "alice 加入了聊天室");
    }

    #[tokio::test]
    async fn test_text_not_echoed_to_author() {
        let (_dir, hub) = setup_hub();
        let (alice, mut alice_inbox) = connection("10.0.0.1", "alice");
        let (bob, mut bob_inbox) = connection("10.0.0.2", "bob");
        hub.join(&alice).await;
        hub.join(&bob).await;
        settle().await;
        alice_inbox.drain();
        bob_inbox.drain();

        hub.post(ChatMessage::text("alice", "hi", hub.now()))
            .await
            .unwrap();
        settle().await;

        assert!(chat_frames(&mut alice_inbox).is_empty());
        let frames = chat_frames(&mut bob_inbox);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["content"], "hi");
    }

    #[tokio::test]
    async fn test_leave_posts_notice_after_delay() {
        let (_dir, hub) = setup_hub();
        let (alice, _alice_inbox) = connection("10.0.0.1", "alice");
        let (bob, mut bob_inbox) = connection("10.0.0.2", "bob");
        hub.join(&alice).await;
        hub.join(&bob).await;
        settle().await;
        bob_inbox.drain();

        let pending = hub.leave(&alice).await.unwrap();
        assert!(alice.is_closed());
        assert!(!hub.registry().contains(&alice).await);
        assert!(hub.grace().get("10.0.0.1").await.is_some());

        // Nothing yet
        let log = hub.log().snapshot_all().await;
        assert!(!system_contents(&log).iter().any(|c| c.contains("离开")));

        pending.await.unwrap();
        settle().await;

        let log = hub.log().snapshot_all().await;
        let leaves: Vec<_> = system_contents(&log)
            .into_iter()
            .filter(|c| c.contains("离开"))
            .collect();
        assert_eq!(leaves, vec!["alice 离开了聊天室"]);

        let frames = chat_frames(&mut bob_inbox);
        assert!(frames.iter().any(|f| f["content"] == "alice 离开了聊天室"));
    }

    #[tokio::test]
    async fn test_quick_reconnect_posts_nothing() {
        let (_dir, hub) = setup_hub();
        let (alice, _inbox) = connection("10.0.0.1", "alice");
        hub.join(&alice).await;
        settle().await;
        let before = hub.log().len().await;

        let pending = hub.leave(&alice).await.unwrap();
        let (alice2, _inbox2) = connection("10.0.0.1", "alice");
        let outcome = hub.join(&alice2).await;
        assert!(outcome.reconnect);
        assert!(hub.grace().is_empty().await);

        pending.await.unwrap();
        settle().await;

        assert_eq!(hub.log().len().await, before);
    }

    #[tokio::test]
    async fn test_other_user_from_same_origin_suppresses_leave() {
        let (_dir, hub) = setup_hub();
        let (alice, _a) = connection("10.0.0.1", "alice");
        hub.join(&alice).await;

        let pending = hub.leave(&alice).await.unwrap();
        let (bob, _b) = connection("10.0.0.1", "bob");
        let outcome = hub.join(&bob).await;
        assert!(!outcome.reconnect);

        pending.await.unwrap();
        settle().await;

        let log = hub.log().snapshot_all().await;
        assert_eq!(
            system_contents(&log),
            vec!["alice 加入了聊天室", "bob 加入了聊天室"]
        );
    }

    #[tokio::test]
    async fn test_same_origin_eviction() {
        let (_dir, hub) = setup_hub();
        let (alice, _a) = connection("10.0.0.1", "alice");
        let (bob, _b) = connection("10.0.0.1", "bob");
        hub.join(&alice).await;

        let outcome = hub.join(&bob).await;
        let evicted = outcome.evicted.unwrap();
        assert_eq!(evicted.id(), alice.id());
        assert!(alice.is_closed());

        // The evicted handler's teardown records no departure
        assert!(hub.leave(&alice).await.is_none());
        assert!(hub.grace().is_empty().await);

        let users = hub.presence().online_users().await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "bob");
        assert!(hub.registry().contains(&bob).await);
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let (_dir, hub) = setup_hub();
        let (alice, _a) = connection("10.0.0.1", "alice");
        hub.join(&alice).await;

        assert!(hub.leave(&alice).await.is_some());
        assert!(hub.leave(&alice).await.is_none());
        assert!(hub.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_presence_sent_on_leave() {
        let (_dir, hub) = setup_hub();
        let (alice, _a) = connection("10.0.0.1", "alice");
        let (bob, mut bob_inbox) = connection("10.0.0.2", "bob");
        hub.join(&alice).await;
        hub.join(&bob).await;
        settle().await;
        bob_inbox.drain();

        hub.leave(&alice).await;

        let frames = bob_inbox.drain();
        let users = frames
            .iter()
            .rev()
            .find(|f| f["type"] == "users")
            .unwrap();
        assert_eq!(users["users"].as_array().unwrap().len(), 1);
        assert_eq!(users["users"][0]["username"], "bob");
    }

    #[tokio::test]
    async fn test_sweep_disconnects() {
        let (_dir, hub) = setup_hub();
        hub.grace()
            .mark_disconnected("10.0.0.9", "old", Instant::now() - Duration::from_secs(10))
            .await;
        hub.grace()
            .mark_disconnected("10.0.0.8", "new", Instant::now())
            .await;

        assert_eq!(hub.sweep_disconnects().await, 1);
        assert_eq!(hub.grace().len().await, 1);
    }

    #[tokio::test]
    async fn test_replay_stops_on_write_error() {
        let (_dir, hub) = setup_hub();
        for i in 0..3 {
            hub.log()
                .append(ChatMessage::text("bob", format!("m{i}"), "09:00:00"))
                .await;
        }

        let alice = broken_connection("10.0.0.1", "alice");
        let outcome = hub.join(&alice).await;
        assert_eq!(outcome.replayed, 0);
        assert!(alice.is_closed());
        settle().await;

        // The broadcaster drops the dead member on its next write
        assert!(!hub.registry().contains(&alice).await);

        // The owning handler still runs teardown and records the departure
        hub.leave(&alice).await.unwrap().await.unwrap();
        assert!(hub.grace().get("10.0.0.1").await.is_some());
    }
}
