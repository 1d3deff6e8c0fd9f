//! Test helpers for end-to-end relay tests.
//!
//! Provides TestServer and TestClient for driving the relay over real
//! WebSocket connections.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chatrelay::chat::ChatHub;
use chatrelay::{ChatServer, Config};

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Leave notice delay used by test servers.
pub const TEST_LEAVE_DELAY: Duration = Duration::from_millis(300);

/// A relay bound to a random local port, backed by a temporary directory.
pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: Arc<ChatHub>,
    pub config: Config,
    _dir: TempDir,
}

impl TestServer {
    /// Start a server with test timings.
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start a server with test timings, adjusted by `customize`.
    pub async fn start_with(customize: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().expect("create temp dir");

        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;
        config.server.idle_timeout_secs = 60;
        config.relay.leave_delay_ms = TEST_LEAVE_DELAY.as_millis() as u64;
        config.relay.rejoin_window_secs = 5;
        config.storage.data_dir = dir.path().join("data").display().to_string();
        config.storage.uploads_dir = dir.path().join("uploads").display().to_string();
        config.storage.static_dir = dir.path().join("static").display().to_string();
        customize(&mut config);

        let server = ChatServer::bind(&config).await.expect("bind server");
        let addr = server.local_addr().expect("local addr");
        let hub = server.hub();
        server.spawn();

        Self {
            addr,
            hub,
            config,
            _dir: dir,
        }
    }

    /// Connect and send the identity frame.
    pub async fn join(&self, origin: &str, username: &str) -> TestClient {
        let mut client = TestClient::connect(self.addr, origin).await;
        client.send(json!({ "username": username })).await;
        client
    }

    /// Directory holding stored uploads.
    pub fn uploads_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.storage.uploads_dir)
    }

    /// Wait until the hub holds exactly `count` connections.
    pub async fn wait_for_members(&self, count: usize) {
        let hub = Arc::clone(&self.hub);
        wait_until(move || {
            let hub = Arc::clone(&hub);
            async move { hub.registry().len().await == count }
        })
        .await;
    }

    /// Wait until a departure from `origin` has been recorded.
    pub async fn wait_for_departure(&self, origin: &str) {
        let hub = Arc::clone(&self.hub);
        let origin = origin.to_string();
        wait_until(move || {
            let hub = Arc::clone(&hub);
            let origin = origin.clone();
            async move { hub.grace().get(&origin).await.is_some() }
        })
        .await;
    }

    /// Contents of all system messages in the log.
    pub async fn system_log(&self) -> Vec<String> {
        self.hub
            .log()
            .snapshot_all()
            .await
            .into_iter()
            .filter(|m| m.username == "System")
            .map(|m| m.content)
            .collect()
    }
}

/// Poll `check` until it returns true or the default timeout elapses.
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + DEFAULT_TIMEOUT;
    while !check().await {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// WebSocket client speaking the relay's JSON frames.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Open a socket to `/ws`, presenting `origin` as the client IP.
    pub async fn connect(addr: SocketAddr, origin: &str) -> Self {
        let mut request = format!("ws://{addr}/ws")
            .into_client_request()
            .expect("build request");
        request
            .headers_mut()
            .insert("X-Real-IP", origin.parse().expect("header value"));

        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .expect("connect");
        Self { ws }
    }

    /// Send a JSON frame.
    pub async fn send(&mut self, frame: Value) {
        self.ws
            .send(Message::text(frame.to_string()))
            .await
            .expect("send frame");
    }

    /// Send a raw binary frame.
    pub async fn send_binary(&mut self, data: &[u8]) {
        self.ws
            .send(Message::binary(data.to_vec()))
            .await
            .expect("send frame");
    }

    /// Send a text chat message.
    pub async fn say(&mut self, content: &str) {
        self.send(json!({ "type": "message", "content": content }))
            .await;
    }

    /// Receive the next JSON frame.
    pub async fn recv(&mut self) -> Value {
        loop {
            let msg = timeout(DEFAULT_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("socket closed")
                .expect("socket error");
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).expect("json frame");
            }
        }
    }

    /// Receive frames until one matches `pred`, returning it.
    pub async fn recv_until(&mut self, pred: impl Fn(&Value) -> bool) -> Value {
        loop {
            let frame = self.recv().await;
            if pred(&frame) {
                return frame;
            }
        }
    }

    /// Collect every JSON frame arriving within `window`.
    pub async fn collect_for(&mut self, window: Duration) -> Vec<Value> {
        let deadline = Instant::now() + window;
        let mut frames = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    frames.push(serde_json::from_str(text.as_str()).expect("json frame"));
                }
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(_))) | Ok(None) | Err(_) => return frames,
            }
        }
    }

    /// Wait for the server to close the socket. Returns false on timeout.
    pub async fn wait_closed(&mut self) -> bool {
        let deadline = Instant::now() + DEFAULT_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.ws.next()).await {
                Err(_) => return false,
                Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
                Ok(Some(Ok(_))) => {}
            }
        }
    }

    /// Close the socket from the client side.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Whether `frame` is a system message with exactly `content`.
pub fn is_system(frame: &Value, content: &str) -> bool {
    frame["type"] == "system" && frame["content"] == content
}

/// Whether `frame` is a user list.
pub fn is_users(frame: &Value) -> bool {
    frame["type"] == "users"
}
