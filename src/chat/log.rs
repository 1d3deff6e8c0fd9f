//! Chat history for chatrelay.
//!
//! The log lives in memory and is snapshotted to a single JSON file. A
//! snapshot is a whole-array overwrite, never a delta.

use std::io;
use std::path::{Path, PathBuf};

use tokio::sync::{Mutex, RwLock};

use super::message::ChatMessage;
use crate::Result;

/// Append-only message history with JSON snapshots.
pub struct MessageLog {
    entries: RwLock<Vec<ChatMessage>>,
    path: PathBuf,
    /// Serializes snapshot writers so their temp files never collide.
    persist_lock: Mutex<()>,
}

impl MessageLog {
    /// Create an empty log snapshotted to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            path: path.into(),
            persist_lock: Mutex::new(()),
        }
    }

    /// Snapshot file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a message at the tail.
    pub async fn append(&self, msg: ChatMessage) {
        self.entries.write().await.push(msg);
    }

    /// Every message, oldest first.
    pub async fn snapshot_all(&self) -> Vec<ChatMessage> {
        self.entries.read().await.clone()
    }

    /// Number of logged messages.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Write the whole log to the snapshot file.
    ///
    /// The array is serialized under the read lock, so the file always holds
    /// a prefix of the log as of some instant. The write goes through a temp
    /// file and a rename.
    pub async fn persist(&self) -> Result<usize> {
        let _guard = self.persist_lock.lock().await;

        let (data, count) = {
            let entries = self.entries.read().await;
            (serde_json::to_vec(&*entries)?, entries.len())
        };

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::debug!(path = %self.path.display(), count, "Chat history saved");
        Ok(count)
    }

    /// Replace the in-memory log with the snapshot file contents.
    ///
    /// A missing file leaves the log untouched and returns 0. On a parse error
    /// the in-memory log is also left untouched.
    pub async fn restore(&self) -> Result<usize> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let restored: Vec<ChatMessage> = serde_json::from_slice(&data)?;
        let count = restored.len();
        *self.entries.write().await = restored;

        tracing::info!(path = %self.path.display(), count, "Chat history loaded");
        Ok(count)
    }
}
