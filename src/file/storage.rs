//! Image upload storage for chatrelay.
//!
//! Decoded images are written flat into one directory:
//! ```text
//! {base_path}/
//! ├── 1718000000000000000_alice.jpg
//! ├── 1718000000000000001_bob.jpg
//! └── ...
//! ```
//! and served back under [`UPLOADS_URL_PREFIX`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use base64::Engine;
use chrono::Utc;

use crate::Result;

/// URL prefix under which stored uploads are served.
pub const UPLOADS_URL_PREFIX: &str = "/uploads";

/// Marker separating a data URI header from its payload.
const BASE64_MARKER: &str = "base64,";

/// Decode an image payload.
///
/// Accepts either a full data URI (`data:image/png;base64,...`) or bare
/// base64. Everything up to and including the first `base64,` is stripped.
pub fn decode_data_uri(content: &str) -> Result<Vec<u8>> {
    let payload = match content.find(BASE64_MARKER) {
        Some(idx) => &content[idx + BASE64_MARKER.len()..],
        None => content,
    };
    Ok(base64::engine::general_purpose::STANDARD.decode(payload.trim())?)
}

/// Storage for uploaded images.
#[derive(Debug)]
pub struct UploadStore {
    /// Directory holding the files.
    base_path: PathBuf,
    /// Last clock value handed out, in nanoseconds.
    last_stamp: AtomicI64,
}

impl UploadStore {
    /// Create a store rooted at `base_path`, creating the directory if needed.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;

        Ok(Self {
            base_path,
            last_stamp: AtomicI64::new(0),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Save image bytes for `username`. Returns the public path of the file.
    pub async fn store(&self, content: &[u8], username: &str) -> Result<String> {
        let stored_name = self.generate_stored_name(username);
        tokio::fs::write(self.get_file_path(&stored_name), content).await?;
        Ok(format!("{UPLOADS_URL_PREFIX}/{stored_name}"))
    }

    /// Full path for a stored name.
    pub fn get_file_path(&self, stored_name: &str) -> PathBuf {
        self.base_path.join(stored_name)
    }

    /// `<nanos>_<username>.jpg`, with nanos strictly increasing per store.
    pub fn generate_stored_name(&self, username: &str) -> String {
        format!(
            "{}_{}.jpg",
            self.next_stamp(),
            Self::sanitize_username(username)
        )
    }

    fn next_stamp(&self) -> i64 {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        let mut last = self.last_stamp.load(Ordering::Relaxed);
        loop {
            let next = now.max(last.saturating_add(1));
            match self.last_stamp.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    /// Keep alphanumerics, `-` and `_`; replace anything else with `_`.
    fn sanitize_username(username: &str) -> String {
        let cleaned: String = username
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if cleaned.is_empty() {
            "anonymous".to_string()
        } else {
            cleaned
        }
    }
}
