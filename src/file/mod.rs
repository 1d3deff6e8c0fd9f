//! Storage for uploaded image files.

mod storage;

pub use storage::{decode_data_uri, UploadStore, UPLOADS_URL_PREFIX};
