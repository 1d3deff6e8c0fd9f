//! chatrelay - a single-room real-time chat relay.
//!
//! Browsers connect over WebSocket, declare a username and exchange text and
//! image messages. The relay keeps an in-memory history, snapshots it to disk
//! and replays it to every newcomer.

pub mod chat;
pub mod config;
pub mod datetime;
pub mod error;
pub mod file;
pub mod logging;
pub mod web;

pub use chat::{ChatHub, ChatMessage, MessageKind};
pub use config::Config;
pub use error::{RelayError, Result};
pub use web::ChatServer;
