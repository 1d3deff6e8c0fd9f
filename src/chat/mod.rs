//! Chat module for chatrelay.
//!
//! This module provides the relay core:
//! - Connection registry with one connection per network origin
//! - Reconnect grace tracking to suppress leave/join churn
//! - Append-only message history with JSON snapshots
//! - Single-consumer broadcast fan-out
//! - Online user list publishing

mod broadcaster;
mod connection;
mod grace;
mod hub;
mod log;
mod message;
mod presence;
mod registry;

pub use broadcaster::{deliver, should_deliver, Broadcaster};
pub use connection::{Connection, ConnectionWriter, WsSink};
pub use grace::{ReconnectGrace, RecentDisconnect};
pub use hub::{ChatHub, HubSettings, JoinOutcome};
pub use log::MessageLog;
pub use message::{
    ChatMessage, ClientMessage, MessageKind, UserInfo, UsersMessage, SYSTEM_SENDER,
};
pub use presence::PresencePublisher;
pub use registry::ConnectionRegistry;
