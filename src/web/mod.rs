//! HTTP and WebSocket surface of the relay.
//!
//! Serves the chat socket at `/ws`, stored images under `/uploads` and the
//! static web client for everything else.

pub mod router;
pub mod server;
pub mod ws;

pub use router::{create_health_router, create_router};
pub use server::{shutdown_signal, ChatServer};
