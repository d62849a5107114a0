//! WebSocket support for real-time conversation sync
//!
//! # Architecture
//!
//! - **Connection**: one open live channel of a participant
//! - **Registry**: participant to channel index shared by every handler
//! - **Fanout**: computes recipients per event and pushes to their channels
//! - **Handler**: Axum WebSocket route handler

pub mod connection;
pub mod fanout;
pub mod handler;
pub mod registry;

pub use connection::Connection;
pub use fanout::{recipients_for, FanoutDispatcher};
pub use handler::ws_handler;
pub use registry::{ConnectionHandle, ConnectionRegistry, Exclusion, Recipients, RegistryStats};
