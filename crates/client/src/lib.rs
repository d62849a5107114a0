//! SupportSync Client Library
//!
//! Participant side of the conversation synchronization core.
//!
//! - **reconcile**: merges optimistic entries with authoritative messages
//! - **reconnect**: connection state machine with unbounded retry
//! - **transport**: WebSocket link for the reconnection manager
//! - **api**: HTTP client for the conversation endpoints
//! - **session**: one conversation's view, kept in sync

pub mod api;
pub mod config;
pub mod error;
pub mod reconcile;
pub mod reconnect;
pub mod session;
pub mod transport;

pub use api::{ApiClient, ConversationApi, OutgoingMessage};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use reconcile::{reconcile, EntryState, ViewEntry};
pub use reconnect::{
    Backoff, ChannelEvent, ChannelHandle, ChannelState, CloseReason, ReconnectPolicy,
    ReconnectionManager,
};
pub use session::ChatSession;
pub use transport::WsConnector;
