//! SupportSync API Library
//!
//! Server side of the real-time conversation synchronization core: live
//! channels, fanout, claim state machine and the analysis pipeline.

pub mod analysis;
pub mod assignment;
pub mod config;
pub mod error;
pub mod routes;
pub mod service;
pub mod state;
pub mod store;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use service::{ConversationService, SendMessage, Subscription};
pub use state::AppState;
