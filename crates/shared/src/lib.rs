//! SupportSync Shared Types and Utilities
//!
//! This crate contains the domain types, wire events and errors shared by the
//! SupportSync server and participant clients.

pub mod db;
pub mod error;
pub mod events;
pub mod types;

pub use db::*;
pub use error::*;
pub use events::{AssignmentChange, ClientEvent, MessageAck, ServerEvent, CLOSE_CODE_SESSION_ENDED};
pub use types::*;
