//! Integration tests for the conversation synchronization core
//!
//! Every test runs the full service (registry, fanout, assignment, analysis)
//! over the in-memory store with fake channels, no database required.
//!
//! ## Test Coverage
//! - Claim races within one process and across processes sharing a store
//! - Idempotent claim and release
//! - Fanout routing for customer messages, agent replies and assignment changes
//! - Store-order delivery under concurrent sends
//! - Analysis that never resolves
//! - HTTP surface
//!
//! ## Running Tests
//! ```bash
//! cargo test -p supportsync-api --test integration
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod assignment;
mod common;
mod http_api;
mod messaging;
