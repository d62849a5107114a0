//! Client configuration

use std::time::Duration;

use crate::reconnect::{Backoff, ReconnectPolicy};

/// Default delay between reconnect attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// How long an optimistic message waits for its authoritative echo
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on a single HTTP request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How often a running session fails optimistic entries past the ack timeout
pub const DEFAULT_EXPIRY_INTERVAL: Duration = Duration::from_secs(1);

/// Failed connect attempts before the UI is told the transport is degraded
pub const DEFAULT_SURFACE_TRANSPORT_AFTER: u32 = 10;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP base, e.g. `http://localhost:3000`
    pub base_url: String,
    /// WebSocket base, e.g. `ws://localhost:3000`
    pub ws_url: String,
    pub reconnect_delay: Duration,
    /// Cap for exponential backoff. `None` keeps a fixed delay.
    pub max_reconnect_delay: Option<Duration>,
    pub ack_timeout: Duration,
    pub request_timeout: Duration,
    pub surface_transport_after: Option<u32>,
}

impl ClientConfig {
    /// Configuration for a server at `base_url`, WebSocket URL derived from it
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let ws_url = if let Some(rest) = base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base_url.clone()
        };

        Self {
            base_url,
            ws_url,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_delay: None,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            surface_transport_after: Some(DEFAULT_SURFACE_TRANSPORT_AFTER),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let backoff = match self.max_reconnect_delay {
            Some(max) => Backoff::Exponential {
                base: self.reconnect_delay,
                max,
            },
            None => Backoff::Fixed(self.reconnect_delay),
        };

        ReconnectPolicy {
            backoff,
            surface_transport_after: self.surface_transport_after,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("http://localhost:3000")
    }
}
