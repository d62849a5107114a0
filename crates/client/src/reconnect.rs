//! Reconnection manager
//!
//! Owns one logical live channel and keeps it open. The channel moves through
//! `Connecting -> Open -> Closed`; a closed channel is reopened after the
//! backoff delay unless the close was intentional. Retries never give up, but
//! after enough consecutive failed attempts the owner is told the transport is
//! degraded so it can surface that to the user.
//!
//! Every transition into `Open` is reported. `Open` only means the handshake
//! finished: the server registers the channel afterwards and confirms with its
//! `connected` event. The owner re-fetches authoritative history on that event,
//! since events published while the channel was down are never replayed.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_retry::strategy::{ExponentialBackoff, FixedInterval};
use tokio_util::sync::CancellationToken;

use supportsync_shared::{ClientEvent, ServerEvent};

use crate::config::DEFAULT_RECONNECT_DELAY;
use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// Why a link went away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Server ended the session with the dedicated close code
    SessionEnded,
    /// The owner asked to disconnect
    Intentional,
    /// Network failure or unexpected close
    Transport(String),
}

impl CloseReason {
    pub fn should_reconnect(&self) -> bool {
        matches!(self, CloseReason::Transport(_))
    }
}

/// What a link yields when polled
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Event(ServerEvent),
    Closed(CloseReason),
}

/// Opens links to the server
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Link: Link;

    async fn connect(&self) -> ClientResult<Self::Link>;
}

/// One established connection
#[async_trait]
pub trait Link: Send + 'static {
    /// Next event from the server. Must be cancel safe.
    async fn next_event(&mut self) -> LinkEvent;

    async fn send(&mut self, event: &ClientEvent) -> ClientResult<()>;

    async fn close(&mut self);
}

/// Delay schedule between reconnect attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// Doubles from `base` up to `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    pub fn delays(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        match self {
            Backoff::Fixed(delay) => Box::new(FixedInterval::new(*delay)),
            Backoff::Exponential { base, max } => {
                // ExponentialBackoff yields current * factor, with current
                // starting at 2 and doubling each step
                let factor = (base.as_millis() as u64 / 2).max(1);
                Box::new(
                    ExponentialBackoff::from_millis(2)
                        .factor(factor)
                        .max_delay(*max),
                )
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed(DEFAULT_RECONNECT_DELAY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReconnectPolicy {
    pub backoff: Backoff,
    /// Consecutive failed attempts before [`ChannelEvent::TransportDegraded`]
    pub surface_transport_after: Option<u32>,
}

/// Notifications delivered to the channel owner
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    State(ChannelState),
    Event(ServerEvent),
    TransportDegraded { attempts: u32 },
}

/// Owner side of a managed channel
pub struct ChannelHandle {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    outgoing: mpsc::UnboundedSender<ClientEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    /// Next notification. `None` once the manager has stopped for good.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Queue an event for the server. Delivered once the channel is open.
    pub fn send(&self, event: ClientEvent) -> ClientResult<()> {
        self.outgoing
            .send(event)
            .map_err(|_| ClientError::ChannelClosed)
    }

    /// Close the channel without reconnecting
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Disconnect and wait for the manager task to stop
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Reconnection task ended abnormally");
        }
    }
}

pub struct ReconnectionManager<C: Connector> {
    connector: C,
    policy: ReconnectPolicy,
}

impl<C: Connector> ReconnectionManager<C> {
    pub fn new(connector: C, policy: ReconnectPolicy) -> Self {
        Self { connector, policy }
    }

    /// Start managing the channel on a background task
    pub fn spawn(self) -> ChannelHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(self.run(events_tx, outgoing_rx, cancel.clone()));

        ChannelHandle {
            events: events_rx,
            outgoing: outgoing_tx,
            cancel,
            task,
        }
    }

    async fn run(
        self,
        events: mpsc::UnboundedSender<ChannelEvent>,
        mut outgoing: mpsc::UnboundedReceiver<ClientEvent>,
        cancel: CancellationToken,
    ) {
        let mut delays = self.policy.backoff.delays();
        let mut failures: u32 = 0;

        loop {
            let _ = events.send(ChannelEvent::State(ChannelState::Connecting));

            let connected = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = events.send(ChannelEvent::State(ChannelState::Closed));
                    break;
                }
                result = self.connector.connect() => result,
            };

            let reason = match connected {
                Ok(mut link) => {
                    failures = 0;
                    delays = self.policy.backoff.delays();
                    tracing::info!("Live channel open");
                    let _ = events.send(ChannelEvent::State(ChannelState::Open));

                    pump(&mut link, &events, &mut outgoing, &cancel).await
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    tracing::debug!(error = %e, attempts = failures, "Connect attempt failed");

                    if self.policy.surface_transport_after == Some(failures) {
                        tracing::warn!(attempts = failures, "Live channel degraded");
                        let _ = events.send(ChannelEvent::TransportDegraded { attempts: failures });
                    }
                    CloseReason::Transport(e.to_string())
                }
            };

            let _ = events.send(ChannelEvent::State(ChannelState::Closed));

            if !reason.should_reconnect() {
                tracing::info!(reason = ?reason, "Live channel closed");
                break;
            }

            let delay = delays.next().unwrap_or(DEFAULT_RECONNECT_DELAY);
            tracing::debug!(reason = ?reason, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Shuttle events over an open link until it closes
async fn pump<L: Link>(
    link: &mut L,
    events: &mpsc::UnboundedSender<ChannelEvent>,
    outgoing: &mut mpsc::UnboundedReceiver<ClientEvent>,
    cancel: &CancellationToken,
) -> CloseReason {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                link.close().await;
                return CloseReason::Intentional;
            }
            queued = outgoing.recv() => match queued {
                Some(event) => {
                    if let Err(e) = link.send(&event).await {
                        return CloseReason::Transport(e.to_string());
                    }
                }
                // Handle dropped
                None => {
                    link.close().await;
                    return CloseReason::Intentional;
                }
            },
            incoming = link.next_event() => match incoming {
                LinkEvent::Event(event) => {
                    if events.send(ChannelEvent::Event(event)).is_err() {
                        link.close().await;
                        return CloseReason::Intentional;
                    }
                }
                LinkEvent::Closed(reason) => return reason,
            },
        }
    }
}
