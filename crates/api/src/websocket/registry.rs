//! Connection registry
//!
//! Maps participants to their open live channels. Both indexes sit behind one
//! lock so a fanout read never observes a half-registered channel.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use supportsync_shared::{Participant, Role, ServerEvent};

use super::connection::Connection;

/// Returned by [`ConnectionRegistry::register`], required to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub session_id: Uuid,
    pub participant: Participant,
}

/// Recipient selection for one publish call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipients {
    /// Participants whose every channel receives the event
    pub participants: Vec<Participant>,
    /// Every channel of this role receives the event
    pub all_of_role: Option<Role>,
    /// Channel that must not receive the event
    pub exclude: Option<Exclusion>,
}

/// A channel left out of a publish. Only honored while the channel belongs to `owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exclusion {
    pub session_id: Uuid,
    pub owner: Participant,
}

impl Exclusion {
    fn skips(&self, conn: &Connection) -> bool {
        conn.session_id == self.session_id && conn.participant == self.owner
    }
}

#[derive(Default)]
struct Inner {
    connections: HashMap<Uuid, Arc<Connection>>,
    by_participant: HashMap<Participant, HashSet<Uuid>>,
}

/// Registry of live channels, created once per process and injected
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel for a participant
    pub async fn register(
        &self,
        participant: Participant,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> ConnectionHandle {
        let conn = Arc::new(Connection::new(participant, sender));
        let handle = ConnectionHandle {
            session_id: conn.session_id,
            participant,
        };

        let mut inner = self.inner.write().await;
        inner
            .by_participant
            .entry(participant)
            .or_default()
            .insert(conn.session_id);
        inner.connections.insert(conn.session_id, conn);

        tracing::info!(
            session_id = %handle.session_id,
            participant = %participant,
            total_connections = inner.connections.len(),
            "Connection registered"
        );

        handle
    }

    /// Remove a channel. Returns false if it was already gone.
    ///
    /// Does not touch conversation assignment: an agent keeps their claims
    /// after their last channel closes.
    pub async fn unregister(&self, handle: &ConnectionHandle) -> bool {
        let mut inner = self.inner.write().await;
        if inner.connections.remove(&handle.session_id).is_none() {
            return false;
        }

        if let Some(sessions) = inner.by_participant.get_mut(&handle.participant) {
            sessions.remove(&handle.session_id);
            if sessions.is_empty() {
                inner.by_participant.remove(&handle.participant);
            }
        }

        tracing::info!(
            session_id = %handle.session_id,
            participant = %handle.participant,
            remaining_connections = inner.connections.len(),
            "Connection unregistered"
        );
        true
    }

    /// Drop every channel of a participant. Their subscriptions end and the
    /// sockets are closed with the session-ended code. Returns how many were dropped.
    pub async fn end_sessions(&self, participant: &Participant) -> usize {
        let mut inner = self.inner.write().await;
        let Some(sessions) = inner.by_participant.remove(participant) else {
            return 0;
        };

        for session_id in &sessions {
            inner.connections.remove(session_id);
        }

        tracing::info!(
            participant = %participant,
            ended = sessions.len(),
            remaining_connections = inner.connections.len(),
            "Participant sessions ended"
        );
        sessions.len()
    }

    /// Every open channel of one participant
    pub async fn channels_for(&self, participant: &Participant) -> Vec<Arc<Connection>> {
        let inner = self.inner.read().await;
        inner.channels_for(participant).collect()
    }

    /// Every open channel of every participant with the given role
    pub async fn all_channels_for_role(&self, role: Role) -> Vec<Arc<Connection>> {
        let inner = self.inner.read().await;
        inner
            .connections
            .values()
            .filter(|c| c.participant.role == role)
            .cloned()
            .collect()
    }

    /// Resolve a recipient selection into distinct channels under one read lock
    pub async fn resolve(&self, recipients: &Recipients) -> Vec<Arc<Connection>> {
        let inner = self.inner.read().await;
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();

        let mut candidates: Vec<Arc<Connection>> = recipients
            .participants
            .iter()
            .flat_map(|p| inner.channels_for(p))
            .collect();
        if let Some(role) = recipients.all_of_role {
            candidates.extend(
                inner
                    .connections
                    .values()
                    .filter(|c| c.participant.role == role)
                    .cloned(),
            );
        }

        for conn in candidates {
            if recipients.exclude.is_some_and(|e| e.skips(&conn)) {
                continue;
            }
            if seen.insert(conn.session_id) {
                resolved.push(conn);
            }
        }

        resolved
    }

    /// Send directly to one channel. Returns false if it is not registered or closed.
    pub async fn send_to(&self, session_id: Uuid, event: ServerEvent) -> bool {
        let conn = {
            let inner = self.inner.read().await;
            inner.connections.get(&session_id).cloned()
        };

        match conn {
            Some(conn) => conn.send(event).is_ok(),
            None => false,
        }
    }

    /// True if `session_id` is an open channel of `participant`
    pub async fn owns(&self, participant: &Participant, session_id: Uuid) -> bool {
        let inner = self.inner.read().await;
        inner
            .connections
            .get(&session_id)
            .is_some_and(|c| c.participant == *participant)
    }

    pub async fn is_connected(&self, participant: &Participant) -> bool {
        let inner = self.inner.read().await;
        inner.by_participant.contains_key(participant)
    }

    pub async fn connection_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.connections.len()
    }

    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().await;
        let agents = inner
            .by_participant
            .keys()
            .filter(|p| p.role == Role::Agent)
            .count();

        RegistryStats {
            active_connections: inner.connections.len(),
            connected_agents: agents,
            connected_customers: inner.by_participant.len() - agents,
        }
    }
}

impl Inner {
    fn channels_for<'a>(
        &'a self,
        participant: &Participant,
    ) -> impl Iterator<Item = Arc<Connection>> + 'a {
        self.by_participant
            .get(participant)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.connections.get(id).cloned())
    }
}

/// Statistics about live channels
#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStats {
    pub active_connections: usize,
    pub connected_agents: usize,
    pub connected_customers: usize,
}
