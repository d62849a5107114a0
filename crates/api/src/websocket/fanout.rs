//! Fanout dispatcher
//!
//! Pushes one authoritative event to every live channel that should observe
//! it. Recipients are computed at publish time from the registry and the
//! assignment projection. Delivery is best-effort: offline participants
//! catch up from history, never from replay.

use std::sync::Arc;
use uuid::Uuid;

use supportsync_shared::{ConversationId, Participant, Role, ServerEvent};

use super::registry::{ConnectionRegistry, Exclusion, Recipients};
use crate::assignment::{AssignmentProjection, ConversationRoute};

/// Routing rule for each conversation event kind
pub fn recipients_for(
    event: &ServerEvent,
    route: &ConversationRoute,
    origin: Option<Uuid>,
) -> Recipients {
    let customer = Participant::customer(route.customer_id);

    match event {
        ServerEvent::NewCustomerMessage { .. } | ServerEvent::AnalysisReady { .. } => {
            match route.assigned_agent {
                Some(agent) => Recipients {
                    participants: vec![customer, Participant::agent(agent)],
                    ..Default::default()
                },
                // Unclaimed work is visible to every connected agent
                None => Recipients {
                    participants: vec![customer],
                    all_of_role: Some(Role::Agent),
                    exclude: None,
                },
            }
        }
        ServerEvent::AgentReply { payload, .. } => {
            let sender = Participant {
                id: payload.sender_id,
                role: Role::Agent,
            };
            Recipients {
                participants: vec![customer, sender],
                all_of_role: None,
                // The sending agent's own channel, never anyone else's
                exclude: origin.map(|session_id| Exclusion {
                    session_id,
                    owner: sender,
                }),
            }
        }
        ServerEvent::ConversationAssigned { .. } | ServerEvent::ConversationUnassigned { .. } => {
            Recipients {
                participants: vec![customer],
                all_of_role: Some(Role::Agent),
                exclude: None,
            }
        }
        // Direct replies, never fanned out
        ServerEvent::MessageAccepted { .. }
        | ServerEvent::Pong
        | ServerEvent::Error { .. }
        | ServerEvent::Connected { .. } => Recipients::default(),
    }
}

pub struct FanoutDispatcher {
    registry: ConnectionRegistry,
    projection: Arc<AssignmentProjection>,
}

impl FanoutDispatcher {
    pub fn new(registry: ConnectionRegistry, projection: Arc<AssignmentProjection>) -> Self {
        Self {
            registry,
            projection,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Publish an event of one conversation
    ///
    /// `origin` is the channel that caused the event, if it came in over a live
    /// channel. Returns the number of channels the event was queued on.
    pub async fn publish(
        &self,
        conversation_id: ConversationId,
        event: ServerEvent,
        origin: Option<Uuid>,
    ) -> usize {
        let route = match self.projection.route(conversation_id).await {
            Ok(route) => route,
            Err(e) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    event_type = event.kind(),
                    error = %e,
                    "Dropping event for conversation without a route"
                );
                return 0;
            }
        };

        let recipients = recipients_for(&event, &route, origin);
        let channels = self.registry.resolve(&recipients).await;

        let mut success_count = 0;
        let mut failed_count = 0;
        for conn in &channels {
            match conn.send(event.clone()) {
                Ok(()) => success_count += 1,
                Err(_) => {
                    failed_count += 1;
                    tracing::warn!(
                        session_id = %conn.session_id,
                        "Failed to send event to connection (likely closed)"
                    );
                }
            }
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            event_type = event.kind(),
            recipients = success_count,
            failed = failed_count,
            "Published conversation event"
        );

        success_count
    }
}
