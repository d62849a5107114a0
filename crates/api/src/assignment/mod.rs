//! Conversation assignment state machine
//!
//! A conversation is either `Unassigned` or `Assigned(agent)`. Transitions are
//! serialized per conversation in-process, and the store's compare-and-set is
//! the final arbiter across processes.
//!
//! - **projection**: cached routing view of assignments
//! - **locks**: per-conversation mutexes

pub mod locks;
pub mod projection;

pub use locks::ConversationLocks;
pub use projection::{AssignmentProjection, ConversationRoute};

use std::sync::Arc;

use supportsync_shared::{
    AgentId, AssignmentState, ConversationId, ServerEvent, SyncError, SyncResult,
};

use crate::store::{ConversationStore, StoreError};
use crate::websocket::FanoutDispatcher;

/// Result of a claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Transitioned to `Assigned(agent)`, event published
    Claimed,
    /// The agent already held the claim, nothing published
    AlreadyHeld,
}

/// Result of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Transitioned to `Unassigned`, event published
    Released { previous: AgentId },
    /// Nothing to release, nothing published
    AlreadyUnassigned,
}

pub struct AssignmentService {
    store: Arc<dyn ConversationStore>,
    locks: Arc<ConversationLocks>,
    projection: Arc<AssignmentProjection>,
    fanout: Arc<FanoutDispatcher>,
}

impl AssignmentService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        locks: Arc<ConversationLocks>,
        projection: Arc<AssignmentProjection>,
        fanout: Arc<FanoutDispatcher>,
    ) -> Self {
        Self {
            store,
            locks,
            projection,
            fanout,
        }
    }

    /// Make `agent` the exclusive owner of a conversation
    pub async fn claim(&self, id: ConversationId, agent: AgentId) -> SyncResult<ClaimOutcome> {
        let _guard = self.locks.lock(id).await;

        let conversation = self.store.get_conversation(id).await?;
        if !conversation.is_open() {
            return Err(SyncError::ConversationClosed(id));
        }

        match conversation.assignment() {
            AssignmentState::Assigned(holder) if holder == agent => {
                self.projection.record(&conversation).await;
                return Ok(ClaimOutcome::AlreadyHeld);
            }
            AssignmentState::Assigned(holder) => {
                tracing::info!(
                    conversation_id = %id,
                    agent_id = %agent,
                    holder = %holder,
                    "Claim rejected, conversation already claimed"
                );
                return Err(SyncError::Conflict {
                    holder: Some(holder),
                });
            }
            AssignmentState::Unassigned => {}
        }

        let updated = match self.store.set_assignment(id, Some(agent), None).await {
            Ok(updated) => updated,
            // Another process claimed it for the same agent first
            Err(StoreError::Conflict {
                current: Some(current),
            }) if current == agent => return Ok(ClaimOutcome::AlreadyHeld),
            Err(e) => return Err(e.into()),
        };

        self.projection.record(&updated).await;
        tracing::info!(conversation_id = %id, agent_id = %agent, "Conversation claimed");

        self.fanout
            .publish(id, ServerEvent::assigned(id, agent), None)
            .await;

        Ok(ClaimOutcome::Claimed)
    }

    /// Return a conversation to the unclaimed pool
    ///
    /// With `requester` set, only the current holder may release. Releasing an
    /// unassigned conversation always succeeds.
    pub async fn release(
        &self,
        id: ConversationId,
        requester: Option<AgentId>,
    ) -> SyncResult<ReleaseOutcome> {
        let _guard = self.locks.lock(id).await;

        let conversation = self.store.get_conversation(id).await?;
        let holder = match conversation.assignment() {
            AssignmentState::Unassigned => return Ok(ReleaseOutcome::AlreadyUnassigned),
            AssignmentState::Assigned(holder) => holder,
        };

        if !conversation.is_open() {
            return Err(SyncError::ConversationClosed(id));
        }
        if let Some(requester) = requester {
            if requester != holder {
                return Err(SyncError::Conflict {
                    holder: Some(holder),
                });
            }
        }

        let updated = match self.store.set_assignment(id, None, Some(holder)).await {
            Ok(updated) => updated,
            Err(StoreError::Conflict { current: None }) => {
                return Ok(ReleaseOutcome::AlreadyUnassigned)
            }
            Err(e) => return Err(e.into()),
        };

        self.projection.record(&updated).await;
        tracing::info!(conversation_id = %id, previous = %holder, "Conversation released");

        self.fanout
            .publish(id, ServerEvent::unassigned(id, holder), None)
            .await;

        Ok(ReleaseOutcome::Released { previous: holder })
    }
}
