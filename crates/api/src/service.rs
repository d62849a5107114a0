//! Conversation service
//!
//! Entry point for the HTTP and WebSocket layers. Owns the registry, the
//! fanout dispatcher, the assignment state machine and the analysis pipeline.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use uuid::Uuid;

use supportsync_shared::{
    AgentId, Conversation, ConversationId, ConversationSummary, CustomerId, Message, NewMessage,
    Participant, Role, ServerEvent, SyncError, SyncResult,
};

use crate::analysis::{AnalysisPipeline, Analyzer};
use crate::assignment::{
    AssignmentProjection, AssignmentService, ClaimOutcome, ConversationLocks, ReleaseOutcome,
};
use crate::store::ConversationStore;
use crate::websocket::{ConnectionHandle, ConnectionRegistry, FanoutDispatcher};

/// A message send request
#[derive(Debug, Clone)]
pub struct SendMessage {
    pub conversation_id: ConversationId,
    pub sender: Participant,
    pub content: String,
    pub attachment_ref: Option<String>,
    pub derived_text: Option<String>,
    /// Live channel the request came in on, if any
    pub origin: Option<Uuid>,
    /// Opaque reference echoed back to the origin in `message_accepted`
    pub client_ref: Option<String>,
}

/// Live event stream of one channel
pub struct Subscription {
    pub handle: ConnectionHandle,
    pub receiver: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Stream for Subscription {
    type Item = ServerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
    registry: ConnectionRegistry,
    fanout: Arc<FanoutDispatcher>,
    locks: Arc<ConversationLocks>,
    projection: Arc<AssignmentProjection>,
    assignment: AssignmentService,
    analysis: AnalysisPipeline,
}

impl ConversationService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        analyzer: Arc<dyn Analyzer>,
        analysis_timeout: Duration,
    ) -> Self {
        Self::with_registry(store, analyzer, analysis_timeout, ConnectionRegistry::new())
    }

    pub fn with_registry(
        store: Arc<dyn ConversationStore>,
        analyzer: Arc<dyn Analyzer>,
        analysis_timeout: Duration,
        registry: ConnectionRegistry,
    ) -> Self {
        let locks = Arc::new(ConversationLocks::new());
        let projection = Arc::new(AssignmentProjection::new(Arc::clone(&store)));
        let fanout = Arc::new(FanoutDispatcher::new(
            registry.clone(),
            Arc::clone(&projection),
        ));
        let assignment = AssignmentService::new(
            Arc::clone(&store),
            Arc::clone(&locks),
            Arc::clone(&projection),
            Arc::clone(&fanout),
        );
        let analysis = AnalysisPipeline::new(
            analyzer,
            Arc::clone(&store),
            Arc::clone(&fanout),
            analysis_timeout,
        );

        Self {
            store,
            registry,
            fanout,
            locks,
            projection,
            assignment,
            analysis,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    // =========================================================================
    // Conversations
    // =========================================================================

    /// Latest open conversation of a customer, created on first contact
    pub async fn open_conversation(&self, customer_id: CustomerId) -> SyncResult<Conversation> {
        let conversation = self.store.open_conversation(customer_id).await?;
        self.projection.record(&conversation).await;
        Ok(conversation)
    }

    pub async fn close_conversation(&self, id: ConversationId) -> SyncResult<Conversation> {
        let _guard = self.locks.lock(id).await;

        let conversation = self.store.close_conversation(id).await?;
        self.analysis.cancel_conversation(id).await;
        self.projection.forget(id).await;

        tracing::info!(conversation_id = %id, "Conversation closed");
        Ok(conversation)
    }

    pub async fn conversation_history(&self, id: ConversationId) -> SyncResult<Vec<Message>> {
        Ok(self.store.conversation_history(id).await?)
    }

    pub async fn list_active_conversations(&self) -> SyncResult<Vec<ConversationSummary>> {
        Ok(self.store.list_active_conversations().await?)
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Persist a message and fan it out
    ///
    /// Persist and publish run under the conversation lock so channels see
    /// messages in store order. Customer messages are then handed to analysis.
    pub async fn send_message(&self, request: SendMessage) -> SyncResult<Message> {
        let conversation_id = request.conversation_id;

        // Only a channel of the sender can be the origin
        let origin = match request.origin {
            Some(session_id) if self.registry.owns(&request.sender, session_id).await => {
                Some(session_id)
            }
            Some(session_id) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    session_id = %session_id,
                    sender = %request.sender,
                    "Ignoring origin channel not owned by sender"
                );
                None
            }
            None => None,
        };

        let guard = self.locks.lock(conversation_id).await;

        if request.sender.role == Role::Customer {
            let route = self.projection.route(conversation_id).await?;
            if route.customer_id.0 != request.sender.id {
                return Err(SyncError::ConversationNotFound(conversation_id));
            }
        }

        let message = self
            .store
            .create_message(NewMessage {
                conversation_id,
                sender_role: request.sender.role,
                sender_id: request.sender.id,
                content: request.content,
                attachment_ref: request.attachment_ref,
                derived_text: request.derived_text,
            })
            .await?;

        tracing::info!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            sequence = message.sequence,
            sender = %request.sender,
            "Message accepted"
        );

        self.fanout
            .publish(
                conversation_id,
                ServerEvent::message(message.clone()),
                origin,
            )
            .await;
        drop(guard);

        if let Some(origin) = origin {
            self.registry
                .send_to(
                    origin,
                    ServerEvent::accepted(request.client_ref, message.clone()),
                )
                .await;
        }

        if message.sender_role == Role::Customer {
            self.analysis.spawn(message.clone()).await;
        }

        Ok(message)
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    pub async fn claim_conversation(
        &self,
        id: ConversationId,
        agent: AgentId,
    ) -> SyncResult<ClaimOutcome> {
        self.assignment.claim(id, agent).await
    }

    pub async fn release_conversation(
        &self,
        id: ConversationId,
        requester: Option<AgentId>,
    ) -> SyncResult<ReleaseOutcome> {
        self.assignment.release(id, requester).await
    }

    // =========================================================================
    // Live channels
    // =========================================================================

    /// Open a live channel for a participant
    pub async fn subscribe(&self, participant: Participant) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = self.registry.register(participant, sender).await;
        Subscription { handle, receiver }
    }

    /// Close a live channel. Claims held by the participant are kept.
    pub async fn unsubscribe(&self, handle: &ConnectionHandle) -> bool {
        self.registry.unregister(handle).await
    }

    /// End every live session of a participant. Their clients are told not to reconnect.
    pub async fn end_sessions(&self, participant: &Participant) -> usize {
        self.registry.end_sessions(participant).await
    }

    /// Publish an event through the dispatcher
    pub async fn publish(
        &self,
        conversation_id: ConversationId,
        event: ServerEvent,
        origin: Option<Uuid>,
    ) -> usize {
        self.fanout.publish(conversation_id, event, origin).await
    }

    /// Cancel background work ahead of process exit
    pub fn shutdown(&self) {
        self.analysis.shutdown();
    }
}
