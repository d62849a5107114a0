//! Participant chat session
//!
//! Holds one conversation's reconciled view and keeps it consistent with the
//! server: sends are shown optimistically, channel events are merged through
//! [`reconcile`](crate::reconcile), and every time the server confirms a live
//! channel is registered the view is rebased on freshly fetched history.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use supportsync_shared::{AgentId, ConversationId, Participant, ServerEvent};

use crate::api::{ApiClient, ConversationApi, OutgoingMessage};
use crate::config::{ClientConfig, DEFAULT_EXPIRY_INTERVAL};
use crate::error::{ClientError, ClientResult};
use crate::reconcile::{self, EntryState, ViewEntry};
use crate::reconnect::{ChannelEvent, ChannelHandle, ChannelState, ReconnectionManager};
use crate::transport::WsConnector;

pub struct ChatSession {
    api: Arc<dyn ConversationApi>,
    conversation_id: ConversationId,
    participant: Participant,
    view: Vec<ViewEntry>,
    assigned_agent: Option<AgentId>,
    channel_state: ChannelState,
    session_id: Option<Uuid>,
    degraded: bool,
    ack_timeout: Duration,
}

impl ChatSession {
    pub fn new(
        api: Arc<dyn ConversationApi>,
        conversation_id: ConversationId,
        participant: Participant,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            api,
            conversation_id,
            participant,
            view: Vec::new(),
            assigned_agent: None,
            channel_state: ChannelState::Connecting,
            session_id: None,
            degraded: false,
            ack_timeout,
        }
    }

    /// Session over HTTP plus a managed live channel for `participant`
    pub fn connect(
        config: &ClientConfig,
        conversation_id: ConversationId,
        participant: Participant,
    ) -> ClientResult<(Self, ChannelHandle)> {
        let api = Arc::new(ApiClient::new(&config.base_url, config.request_timeout)?);
        let connector = WsConnector::new(&config.ws_url, participant);
        let channel = ReconnectionManager::new(connector, config.reconnect_policy()).spawn();

        let session = Self::new(api, conversation_id, participant, config.ack_timeout);
        Ok((session, channel))
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn view(&self) -> &[ViewEntry] {
        &self.view
    }

    pub fn assigned_agent(&self) -> Option<AgentId> {
        self.assigned_agent
    }

    /// Live channel id assigned by the server, while connected
    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel_state
    }

    /// True after repeated failed connects, until the channel opens again
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Send a text message. Returns the local id of its view entry.
    pub async fn send(&mut self, content: impl Into<String>) -> ClientResult<Uuid> {
        self.send_entry(ViewEntry::optimistic(self.participant.role, content, None))
            .await
    }

    /// Send a message with an uploaded attachment
    pub async fn send_attachment(
        &mut self,
        content: impl Into<String>,
        attachment_ref: impl Into<String>,
        derived_text: Option<String>,
    ) -> ClientResult<Uuid> {
        let mut entry =
            ViewEntry::optimistic(self.participant.role, content, Some(attachment_ref.into()));
        entry.derived_text = derived_text;
        self.send_entry(entry).await
    }

    /// Resend a failed entry as a new message. The failed entry stays as is.
    pub async fn retry(&mut self, local_id: Uuid) -> ClientResult<Uuid> {
        let failed = self
            .view
            .iter()
            .find(|e| e.local_id == local_id && e.state == EntryState::Failed)
            .ok_or_else(|| ClientError::NotFound(format!("no failed entry {local_id}")))?;

        let mut entry = ViewEntry::optimistic(
            failed.sender_role,
            failed.content.clone(),
            failed.attachment_ref.clone(),
        );
        entry.derived_text.clone_from(&failed.derived_text);
        self.send_entry(entry).await
    }

    async fn send_entry(&mut self, entry: ViewEntry) -> ClientResult<Uuid> {
        let local_id = entry.local_id;
        let request = OutgoingMessage {
            sender_id: self.participant.id,
            sender_role: self.participant.role,
            content: entry.content.clone(),
            attachment_ref: entry.attachment_ref.clone(),
            derived_text: entry.derived_text.clone(),
            session_id: self.session_id,
            client_ref: Some(local_id.to_string()),
        };
        self.view.push(entry);

        match self.api.send_message(self.conversation_id, &request).await {
            Ok(message) => {
                reconcile::apply(&mut self.view, &message);
                Ok(local_id)
            }
            Err(e) if e.is_rejection() => {
                tracing::debug!(local_id = %local_id, error = %e, "Message rejected");
                self.mark_failed(local_id);
                Err(e)
            }
            Err(e) => {
                // The server may have stored it. The echo, history rebase or
                // ack timeout settles the entry.
                tracing::debug!(local_id = %local_id, error = %e, "Send outcome unknown");
                Err(e)
            }
        }
    }

    fn mark_failed(&mut self, local_id: Uuid) {
        if let Some(entry) = self
            .view
            .iter_mut()
            .find(|e| e.local_id == local_id && e.is_pending())
        {
            entry.state = EntryState::Failed;
        }
    }

    /// Fail entries that were never confirmed within the ack timeout
    pub fn expire_pending(&mut self) -> usize {
        reconcile::expire_pending(&mut self.view, Instant::now(), self.ack_timeout)
    }

    /// Rebuild the view from authoritative history
    pub async fn refresh(&mut self) -> ClientResult<()> {
        let history = self.api.history(self.conversation_id).await?;
        self.view = reconcile::rebase(&self.view, &history);
        Ok(())
    }

    /// Apply one notification from the managed channel
    pub async fn handle(&mut self, event: ChannelEvent) -> ClientResult<()> {
        match event {
            ChannelEvent::State(state) => {
                self.channel_state = state;
                match state {
                    ChannelState::Open => self.degraded = false,
                    ChannelState::Closed => self.session_id = None,
                    ChannelState::Connecting => {}
                }
            }
            ChannelEvent::TransportDegraded { attempts } => {
                tracing::warn!(attempts, "Live updates unavailable");
                self.degraded = true;
            }
            ChannelEvent::Event(event) => {
                let registered = matches!(event, ServerEvent::Connected { .. });
                self.apply_event(event);
                // The channel receives fanout from here on. Anything published
                // before is only in history.
                if registered {
                    self.refresh().await?;
                }
            }
        }
        Ok(())
    }

    fn apply_event(&mut self, event: ServerEvent) {
        if let Some(id) = event.conversation_id() {
            if id != self.conversation_id {
                return;
            }
        }

        match event {
            ServerEvent::NewCustomerMessage { payload, .. }
            | ServerEvent::AgentReply { payload, .. } => {
                reconcile::apply(&mut self.view, &payload);
            }
            ServerEvent::MessageAccepted { payload, .. } => {
                reconcile::apply(&mut self.view, &payload.message);
            }
            ServerEvent::AnalysisReady { payload, .. } => {
                if !reconcile::attach_analysis(&mut self.view, &payload) {
                    tracing::debug!(message_id = %payload.message_id, "Analysis for message not in view");
                }
            }
            ServerEvent::ConversationAssigned { payload, .. }
            | ServerEvent::ConversationUnassigned { payload, .. } => {
                self.assigned_agent = payload.assigned_agent_id;
            }
            ServerEvent::Connected { session_id } => self.session_id = Some(session_id),
            ServerEvent::Error { message } => {
                tracing::warn!(message = %message, "Server reported an error");
            }
            ServerEvent::Pong => {}
        }
    }

    /// Process channel notifications until the channel stops for good,
    /// failing optimistic entries that outlive the ack timeout along the way
    pub async fn run(&mut self, channel: &mut ChannelHandle) {
        let mut expiry = tokio::time::interval(DEFAULT_EXPIRY_INTERVAL);
        expiry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = channel.next_event() => {
                    let Some(event) = event else { break };
                    if let Err(e) = self.handle(event).await {
                        tracing::warn!(error = %e, "Failed to apply channel event");
                    }
                }
                _ = expiry.tick() => {
                    let expired = self.expire_pending();
                    if expired > 0 {
                        tracing::debug!(expired, "Unconfirmed messages marked failed");
                    }
                }
            }
        }
    }
}
