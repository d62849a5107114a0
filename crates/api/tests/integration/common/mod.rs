//! Shared test utilities

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use supportsync_api::{
    analysis::{Analyzer, DisabledAnalyzer},
    store::{ConversationStore, MemoryStore},
    ConversationService, SendMessage, Subscription,
};
use supportsync_shared::{
    AgentId, AnalysisResult, Conversation, CustomerId, Message, Participant, ServerEvent,
    SyncError,
};

pub const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(15);

/// Service over a fresh in-memory store with analysis disabled
pub fn service() -> (Arc<ConversationService>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let service = service_on(store.clone(), Arc::new(DisabledAnalyzer));
    (service, store)
}

/// Service over an existing store, as a second process would see it
pub fn service_on(
    store: Arc<dyn ConversationStore>,
    analyzer: Arc<dyn Analyzer>,
) -> Arc<ConversationService> {
    Arc::new(ConversationService::new(store, analyzer, ANALYSIS_TIMEOUT))
}

pub async fn open(service: &ConversationService) -> Conversation {
    service
        .open_conversation(CustomerId::new())
        .await
        .expect("open conversation")
}

pub async fn connect_agent(service: &ConversationService, agent: AgentId) -> Subscription {
    service.subscribe(Participant::agent(agent)).await
}

pub async fn connect_customer(service: &ConversationService, customer: CustomerId) -> Subscription {
    service.subscribe(Participant::customer(customer)).await
}

pub fn customer_says(conversation: &Conversation, content: &str) -> SendMessage {
    SendMessage {
        conversation_id: conversation.id,
        sender: Participant::customer(conversation.customer_id),
        content: content.to_string(),
        attachment_ref: None,
        derived_text: None,
        origin: None,
        client_ref: None,
    }
}

pub fn agent_says(conversation: &Conversation, agent: AgentId, content: &str) -> SendMessage {
    SendMessage {
        conversation_id: conversation.id,
        sender: Participant::agent(agent),
        content: content.to_string(),
        attachment_ref: None,
        derived_text: None,
        origin: None,
        client_ref: None,
    }
}

/// Everything queued on a channel so far
pub fn drain(subscription: &mut Subscription) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = subscription.receiver.try_recv() {
        events.push(event);
    }
    events
}

pub fn kinds(events: &[ServerEvent]) -> Vec<&'static str> {
    events.iter().map(ServerEvent::kind).collect()
}

/// Messages carried by message events, in delivery order
pub fn delivered_messages(events: &[ServerEvent]) -> Vec<Message> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::NewCustomerMessage { payload, .. }
            | ServerEvent::AgentReply { payload, .. } => Some(payload.clone()),
            _ => None,
        })
        .collect()
}

/// Analyzer whose call never completes
#[derive(Default)]
pub struct HangingAnalyzer {
    pub calls: AtomicUsize,
}

impl HangingAnalyzer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyzer for HangingAnalyzer {
    async fn analyze(&self, _message: &Message) -> Result<AnalysisResult, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}
