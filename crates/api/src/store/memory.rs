//! Process-local conversation store
//!
//! Same semantics as the Postgres store. Useful for development and tests, and
//! for exercising several core instances against one shared store.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use supportsync_shared::{
    AgentId, AnalysisResult, Conversation, ConversationId, ConversationStatus,
    ConversationSummary, CustomerId, Message, MessageId, NewMessage,
};

use super::{ConversationStore, StoreError, StoreResult};

#[derive(Default)]
struct Inner {
    conversations: HashMap<ConversationId, Conversation>,
    /// Append-only log in sequence order
    messages: Vec<Message>,
    next_sequence: i64,
}

/// In-memory store guarded by a single mutex
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn open_conversation(&self, customer_id: CustomerId) -> StoreResult<Conversation> {
        let mut inner = self.inner.lock().await;

        let existing = inner
            .conversations
            .values()
            .filter(|c| c.customer_id == customer_id && c.is_open())
            .max_by_key(|c| c.created_at)
            .cloned();
        if let Some(conversation) = existing {
            return Ok(conversation);
        }

        let now = OffsetDateTime::now_utc();
        let conversation = Conversation {
            id: ConversationId::new(),
            customer_id,
            assigned_agent_id: None,
            status: ConversationStatus::Open,
            created_at: now,
            last_activity_at: now,
        };
        inner
            .conversations
            .insert(conversation.id, conversation.clone());

        tracing::info!(
            conversation_id = %conversation.id,
            customer_id = %customer_id,
            "Created conversation"
        );
        Ok(conversation)
    }

    async fn get_conversation(&self, id: ConversationId) -> StoreResult<Conversation> {
        let inner = self.inner.lock().await;
        inner
            .conversations
            .get(&id)
            .cloned()
            .ok_or(StoreError::ConversationNotFound(id))
    }

    async fn close_conversation(&self, id: ConversationId) -> StoreResult<Conversation> {
        let mut inner = self.inner.lock().await;
        let conversation = inner
            .conversations
            .get_mut(&id)
            .ok_or(StoreError::ConversationNotFound(id))?;

        conversation.status = ConversationStatus::Closed;
        conversation.last_activity_at = OffsetDateTime::now_utc();
        Ok(conversation.clone())
    }

    async fn create_message(&self, message: NewMessage) -> StoreResult<Message> {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc();

        let conversation = inner
            .conversations
            .get_mut(&message.conversation_id)
            .ok_or(StoreError::ConversationNotFound(message.conversation_id))?;
        if !conversation.is_open() {
            return Err(StoreError::ConversationClosed(message.conversation_id));
        }
        conversation.last_activity_at = now;

        inner.next_sequence += 1;
        let stored = Message {
            id: MessageId::new(),
            conversation_id: message.conversation_id,
            sequence: inner.next_sequence,
            sender_role: message.sender_role,
            sender_id: message.sender_id,
            content: message.content,
            attachment_ref: message.attachment_ref,
            derived_text: message.derived_text,
            created_at: now,
            analysis: None,
        };
        inner.messages.push(stored.clone());

        Ok(stored)
    }

    async fn conversation_history(&self, id: ConversationId) -> StoreResult<Vec<Message>> {
        let inner = self.inner.lock().await;
        if !inner.conversations.contains_key(&id) {
            return Err(StoreError::ConversationNotFound(id));
        }

        Ok(inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == id)
            .cloned()
            .collect())
    }

    async fn set_assignment(
        &self,
        id: ConversationId,
        agent: Option<AgentId>,
        expected_prior: Option<AgentId>,
    ) -> StoreResult<Conversation> {
        let mut inner = self.inner.lock().await;
        let conversation = inner
            .conversations
            .get_mut(&id)
            .ok_or(StoreError::ConversationNotFound(id))?;

        if !conversation.is_open() {
            return Err(StoreError::ConversationClosed(id));
        }
        if conversation.assigned_agent_id != expected_prior {
            return Err(StoreError::Conflict {
                current: conversation.assigned_agent_id,
            });
        }

        conversation.assigned_agent_id = agent;
        conversation.last_activity_at = OffsetDateTime::now_utc();
        Ok(conversation.clone())
    }

    async fn list_active_conversations(&self) -> StoreResult<Vec<ConversationSummary>> {
        let inner = self.inner.lock().await;

        let mut active: Vec<ConversationSummary> = inner
            .conversations
            .values()
            .filter(|c| c.is_open())
            .map(|c| ConversationSummary {
                conversation: c.clone(),
                last_message_summary: inner
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.conversation_id == c.id)
                    .map(|m| m.content.clone()),
            })
            .collect();

        active.sort_by(|a, b| b.conversation.created_at.cmp(&a.conversation.created_at));
        Ok(active)
    }

    async fn save_analysis(&self, analysis: &AnalysisResult) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let message = inner
            .messages
            .iter_mut()
            .find(|m| m.id == analysis.message_id)
            .ok_or(StoreError::MessageNotFound(analysis.message_id))?;

        message.analysis = Some(analysis.clone());
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use supportsync_shared::{Role, Sentiment, Suggestions};

    fn customer_message(conversation: &Conversation, content: &str) -> NewMessage {
        NewMessage {
            conversation_id: conversation.id,
            sender_role: Role::Customer,
            sender_id: conversation.customer_id.0,
            content: content.to_string(),
            attachment_ref: None,
            derived_text: None,
        }
    }

    #[tokio::test]
    async fn test_open_conversation_reuses_open_one() {
        let store = MemoryStore::new();
        let customer = CustomerId::new();

        let first = store.open_conversation(customer).await.unwrap();
        let second = store.open_conversation(customer).await.unwrap();
        assert_eq!(first.id, second.id);

        store.close_conversation(first.id).await.unwrap();
        let third = store.open_conversation(customer).await.unwrap();
        assert_ne!(first.id, third.id);
    }

    #[tokio::test]
    async fn test_sequence_is_monotonic() {
        let store = MemoryStore::new();
        let conversation = store.open_conversation(CustomerId::new()).await.unwrap();

        let a = store
            .create_message(customer_message(&conversation, "a"))
            .await
            .unwrap();
        let b = store
            .create_message(customer_message(&conversation, "b"))
            .await
            .unwrap();
        assert!(a.sequence < b.sequence);

        let history = store.conversation_history(conversation.id).await.unwrap();
        assert_eq!(history, vec![a, b]);
    }

    #[tokio::test]
    async fn test_closed_conversation_rejects_messages() {
        let store = MemoryStore::new();
        let conversation = store.open_conversation(CustomerId::new()).await.unwrap();
        store.close_conversation(conversation.id).await.unwrap();

        let result = store
            .create_message(customer_message(&conversation, "late"))
            .await;
        assert!(matches!(result, Err(StoreError::ConversationClosed(_))));
    }

    #[tokio::test]
    async fn test_set_assignment_reports_current_holder() {
        let store = MemoryStore::new();
        let conversation = store.open_conversation(CustomerId::new()).await.unwrap();
        let agent_a = AgentId::new();

        store
            .set_assignment(conversation.id, Some(agent_a), None)
            .await
            .unwrap();

        let lost = store
            .set_assignment(conversation.id, Some(AgentId::new()), None)
            .await;
        assert!(matches!(
            lost,
            Err(StoreError::Conflict { current: Some(holder) }) if holder == agent_a
        ));

        let released = store
            .set_assignment(conversation.id, None, Some(agent_a))
            .await
            .unwrap();
        assert_eq!(released.assigned_agent_id, None);
    }

    #[tokio::test]
    async fn test_list_active_carries_last_message() {
        let store = MemoryStore::new();
        let conversation = store.open_conversation(CustomerId::new()).await.unwrap();
        store
            .create_message(customer_message(&conversation, "first"))
            .await
            .unwrap();
        store
            .create_message(customer_message(&conversation, "latest"))
            .await
            .unwrap();

        let closed = store.open_conversation(CustomerId::new()).await.unwrap();
        store.close_conversation(closed.id).await.unwrap();

        let active = store.list_active_conversations().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].last_message_summary.as_deref(), Some("latest"));
    }

    #[tokio::test]
    async fn test_save_analysis_attaches_to_message() {
        let store = MemoryStore::new();
        let conversation = store.open_conversation(CustomerId::new()).await.unwrap();
        let message = store
            .create_message(customer_message(&conversation, "refund please"))
            .await
            .unwrap();

        let analysis = AnalysisResult {
            message_id: message.id,
            category: "billing".to_string(),
            category_confidence: 0.9,
            sentiment: Sentiment {
                label: "negative".to_string(),
                confidence: 0.7,
            },
            entities: Vec::new(),
            suggestions: Suggestions::default(),
        };
        store.save_analysis(&analysis).await.unwrap();

        let history = store.conversation_history(conversation.id).await.unwrap();
        assert_eq!(history[0].analysis.as_ref(), Some(&analysis));

        let missing = AnalysisResult {
            message_id: MessageId::new(),
            ..analysis
        };
        assert!(matches!(
            store.save_analysis(&missing).await,
            Err(StoreError::MessageNotFound(_))
        ));
    }
}
