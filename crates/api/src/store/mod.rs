//! Persistence collaborator
//!
//! The store is the only holder of durable truth. Everything the core keeps in
//! memory must be re-derivable from it.
//!
//! - **postgres**: sqlx-backed store shared by every server instance
//! - **memory**: process-local store with identical semantics

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use supportsync_shared::{
    AgentId, AnalysisResult, Conversation, ConversationId, ConversationSummary, CustomerId,
    Message, MessageId, NewMessage, SyncError,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Store error type
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("Conversation is closed: {0}")]
    ConversationClosed(ConversationId),

    /// Compare-and-set lost: the persisted assignment was not the expected one
    #[error("Assignment changed concurrently")]
    Conflict { current: Option<AgentId> },

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        StoreError::Database(err.to_string())
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConversationNotFound(id) => SyncError::ConversationNotFound(id),
            StoreError::ConversationClosed(id) => SyncError::ConversationClosed(id),
            StoreError::Conflict { current } => SyncError::Conflict { holder: current },
            StoreError::MessageNotFound(id) => SyncError::Store(format!("message {id} not found")),
            StoreError::Database(msg) => SyncError::Store(msg),
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable store for conversations and messages
#[async_trait]
pub trait ConversationStore: Send + Sync + 'static {
    /// Latest open conversation of the customer, created if none exists
    async fn open_conversation(&self, customer_id: CustomerId) -> StoreResult<Conversation>;

    async fn get_conversation(&self, id: ConversationId) -> StoreResult<Conversation>;

    async fn close_conversation(&self, id: ConversationId) -> StoreResult<Conversation>;

    /// Persist a message, assigning its id, sequence and timestamp
    async fn create_message(&self, message: NewMessage) -> StoreResult<Message>;

    /// All messages of a conversation in sequence order
    async fn conversation_history(&self, id: ConversationId) -> StoreResult<Vec<Message>>;

    /// Compare-and-set on the assignment field.
    ///
    /// Succeeds only if the persisted assignment equals `expected_prior` and the
    /// conversation is open; otherwise returns [`StoreError::Conflict`] carrying
    /// the current holder.
    async fn set_assignment(
        &self,
        id: ConversationId,
        agent: Option<AgentId>,
        expected_prior: Option<AgentId>,
    ) -> StoreResult<Conversation>;

    async fn list_active_conversations(&self) -> StoreResult<Vec<ConversationSummary>>;

    async fn save_analysis(&self, analysis: &AnalysisResult) -> StoreResult<()>;

    /// Connectivity check for readiness probes
    async fn ping(&self) -> StoreResult<()>;
}
