//! Error types for SupportSync

use thiserror::Error;

use crate::types::{AgentId, ConversationId};

/// Failure taxonomy of the synchronization core
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Claim race lost, or release attempted by an agent that does not hold the claim
    #[error("Conversation already claimed")]
    Conflict { holder: Option<AgentId> },

    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    #[error("Conversation is closed: {0}")]
    ConversationClosed(ConversationId),

    /// Live channel dropped. Recovered by reconnecting, never fatal.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Analysis could not be produced. Always absorbed.
    #[error("Analysis unavailable: {0}")]
    AnalysisUnavailable(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl SyncError {
    /// Errors the initiating caller must see
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            SyncError::Conflict { .. }
                | SyncError::ConversationNotFound(_)
                | SyncError::ConversationClosed(_)
                | SyncError::Store(_)
        )
    }
}

/// Result alias for core operations
pub type SyncResult<T> = Result<T, SyncError>;
