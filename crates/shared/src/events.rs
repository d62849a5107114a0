//! WebSocket event types and serialization
//!
//! Defines all client-to-server and server-to-client event types
//! with type-safe serde serialization. Every conversation event carries the
//! envelope fields `type`, `conversation_id`, `payload` and `server_timestamp`.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::types::{AgentId, AnalysisResult, ConversationId, Message, Role};

/// Close code a server uses to end a participant's session for good.
/// Clients must not reconnect after receiving it.
pub const CLOSE_CODE_SESSION_ENDED: u16 = 4000;

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Heartbeat ping to keep connection alive
    Ping,

    /// Send a message over the live channel instead of HTTP
    SendMessage {
        conversation_id: ConversationId,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachment_ref: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        derived_text: Option<String>,
        /// Opaque client reference echoed back in `message_accepted`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
    },
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Customer message accepted by the store
    NewCustomerMessage {
        conversation_id: ConversationId,
        payload: Message,
        #[serde(with = "time::serde::rfc3339")]
        server_timestamp: OffsetDateTime,
    },

    /// Agent message accepted by the store
    AgentReply {
        conversation_id: ConversationId,
        payload: Message,
        #[serde(with = "time::serde::rfc3339")]
        server_timestamp: OffsetDateTime,
    },

    /// AI analysis finished for a customer message
    AnalysisReady {
        conversation_id: ConversationId,
        payload: AnalysisResult,
        #[serde(with = "time::serde::rfc3339")]
        server_timestamp: OffsetDateTime,
    },

    /// An agent claimed the conversation
    ConversationAssigned {
        conversation_id: ConversationId,
        payload: AssignmentChange,
        #[serde(with = "time::serde::rfc3339")]
        server_timestamp: OffsetDateTime,
    },

    /// The conversation went back to the unclaimed pool
    ConversationUnassigned {
        conversation_id: ConversationId,
        payload: AssignmentChange,
        #[serde(with = "time::serde::rfc3339")]
        server_timestamp: OffsetDateTime,
    },

    /// Direct acknowledgment to the channel that sent a message
    MessageAccepted {
        conversation_id: ConversationId,
        payload: MessageAck,
        #[serde(with = "time::serde::rfc3339")]
        server_timestamp: OffsetDateTime,
    },

    /// Heartbeat response
    Pong,

    /// Error message
    Error { message: String },

    /// Connection acknowledged
    Connected { session_id: Uuid },
}

// =============================================================================
// Event Data Structures
// =============================================================================

/// Assignment transition data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentChange {
    pub assigned_agent_id: Option<AgentId>,
    /// Agent that let go. Only present on unassignment: claims start from unassigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_agent_id: Option<AgentId>,
}

/// Acknowledgment of an accepted message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
    pub message: Message,
}

impl ServerEvent {
    /// Wrap an accepted message in the event matching its sender role
    pub fn message(message: Message) -> Self {
        let conversation_id = message.conversation_id;
        let server_timestamp = OffsetDateTime::now_utc();
        match message.sender_role {
            Role::Customer => ServerEvent::NewCustomerMessage {
                conversation_id,
                payload: message,
                server_timestamp,
            },
            Role::Agent => ServerEvent::AgentReply {
                conversation_id,
                payload: message,
                server_timestamp,
            },
        }
    }

    pub fn analysis_ready(conversation_id: ConversationId, analysis: AnalysisResult) -> Self {
        ServerEvent::AnalysisReady {
            conversation_id,
            payload: analysis,
            server_timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn assigned(conversation_id: ConversationId, agent: AgentId) -> Self {
        ServerEvent::ConversationAssigned {
            conversation_id,
            payload: AssignmentChange {
                assigned_agent_id: Some(agent),
                previous_agent_id: None,
            },
            server_timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn unassigned(conversation_id: ConversationId, previous: AgentId) -> Self {
        ServerEvent::ConversationUnassigned {
            conversation_id,
            payload: AssignmentChange {
                assigned_agent_id: None,
                previous_agent_id: Some(previous),
            },
            server_timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn accepted(client_ref: Option<String>, message: Message) -> Self {
        ServerEvent::MessageAccepted {
            conversation_id: message.conversation_id,
            payload: MessageAck {
                client_ref,
                message,
            },
            server_timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Conversation this event belongs to, if any
    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            ServerEvent::NewCustomerMessage { conversation_id, .. }
            | ServerEvent::AgentReply { conversation_id, .. }
            | ServerEvent::AnalysisReady { conversation_id, .. }
            | ServerEvent::ConversationAssigned { conversation_id, .. }
            | ServerEvent::ConversationUnassigned { conversation_id, .. }
            | ServerEvent::MessageAccepted { conversation_id, .. } => Some(*conversation_id),
            ServerEvent::Pong | ServerEvent::Error { .. } | ServerEvent::Connected { .. } => None,
        }
    }

    /// Wire name of the event type
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::NewCustomerMessage { .. } => "new_customer_message",
            ServerEvent::AgentReply { .. } => "agent_reply",
            ServerEvent::AnalysisReady { .. } => "analysis_ready",
            ServerEvent::ConversationAssigned { .. } => "conversation_assigned",
            ServerEvent::ConversationUnassigned { .. } => "conversation_unassigned",
            ServerEvent::MessageAccepted { .. } => "message_accepted",
            ServerEvent::Pong => "pong",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Connected { .. } => "connected",
        }
    }
}
