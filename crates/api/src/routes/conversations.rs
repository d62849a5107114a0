//! Conversation routes
//!
//! Thin HTTP surface over the conversation service. Identities are supplied
//! by the caller; authentication happens upstream.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use supportsync_shared::{
    AgentId, Conversation, ConversationId, ConversationSummary, CustomerId, Message, Participant,
    Role,
};

use crate::{
    assignment::{ClaimOutcome, ReleaseOutcome},
    error::{ApiError, ApiResult},
    service::SendMessage,
    state::AppState,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct OpenConversationRequest {
    pub customer_id: CustomerId,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: Uuid,
    pub sender_role: Role,
    #[serde(default)]
    pub content: String,
    pub attachment_ref: Option<String>,
    pub derived_text: Option<String>,
    /// Live channel of the sender, excluded from the agent reply fanout
    pub session_id: Option<Uuid>,
    pub client_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub agent_id: AgentId,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReleaseRequest {
    /// When set, only this agent may release
    pub agent_id: Option<AgentId>,
}

#[derive(Debug, Serialize)]
pub struct AssignmentResponse {
    pub conversation_id: ConversationId,
    pub assigned_agent_id: Option<AgentId>,
    /// False when the request was an idempotent no-op
    pub changed: bool,
}

// =============================================================================
// Handlers
// =============================================================================

/// Latest open conversation of a customer, created if none exists
pub async fn open_conversation(
    State(state): State<AppState>,
    Json(req): Json<OpenConversationRequest>,
) -> ApiResult<Json<Conversation>> {
    let conversation = state.service.open_conversation(req.customer_id).await?;
    Ok(Json(conversation))
}

pub async fn list_active(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ConversationSummary>>> {
    let conversations = state.service.list_active_conversations().await?;
    Ok(Json(conversations))
}

/// Authoritative history, used on every (re)connect
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Message>>> {
    let messages = state
        .service
        .conversation_history(ConversationId(conversation_id))
        .await?;
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    if req.content.trim().is_empty() && req.attachment_ref.is_none() {
        return Err(ApiError::Validation(
            "Message must have content or an attachment".to_string(),
        ));
    }

    let message = state
        .service
        .send_message(SendMessage {
            conversation_id: ConversationId(conversation_id),
            sender: Participant {
                id: req.sender_id,
                role: req.sender_role,
            },
            content: req.content,
            attachment_ref: req.attachment_ref,
            derived_text: req.derived_text,
            origin: req.session_id,
            client_ref: req.client_ref,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn claim(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<ClaimRequest>,
) -> ApiResult<Json<AssignmentResponse>> {
    let conversation_id = ConversationId(conversation_id);
    let outcome = state
        .service
        .claim_conversation(conversation_id, req.agent_id)
        .await?;

    Ok(Json(AssignmentResponse {
        conversation_id,
        assigned_agent_id: Some(req.agent_id),
        changed: outcome == ClaimOutcome::Claimed,
    }))
}

pub async fn release(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    body: Option<Json<ReleaseRequest>>,
) -> ApiResult<Json<AssignmentResponse>> {
    let conversation_id = ConversationId(conversation_id);
    let req = body.map(|Json(req)| req).unwrap_or_default();

    let outcome = state
        .service
        .release_conversation(conversation_id, req.agent_id)
        .await?;

    Ok(Json(AssignmentResponse {
        conversation_id,
        assigned_agent_id: None,
        changed: matches!(outcome, ReleaseOutcome::Released { .. }),
    }))
}

pub async fn close(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<Conversation>> {
    let conversation = state
        .service
        .close_conversation(ConversationId(conversation_id))
        .await?;
    Ok(Json(conversation))
}
