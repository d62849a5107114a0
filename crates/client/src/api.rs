//! HTTP client for the conversation endpoints

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use supportsync_shared::{
    AgentId, Conversation, ConversationId, ConversationSummary, CustomerId, Message, Participant,
    Role,
};

use crate::error::{ClientError, ClientResult};

/// Message as sent by a participant
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMessage {
    pub sender_id: Uuid,
    pub sender_role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derived_text: Option<String>,
    /// Live channel that should get `message_accepted` instead of the echo
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
}

impl OutgoingMessage {
    pub fn text(sender: Participant, content: impl Into<String>) -> Self {
        Self {
            sender_id: sender.id,
            sender_role: sender.role,
            content: content.into(),
            attachment_ref: None,
            derived_text: None,
            session_id: None,
            client_ref: None,
        }
    }
}

/// Result of a claim or release call
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssignmentResponse {
    pub conversation_id: ConversationId,
    pub assigned_agent_id: Option<AgentId>,
    pub changed: bool,
}

/// Server operations a participant session relies on
#[async_trait]
pub trait ConversationApi: Send + Sync {
    async fn open_conversation(&self, customer_id: CustomerId) -> ClientResult<Conversation>;

    async fn history(&self, id: ConversationId) -> ClientResult<Vec<Message>>;

    async fn send_message(
        &self,
        id: ConversationId,
        message: &OutgoingMessage,
    ) -> ClientResult<Message>;

    async fn claim(&self, id: ConversationId, agent: AgentId) -> ClientResult<AssignmentResponse>;

    async fn release(
        &self,
        id: ConversationId,
        agent: Option<AgentId>,
    ) -> ClientResult<AssignmentResponse>;

    async fn list_active(&self) -> ClientResult<Vec<ConversationSummary>>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// `reqwest` implementation against `/api/v1`
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Client whose requests give up after `timeout`
    pub fn new(base_url: &str, timeout: Duration) -> ClientResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: format!("{}/api/v1", base_url.trim_end_matches('/')),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl ConversationApi for ApiClient {
    async fn open_conversation(&self, customer_id: CustomerId) -> ClientResult<Conversation> {
        let response = self
            .client
            .post(self.url("/conversations"))
            .json(&serde_json::json!({ "customer_id": customer_id }))
            .send()
            .await?;
        parse(response).await
    }

    async fn history(&self, id: ConversationId) -> ClientResult<Vec<Message>> {
        let response = self
            .client
            .get(self.url(&format!("/conversations/{id}/messages")))
            .send()
            .await?;
        parse(response).await
    }

    async fn send_message(
        &self,
        id: ConversationId,
        message: &OutgoingMessage,
    ) -> ClientResult<Message> {
        let response = self
            .client
            .post(self.url(&format!("/conversations/{id}/messages")))
            .json(message)
            .send()
            .await?;
        parse(response).await
    }

    async fn claim(&self, id: ConversationId, agent: AgentId) -> ClientResult<AssignmentResponse> {
        let response = self
            .client
            .post(self.url(&format!("/conversations/{id}/claim")))
            .json(&serde_json::json!({ "agent_id": agent }))
            .send()
            .await?;
        parse(response).await
    }

    async fn release(
        &self,
        id: ConversationId,
        agent: Option<AgentId>,
    ) -> ClientResult<AssignmentResponse> {
        let response = self
            .client
            .post(self.url(&format!("/conversations/{id}/release")))
            .json(&serde_json::json!({ "agent_id": agent }))
            .send()
            .await?;
        parse(response).await
    }

    async fn list_active(&self) -> ClientResult<Vec<ConversationSummary>> {
        let response = self
            .client
            .get(self.url("/conversations/active"))
            .send()
            .await?;
        parse(response).await
    }
}

async fn parse<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let status = response.status();
    if status.is_success() {
        let bytes = response.bytes().await?;
        return Ok(serde_json::from_slice(&bytes)?);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error.message)
        .unwrap_or(body);
    tracing::debug!(status = %status, message = %message, "API request rejected");

    Err(error_for(status, message))
}

fn error_for(status: StatusCode, message: String) -> ClientError {
    match status {
        StatusCode::CONFLICT => ClientError::Conflict(message),
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        _ => ClientError::Api {
            status: status.as_u16(),
            message,
        },
    }
}
