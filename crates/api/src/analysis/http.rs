//! HTTP analysis client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use supportsync_shared::{
    AnalysisResult, ConversationId, Entity, Message, MessageId, Sentiment, Suggestions, SyncError,
};

use super::Analyzer;

#[derive(Debug, Serialize)]
struct AnalysisRequest<'a> {
    message_id: MessageId,
    conversation_id: ConversationId,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    derived_text: Option<&'a str>,
}

/// Response body. The message id is ours to fill in.
#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    category: String,
    category_confidence: f32,
    sentiment: Sentiment,
    #[serde(default)]
    entities: Vec<Entity>,
    #[serde(default)]
    suggestions: Suggestions,
}

/// Analyzer posting messages to an external analysis endpoint
pub struct HttpAnalyzer {
    http_client: Client,
    endpoint_url: String,
}

impl HttpAnalyzer {
    pub fn new(endpoint_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            http_client,
            endpoint_url: endpoint_url.into(),
        })
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    async fn analyze(&self, message: &Message) -> Result<AnalysisResult, SyncError> {
        let unavailable = |e: reqwest::Error| SyncError::AnalysisUnavailable(e.to_string());

        let response = self
            .http_client
            .post(&self.endpoint_url)
            .json(&AnalysisRequest {
                message_id: message.id,
                conversation_id: message.conversation_id,
                content: &message.content,
                derived_text: message.derived_text.as_deref(),
            })
            .send()
            .await
            .map_err(unavailable)?
            .error_for_status()
            .map_err(unavailable)?;

        let body: AnalysisResponse = response.json().await.map_err(unavailable)?;
        let analysis = AnalysisResult {
            message_id: message.id,
            category: body.category,
            category_confidence: body.category_confidence,
            sentiment: body.sentiment,
            entities: body.entities,
            suggestions: body.suggestions,
        };

        analysis.validate().map_err(SyncError::AnalysisUnavailable)?;
        Ok(analysis)
    }
}
