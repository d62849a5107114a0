//! AI analysis collaborator
//!
//! The analyzer is opaque: message in, analysis out, and it may fail or never
//! answer. Failures are absorbed and the conversation carries on without
//! suggestions.
//!
//! - **http**: analyzer backed by an external HTTP service
//! - **pipeline**: cancellable background runs that persist and publish results

pub mod http;
pub mod pipeline;

pub use http::HttpAnalyzer;
pub use pipeline::AnalysisPipeline;

use async_trait::async_trait;
use supportsync_shared::{AnalysisResult, Message, SyncError};

#[async_trait]
pub trait Analyzer: Send + Sync + 'static {
    /// Analyze one customer message
    ///
    /// Errors are always [`SyncError::AnalysisUnavailable`].
    async fn analyze(&self, message: &Message) -> Result<AnalysisResult, SyncError>;
}

/// Analyzer used when no analysis service is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledAnalyzer;

#[async_trait]
impl Analyzer for DisabledAnalyzer {
    async fn analyze(&self, _message: &Message) -> Result<AnalysisResult, SyncError> {
        Err(SyncError::AnalysisUnavailable(
            "analysis is disabled".to_string(),
        ))
    }
}
