//! Background analysis runs
//!
//! Each customer message gets one analysis attempt bounded by a timeout. A
//! result is persisted next to the message and published as `analysis_ready`.
//! Any failure is logged and dropped, there is no retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use supportsync_shared::{ConversationId, Message, ServerEvent};

use super::Analyzer;
use crate::store::ConversationStore;
use crate::websocket::FanoutDispatcher;

/// Cancellation scope of one conversation's runs
struct InFlight {
    token: CancellationToken,
    runs: usize,
}

type InFlightTable = Arc<Mutex<HashMap<ConversationId, InFlight>>>;

pub struct AnalysisPipeline {
    analyzer: Arc<dyn Analyzer>,
    store: Arc<dyn ConversationStore>,
    fanout: Arc<FanoutDispatcher>,
    timeout: Duration,
    /// Entries exist only while a conversation has runs in flight
    in_flight: InFlightTable,
    shutdown: CancellationToken,
}

impl AnalysisPipeline {
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        store: Arc<dyn ConversationStore>,
        fanout: Arc<FanoutDispatcher>,
        timeout: Duration,
    ) -> Self {
        Self {
            analyzer,
            store,
            fanout,
            timeout,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start analyzing a message without waiting for the result
    pub async fn spawn(&self, message: Message) -> JoinHandle<()> {
        let conversation_id = message.conversation_id;
        let token = {
            let mut in_flight = self.in_flight.lock().await;
            let entry = in_flight
                .entry(conversation_id)
                .or_insert_with(|| InFlight {
                    token: self.shutdown.child_token(),
                    runs: 0,
                });
            entry.runs += 1;
            entry.token.clone()
        };

        let run = AnalysisRun {
            analyzer: Arc::clone(&self.analyzer),
            store: Arc::clone(&self.store),
            fanout: Arc::clone(&self.fanout),
            timeout: self.timeout,
            token: token.clone(),
        };
        let in_flight = Arc::clone(&self.in_flight);

        tokio::spawn(async move {
            run.execute(message).await;
            finish_run(&in_flight, conversation_id, &token).await;
        })
    }

    /// Conversations with analysis runs in flight
    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Abort every in-flight run of a conversation
    pub async fn cancel_conversation(&self, id: ConversationId) {
        if let Some(entry) = self.in_flight.lock().await.remove(&id) {
            entry.token.cancel();
            tracing::debug!(conversation_id = %id, "Cancelled pending analysis");
        }
    }

    /// Abort every in-flight run
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Drop a conversation's entry once its last run is done
async fn finish_run(in_flight: &InFlightTable, id: ConversationId, token: &CancellationToken) {
    // A cancelled run's entry was already removed, and may have been replaced
    if token.is_cancelled() {
        return;
    }

    let mut in_flight = in_flight.lock().await;
    if let Some(entry) = in_flight.get_mut(&id) {
        entry.runs = entry.runs.saturating_sub(1);
        if entry.runs == 0 {
            in_flight.remove(&id);
        }
    }
}

/// One analysis attempt and what it needs
struct AnalysisRun {
    analyzer: Arc<dyn Analyzer>,
    store: Arc<dyn ConversationStore>,
    fanout: Arc<FanoutDispatcher>,
    timeout: Duration,
    token: CancellationToken,
}

impl AnalysisRun {
    async fn execute(self, message: Message) {
        let conversation_id = message.conversation_id;
        let message_id = message.id;
        let timeout = self.timeout;

        tokio::select! {
            _ = self.token.cancelled() => {
                tracing::debug!(
                    conversation_id = %conversation_id,
                    message_id = %message_id,
                    "Analysis cancelled"
                );
            }
            result = tokio::time::timeout(timeout, self.analyzer.analyze(&message)) => {
                let analysis = match result {
                    Ok(Ok(analysis)) => analysis,
                    Ok(Err(e)) => {
                        tracing::debug!(
                            conversation_id = %conversation_id,
                            message_id = %message_id,
                            error = %e,
                            "Analysis unavailable"
                        );
                        return;
                    }
                    Err(_) => {
                        tracing::debug!(
                            conversation_id = %conversation_id,
                            message_id = %message_id,
                            timeout_ms = timeout.as_millis() as u64,
                            "Analysis timed out"
                        );
                        return;
                    }
                };

                if self.token.is_cancelled() {
                    return;
                }

                if let Err(e) = self.store.save_analysis(&analysis).await {
                    tracing::warn!(
                        message_id = %message_id,
                        error = %e,
                        "Failed to persist analysis"
                    );
                    return;
                }

                self.fanout
                    .publish(
                        conversation_id,
                        ServerEvent::analysis_ready(conversation_id, analysis),
                        None,
                    )
                    .await;
            }
        }
    }
}
