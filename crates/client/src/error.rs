//! Client error types

use supportsync_shared::SyncError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Claim lost or release refused by the server
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other error response from the server
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The request never got a response
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The live channel has been shut down
    #[error("Channel closed")]
    ChannelClosed,
}

impl ClientError {
    /// True when the server definitely rejected the request
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ClientError::Conflict(_) | ClientError::NotFound(_) | ClientError::Api { .. }
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

impl From<ClientError> for SyncError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Conflict(_) => SyncError::Conflict { holder: None },
            ClientError::Transport(msg) => SyncError::Transport(msg),
            ClientError::ChannelClosed => SyncError::Transport("channel closed".to_string()),
            other => SyncError::Store(other.to_string()),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
