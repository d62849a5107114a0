//! Live channel of one participant

use time::OffsetDateTime;
use tokio::sync::mpsc;
use uuid::Uuid;

use supportsync_shared::{Participant, ServerEvent};

/// One open live channel. A participant may hold several at once.
#[derive(Debug)]
pub struct Connection {
    /// Unique session ID for this channel
    pub session_id: Uuid,

    /// Participant that opened the channel
    pub participant: Participant,

    /// Outbound queue drained by the socket's send task
    pub sender: mpsc::UnboundedSender<ServerEvent>,

    pub connected_at: OffsetDateTime,
}

impl Connection {
    pub fn new(participant: Participant, sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            participant,
            sender,
            connected_at: OffsetDateTime::now_utc(),
        }
    }

    /// Queue an event on this channel
    ///
    /// Returns Err if the receiving side has gone away
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed event
    pub fn send(&self, event: ServerEvent) -> Result<(), mpsc::error::SendError<ServerEvent>> {
        self.sender.send(event)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
