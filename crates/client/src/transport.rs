//! WebSocket link to the sync server

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::CloseFrame, Message},
    MaybeTlsStream, WebSocketStream,
};

use supportsync_shared::{ClientEvent, Participant, ServerEvent, CLOSE_CODE_SESSION_ENDED};

use crate::error::ClientResult;
use crate::reconnect::{CloseReason, Connector, Link, LinkEvent};

/// Connects a participant to `{ws_url}/ws`
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(ws_url: &str, participant: Participant) -> Self {
        Self {
            url: format!(
                "{}/ws?identity={}&role={}",
                ws_url.trim_end_matches('/'),
                participant.id,
                participant.role
            ),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Link = WsLink;

    async fn connect(&self) -> ClientResult<WsLink> {
        let (stream, _) = connect_async(self.url.as_str()).await?;
        Ok(WsLink { stream })
    }
}

pub struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Link for WsLink {
    async fn next_event(&mut self) -> LinkEvent {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return LinkEvent::Closed(CloseReason::Transport(e.to_string())),
                None => {
                    return LinkEvent::Closed(CloseReason::Transport(
                        "connection dropped".to_string(),
                    ))
                }
            };

            match msg {
                Message::Text(text) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => return LinkEvent::Event(event),
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring unparseable server event");
                    }
                },
                Message::Close(frame) => return LinkEvent::Closed(close_reason(frame.as_ref())),
                // Ping replies are queued by tungstenite itself
                Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn send(&mut self, event: &ClientEvent) -> ClientResult<()> {
        let json = serde_json::to_string(event)?;
        self.stream.send(Message::Text(json)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "WebSocket close failed");
        }
    }
}

fn close_reason(frame: Option<&CloseFrame<'_>>) -> CloseReason {
    match frame {
        Some(frame) if u16::from(frame.code) == CLOSE_CODE_SESSION_ENDED => CloseReason::SessionEnded,
        Some(frame) => CloseReason::Transport(format!(
            "closed by server ({}): {}",
            u16::from(frame.code),
            frame.reason
        )),
        None => CloseReason::Transport("closed by server".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use supportsync_shared::AgentId;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    #[test]
    fn test_connector_url_carries_identity() {
        let agent = Participant::agent(AgentId::new());
        let connector = WsConnector::new("ws://localhost:3000/", agent);
        assert_eq!(
            connector.url(),
            format!("ws://localhost:3000/ws?identity={}&role=agent", agent.id)
        );
    }

    #[test]
    fn test_session_ended_close_code() {
        let ended = CloseFrame {
            code: CloseCode::from(CLOSE_CODE_SESSION_ENDED),
            reason: "session ended".into(),
        };
        assert_eq!(close_reason(Some(&ended)), CloseReason::SessionEnded);

        let away = CloseFrame {
            code: CloseCode::Away,
            reason: "restarting".into(),
        };
        assert!(close_reason(Some(&away)).should_reconnect());
        assert!(close_reason(None).should_reconnect());
    }
}
