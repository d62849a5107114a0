//! WebSocket handler for Axum
//!
//! Upgrades the connection, registers the channel and relays events both ways.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use serde::Deserialize;
use uuid::Uuid;

use supportsync_shared::{
    ClientEvent, Participant, Role, ServerEvent, SyncError, CLOSE_CODE_SESSION_ENDED,
};

use crate::service::SendMessage;
use crate::state::AppState;

/// Identity is issued by the external session layer and taken as given
#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    identity: Uuid,
    role: Role,
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    Query(params): Query<WebSocketQuery>,
) -> Response {
    let participant = Participant {
        id: params.identity,
        role: params.role,
    };

    tracing::info!(participant = %participant, "WebSocket connection upgrade requested");

    ws.on_upgrade(move |socket| handle_socket(socket, participant, app_state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, participant: Participant, app_state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let mut subscription = app_state.service.subscribe(participant).await;
    let handle = subscription.handle;
    let session_id = handle.session_id;
    let registry = app_state.service.registry().clone();

    // Send connection acknowledgment
    registry
        .send_to(session_id, ServerEvent::Connected { session_id })
        .await;

    // Spawn task to send events to client
    let send_task = tokio::spawn(async move {
        while let Some(event) = subscription.next().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        return; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                }
            }
        }

        // Subscription dropped by the server: tell the client not to come back
        let frame = CloseFrame {
            code: CLOSE_CODE_SESSION_ENDED,
            reason: "session ended".into(),
        };
        let _ = sender.send(Message::Close(Some(frame))).await;
    });

    // Handle incoming messages
    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "WebSocket receive error");
                break;
            }
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => handle_client_event(event, participant, session_id, &app_state).await,
                Err(e) => {
                    tracing::warn!(
                        error = ?e,
                        session_id = %session_id,
                        "Failed to parse client event"
                    );
                    registry
                        .send_to(
                            session_id,
                            ServerEvent::Error {
                                message: "Invalid event format".to_string(),
                            },
                        )
                        .await;
                }
            },
            Message::Close(_) => {
                tracing::info!(session_id = %session_id, "WebSocket close frame received");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Axum handles ping/pong automatically
            }
            Message::Binary(_) => {}
        }
    }

    // Cleanup on disconnect. Claims stay with the agent.
    tracing::info!(
        session_id = %session_id,
        participant = %participant,
        "WebSocket connection closing"
    );
    app_state.service.unsubscribe(&handle).await;

    send_task.abort();
}

/// Handle client event
async fn handle_client_event(
    event: ClientEvent,
    participant: Participant,
    session_id: Uuid,
    app_state: &AppState,
) {
    let registry = app_state.service.registry();

    match event {
        ClientEvent::Ping => {
            registry.send_to(session_id, ServerEvent::Pong).await;
        }

        ClientEvent::SendMessage {
            conversation_id,
            content,
            attachment_ref,
            derived_text,
            client_ref,
        } => {
            if content.trim().is_empty() && attachment_ref.is_none() {
                registry
                    .send_to(
                        session_id,
                        ServerEvent::Error {
                            message: "Message must have content or an attachment".to_string(),
                        },
                    )
                    .await;
                return;
            }

            let request = SendMessage {
                conversation_id,
                sender: participant,
                content,
                attachment_ref,
                derived_text,
                origin: Some(session_id),
                client_ref,
            };

            if let Err(e) = app_state.service.send_message(request).await {
                tracing::warn!(
                    session_id = %session_id,
                    conversation_id = %conversation_id,
                    error = %e,
                    "Failed to send message over WebSocket"
                );
                let message = match &e {
                    SyncError::Store(_) => "Message could not be stored".to_string(),
                    e if e.is_user_visible() => e.to_string(),
                    _ => "Internal error".to_string(),
                };
                registry
                    .send_to(session_id, ServerEvent::Error { message })
                    .await;
            }
        }
    }
}
