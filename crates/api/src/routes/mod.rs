//! API routes

pub mod conversations;
pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{state::AppState, websocket::ws_handler};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    let conversation_routes = Router::new()
        .route("/conversations", post(conversations::open_conversation))
        .route("/conversations/active", get(conversations::list_active))
        .route(
            "/conversations/:conversation_id/messages",
            get(conversations::get_messages).post(conversations::send_message),
        )
        .route(
            "/conversations/:conversation_id/claim",
            post(conversations::claim),
        )
        .route(
            "/conversations/:conversation_id/release",
            post(conversations::release),
        )
        .route(
            "/conversations/:conversation_id/close",
            post(conversations::close),
        );

    // Live channel (identity handled in handler via query parameters)
    let websocket_routes = Router::new().route("/ws", get(ws_handler));

    Router::new()
        .merge(health_routes)
        .merge(websocket_routes)
        .nest("/api/v1", conversation_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
