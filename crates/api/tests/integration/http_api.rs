//! HTTP surface tests

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use supportsync_api::{
    analysis::DisabledAnalyzer,
    config::{Config, LogFormat, StoreBackend},
    routes::create_router,
    store::MemoryStore,
    AppState, ConversationService,
};
use supportsync_shared::{AgentId, CustomerId};

use crate::common::ANALYSIS_TIMEOUT;

fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".to_string(),
        log_format: LogFormat::Pretty,
        store_backend: StoreBackend::Memory,
        database_url: None,
        database_max_connections: 1,
        analysis_url: None,
        analysis_timeout_ms: ANALYSIS_TIMEOUT.as_millis() as u64,
    }
}

fn app() -> Router {
    let service = ConversationService::new(
        Arc::new(MemoryStore::new()),
        Arc::new(DisabledAnalyzer),
        ANALYSIS_TIMEOUT,
    );
    create_router(AppState::new(service, test_config()))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn open_conversation(app: &Router, customer: CustomerId) -> (String, Value) {
    let (status, body) = call(
        app,
        "POST",
        "/api/v1/conversations",
        Some(json!({ "customer_id": customer })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    (body["id"].as_str().unwrap().to_string(), body)
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = app();

    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, _) = call(&app, "GET", "/health/live", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&app, "GET", "/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_open_is_get_or_create() {
    let app = app();
    let customer = CustomerId::new();

    let (first, body) = open_conversation(&app, customer).await;
    let (second, _) = open_conversation(&app, customer).await;
    assert_eq!(first, second);
    assert_eq!(body["status"], "open");
    assert!(body["assigned_agent_id"].is_null());
}

#[tokio::test]
async fn test_send_and_fetch_history() {
    let app = app();
    let customer = CustomerId::new();
    let (id, _) = open_conversation(&app, customer).await;

    let (status, message) = call(
        &app,
        "POST",
        &format!("/api/v1/conversations/{id}/messages"),
        Some(json!({
            "sender_id": customer,
            "sender_role": "customer",
            "content": "Hello",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(message["content"], "Hello");

    let (status, history) = call(
        &app,
        "GET",
        &format!("/api/v1/conversations/{id}/messages"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["id"], message["id"]);

    let (_, active) = call(&app, "GET", "/api/v1/conversations/active", None).await;
    assert_eq!(active[0]["last_message_summary"], "Hello");
}

#[tokio::test]
async fn test_empty_message_rejected() {
    let app = app();
    let customer = CustomerId::new();
    let (id, _) = open_conversation(&app, customer).await;

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/v1/conversations/{id}/messages"),
        Some(json!({
            "sender_id": customer,
            "sender_role": "customer",
            "content": "   ",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_claim_conflict_is_409() {
    let app = app();
    let (id, _) = open_conversation(&app, CustomerId::new()).await;
    let claim_uri = format!("/api/v1/conversations/{id}/claim");

    let agent_a = AgentId::new();
    let (status, body) = call(&app, "POST", &claim_uri, Some(json!({ "agent_id": agent_a }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);

    // Same agent again: idempotent
    let (status, body) = call(&app, "POST", &claim_uri, Some(json!({ "agent_id": agent_a }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], false);

    let (status, body) = call(
        &app,
        "POST",
        &claim_uri,
        Some(json!({ "agent_id": AgentId::new() })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_release_without_body_is_idempotent() {
    let app = app();
    let (id, _) = open_conversation(&app, CustomerId::new()).await;
    let release_uri = format!("/api/v1/conversations/{id}/release");

    let (status, body) = call(&app, "POST", &release_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], false);
}

#[tokio::test]
async fn test_unknown_conversation_is_404() {
    let app = app();
    let (status, body) = call(
        &app,
        "GET",
        &format!("/api/v1/conversations/{}/messages", uuid::Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_close_removes_from_active() {
    let app = app();
    let (id, _) = open_conversation(&app, CustomerId::new()).await;

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/v1/conversations/{id}/close"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "closed");

    let (_, active) = call(&app, "GET", "/api/v1/conversations/active", None).await;
    assert!(active.as_array().unwrap().is_empty());
}
