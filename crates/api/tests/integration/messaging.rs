//! Message fanout, ordering and analysis isolation

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use supportsync_api::store::MemoryStore;
use supportsync_shared::{AgentId, Participant, Role, ServerEvent};

use crate::common::*;

#[tokio::test]
async fn test_customer_hello_reaches_customer_and_every_agent() {
    let (service, _store) = service();
    let conversation = open(&service).await;

    let mut customer = connect_customer(&service, conversation.customer_id).await;
    let mut agent_x = connect_agent(&service, AgentId::new()).await;
    let mut agent_y = connect_agent(&service, AgentId::new()).await;

    let accepted = service
        .send_message(customer_says(&conversation, "Hello"))
        .await
        .unwrap();

    for channel in [&mut customer, &mut agent_x, &mut agent_y] {
        let messages = delivered_messages(&drain(channel));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, accepted.id);
        assert_eq!(messages[0].content, "Hello");
        assert_eq!(messages[0].sender_role, Role::Customer);
    }
}

#[tokio::test]
async fn test_assigned_conversation_routes_to_holder_only() {
    let (service, _store) = service();
    let conversation = open(&service).await;
    let holder = AgentId::new();

    let mut holder_dash = connect_agent(&service, holder).await;
    let mut bystander = connect_agent(&service, AgentId::new()).await;

    service
        .claim_conversation(conversation.id, holder)
        .await
        .unwrap();
    drain(&mut holder_dash);
    drain(&mut bystander);

    service
        .send_message(customer_says(&conversation, "my order is late"))
        .await
        .unwrap();

    assert_eq!(delivered_messages(&drain(&mut holder_dash)).len(), 1);
    assert!(drain(&mut bystander).is_empty());
}

#[tokio::test]
async fn test_agent_reply_from_two_tabs() {
    let (service, _store) = service();
    let conversation = open(&service).await;
    let agent = AgentId::new();

    let mut customer = connect_customer(&service, conversation.customer_id).await;
    let mut tab_one = connect_agent(&service, agent).await;
    let mut tab_two = connect_agent(&service, agent).await;

    service
        .claim_conversation(conversation.id, agent)
        .await
        .unwrap();
    drain(&mut customer);
    drain(&mut tab_one);
    drain(&mut tab_two);

    let mut request = agent_says(&conversation, agent, "Happy to help");
    request.origin = Some(tab_one.handle.session_id);
    request.client_ref = Some("local-1".to_string());
    let reply = service.send_message(request).await.unwrap();

    // Originating tab: direct ack only, no echo
    let origin_events = drain(&mut tab_one);
    assert_eq!(kinds(&origin_events), vec!["message_accepted"]);
    match &origin_events[0] {
        ServerEvent::MessageAccepted { payload, .. } => {
            assert_eq!(payload.client_ref.as_deref(), Some("local-1"));
            assert_eq!(payload.message.id, reply.id);
        }
        other => panic!("Expected MessageAccepted, got {:?}", other),
    }

    // Other tab and the customer see the reply exactly once
    for channel in [&mut tab_two, &mut customer] {
        let events = drain(channel);
        assert_eq!(kinds(&events), vec!["agent_reply"]);
        assert_eq!(delivered_messages(&events)[0].id, reply.id);
    }
}

#[tokio::test]
async fn test_origin_must_belong_to_sender() {
    let (service, _store) = service();
    let conversation = open(&service).await;
    let elsewhere = open(&service).await;
    let agent = AgentId::new();

    let mut customer = connect_customer(&service, conversation.customer_id).await;
    let mut stranger = connect_customer(&service, elsewhere.customer_id).await;
    let mut dashboard = connect_agent(&service, agent).await;
    service
        .claim_conversation(conversation.id, agent)
        .await
        .unwrap();
    drain(&mut customer);
    drain(&mut stranger);
    drain(&mut dashboard);

    // Customer's channel passed as origin: the customer still gets the reply
    let mut request = agent_says(&conversation, agent, "On it");
    request.origin = Some(customer.handle.session_id);
    let reply = service.send_message(request).await.unwrap();

    let events = drain(&mut customer);
    assert_eq!(kinds(&events), vec!["agent_reply"]);
    assert_eq!(delivered_messages(&events)[0].id, reply.id);
    assert_eq!(kinds(&drain(&mut dashboard)), vec!["agent_reply"]);

    // A channel in another conversation never sees the message
    let mut request = agent_says(&conversation, agent, "Refund issued");
    request.origin = Some(stranger.handle.session_id);
    service.send_message(request).await.unwrap();

    assert!(drain(&mut stranger).is_empty());
    assert_eq!(kinds(&drain(&mut customer)), vec!["agent_reply"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sends_delivered_in_store_order() {
    let (service, _store) = service();
    let conversation = open(&service).await;
    let mut agent = connect_agent(&service, AgentId::new()).await;

    let sends = (0..20).map(|i| {
        let service = Arc::clone(&service);
        let request = customer_says(&conversation, &format!("message {i}"));
        tokio::spawn(async move { service.send_message(request).await })
    });
    for result in join_all(sends).await {
        result.unwrap().unwrap();
    }

    let delivered = delivered_messages(&drain(&mut agent));
    assert_eq!(delivered.len(), 20);
    assert!(delivered.windows(2).all(|w| w[0].sequence < w[1].sequence));

    let history = service
        .conversation_history(conversation.id)
        .await
        .unwrap();
    assert_eq!(history, delivered);
}

#[tokio::test(start_paused = true)]
async fn test_analysis_that_never_resolves() {
    let analyzer = Arc::new(HangingAnalyzer::default());
    let store = Arc::new(MemoryStore::new());
    let service = service_on(store, analyzer.clone());
    let conversation = open(&service).await;
    let agent = AgentId::new();

    let mut customer = connect_customer(&service, conversation.customer_id).await;
    let mut dashboard = connect_agent(&service, agent).await;

    service
        .send_message(customer_says(&conversation, "refund please"))
        .await
        .unwrap();

    // Conversation stays fully usable while analysis hangs
    service
        .claim_conversation(conversation.id, agent)
        .await
        .unwrap();
    service
        .send_message(agent_says(&conversation, agent, "Looking into it"))
        .await
        .unwrap();

    // Well past the analysis timeout
    tokio::time::sleep(ANALYSIS_TIMEOUT * 4).await;

    assert_eq!(analyzer.calls(), 1);
    let customer_events = drain(&mut customer);
    let dashboard_events = drain(&mut dashboard);
    assert!(!kinds(&customer_events).contains(&"analysis_ready"));
    assert!(!kinds(&dashboard_events).contains(&"analysis_ready"));
    assert_eq!(delivered_messages(&customer_events).len(), 2);

    let history = service
        .conversation_history(conversation.id)
        .await
        .unwrap();
    assert!(history.iter().all(|m| m.analysis.is_none()));
}

#[tokio::test]
async fn test_customer_cannot_post_to_foreign_conversation() {
    let (service, _store) = service();
    let conversation = open(&service).await;

    let mut request = customer_says(&conversation, "hi");
    request.sender = Participant::customer(supportsync_shared::CustomerId::new());

    assert!(service.send_message(request).await.is_err());
    let history = service
        .conversation_history(conversation.id)
        .await
        .unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn test_attachment_with_derived_text() {
    let (service, _store) = service();
    let conversation = open(&service).await;
    let mut agent = connect_agent(&service, AgentId::new()).await;

    let mut request = customer_says(&conversation, "");
    request.attachment_ref = Some("uploads/receipt.png".to_string());
    request.derived_text = Some("TOTAL 42.00".to_string());
    service.send_message(request).await.unwrap();

    let delivered = delivered_messages(&drain(&mut agent));
    assert_eq!(
        delivered[0].attachment_ref.as_deref(),
        Some("uploads/receipt.png")
    );
    assert_eq!(delivered[0].derived_text.as_deref(), Some("TOTAL 42.00"));
}

#[tokio::test]
async fn test_offline_agent_catches_up_from_history() {
    let (service, _store) = service();
    let conversation = open(&service).await;
    let agent = AgentId::new();

    let mut before = connect_agent(&service, agent).await;
    service
        .send_message(customer_says(&conversation, "one"))
        .await
        .unwrap();
    let seen_live = delivered_messages(&drain(&mut before));
    service.unsubscribe(&before.handle).await;

    // Published while the agent is away: not replayed
    service
        .send_message(customer_says(&conversation, "two"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    let mut after = connect_agent(&service, agent).await;
    assert!(drain(&mut after).is_empty());

    let history = service
        .conversation_history(conversation.id)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0], seen_live[0]);
    assert_eq!(history[1].content, "two");
}
