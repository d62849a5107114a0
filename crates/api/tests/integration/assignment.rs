//! Claim and release behavior as seen by agents' dashboards

use std::sync::Arc;

use supportsync_api::{
    analysis::DisabledAnalyzer,
    assignment::{ClaimOutcome, ReleaseOutcome},
    store::ConversationStore,
};
use supportsync_shared::{AgentId, ServerEvent, SyncError};

use crate::common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_one_winner() {
    let (service, store) = service();
    let conversation = open(&service).await;
    let agent_a = AgentId::new();
    let agent_b = AgentId::new();

    let (a, b) = tokio::join!(
        {
            let service = Arc::clone(&service);
            async move { service.claim_conversation(conversation.id, agent_a).await }
        },
        {
            let service = Arc::clone(&service);
            async move { service.claim_conversation(conversation.id, agent_b).await }
        }
    );

    let results = [a, b];
    let wins = results
        .iter()
        .filter(|r| matches!(r, Ok(ClaimOutcome::Claimed)))
        .count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(SyncError::Conflict { .. })))
        .count();
    assert_eq!((wins, conflicts), (1, 1));

    let persisted = store.get_conversation(conversation.id).await.unwrap();
    let holder = persisted.assigned_agent_id.unwrap();
    assert!(holder == agent_a || holder == agent_b);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_across_processes() {
    // Two core instances, separate locks and caches, one shared store
    let (first, store) = service();
    let second = service_on(store.clone(), Arc::new(DisabledAnalyzer));
    let conversation = open(&first).await;

    let mut handles = Vec::new();
    for (i, svc) in [first, second].into_iter().cycle().take(8).enumerate() {
        let agent = AgentId::new();
        let id = conversation.id;
        handles.push(tokio::spawn(async move {
            (i, agent, svc.claim_conversation(id, agent).await)
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        let (_, agent, result) = handle.await.unwrap();
        match result {
            Ok(ClaimOutcome::Claimed) => winners.push(agent),
            Err(SyncError::Conflict { holder }) => assert!(holder.is_some()),
            other => panic!("Unexpected claim result: {:?}", other),
        }
    }

    assert_eq!(winners.len(), 1);
    let persisted = store.get_conversation(conversation.id).await.unwrap();
    assert_eq!(persisted.assigned_agent_id, Some(winners[0]));
}

#[tokio::test]
async fn test_conflict_leaves_both_dashboards_on_holder() {
    let (service, _store) = service();
    let conversation = open(&service).await;
    let agent_a = AgentId::new();
    let agent_b = AgentId::new();
    let mut dash_a = connect_agent(&service, agent_a).await;
    let mut dash_b = connect_agent(&service, agent_b).await;

    service
        .claim_conversation(conversation.id, agent_a)
        .await
        .unwrap();
    let result = service.claim_conversation(conversation.id, agent_b).await;
    assert_eq!(
        result,
        Err(SyncError::Conflict {
            holder: Some(agent_a)
        })
    );

    for events in [drain(&mut dash_a), drain(&mut dash_b)] {
        assert_eq!(events.len(), 1);
        match &events[0] {
            ServerEvent::ConversationAssigned {
                conversation_id,
                payload,
                ..
            } => {
                assert_eq!(*conversation_id, conversation.id);
                assert_eq!(payload.assigned_agent_id, Some(agent_a));
            }
            other => panic!("Expected ConversationAssigned, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_release_and_reclaim_are_idempotent() {
    let (service, store) = service();
    let conversation = open(&service).await;
    let agent = AgentId::new();
    let mut dashboard = connect_agent(&service, agent).await;

    // Release while unassigned: success, no event
    assert_eq!(
        service
            .release_conversation(conversation.id, None)
            .await
            .unwrap(),
        ReleaseOutcome::AlreadyUnassigned
    );
    assert!(drain(&mut dashboard).is_empty());

    // Claim twice: one event
    service
        .claim_conversation(conversation.id, agent)
        .await
        .unwrap();
    assert_eq!(
        service
            .claim_conversation(conversation.id, agent)
            .await
            .unwrap(),
        ClaimOutcome::AlreadyHeld
    );
    assert_eq!(kinds(&drain(&mut dashboard)), vec!["conversation_assigned"]);

    // Release twice: one event
    assert_eq!(
        service
            .release_conversation(conversation.id, Some(agent))
            .await
            .unwrap(),
        ReleaseOutcome::Released { previous: agent }
    );
    assert_eq!(
        service
            .release_conversation(conversation.id, Some(agent))
            .await
            .unwrap(),
        ReleaseOutcome::AlreadyUnassigned
    );
    assert_eq!(
        kinds(&drain(&mut dashboard)),
        vec!["conversation_unassigned"]
    );

    let persisted = store.get_conversation(conversation.id).await.unwrap();
    assert_eq!(persisted.assigned_agent_id, None);
}

#[tokio::test]
async fn test_agent_disconnect_keeps_claim() {
    let (service, store) = service();
    let conversation = open(&service).await;
    let holder = AgentId::new();
    let other = AgentId::new();

    let holder_channel = connect_agent(&service, holder).await;
    let mut other_dashboard = connect_agent(&service, other).await;

    service
        .claim_conversation(conversation.id, holder)
        .await
        .unwrap();
    drain(&mut other_dashboard);

    // Holder's only channel goes away
    assert!(service.unsubscribe(&holder_channel.handle).await);
    drop(holder_channel);

    let persisted = store.get_conversation(conversation.id).await.unwrap();
    assert_eq!(persisted.assigned_agent_id, Some(holder));

    // Customer traffic still routes to the absent holder only
    service
        .send_message(customer_says(&conversation, "anyone there?"))
        .await
        .unwrap();
    assert!(drain(&mut other_dashboard).is_empty());

    // Holder comes back and catches up from history
    let history = service
        .conversation_history(conversation.id)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "anyone there?");
}

#[tokio::test]
async fn test_closed_conversation_rejects_claims_and_messages() {
    let (service, _store) = service();
    let conversation = open(&service).await;

    service.close_conversation(conversation.id).await.unwrap();

    assert_eq!(
        service
            .claim_conversation(conversation.id, AgentId::new())
            .await,
        Err(SyncError::ConversationClosed(conversation.id))
    );
    assert_eq!(
        service
            .send_message(customer_says(&conversation, "hello?"))
            .await,
        Err(SyncError::ConversationClosed(conversation.id))
    );
}
