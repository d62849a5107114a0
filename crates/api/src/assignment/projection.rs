//! Cached view of who owns each conversation
//!
//! Re-derivable from the store at any time. Entries are written through by
//! this process's own transitions and loaded from the store on a miss. An
//! entry untouched for a TTL is reloaded on next use and eventually swept.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use supportsync_shared::{AgentId, Conversation, ConversationId, CustomerId, SyncResult};

use crate::store::ConversationStore;

/// Routing facts the fanout dispatcher needs for one conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationRoute {
    pub customer_id: CustomerId,
    pub assigned_agent: Option<AgentId>,
}

impl From<&Conversation> for ConversationRoute {
    fn from(conversation: &Conversation) -> Self {
        Self {
            customer_id: conversation.customer_id,
            assigned_agent: conversation.assigned_agent_id,
        }
    }
}

/// How long a cached route is trusted before it is reloaded
const DEFAULT_ROUTE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
struct CachedRoute {
    route: ConversationRoute,
    expires_at: Instant,
}

impl CachedRoute {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

struct RouteTable {
    entries: HashMap<ConversationId, CachedRoute>,
    next_sweep: Instant,
}

pub struct AssignmentProjection {
    store: Arc<dyn ConversationStore>,
    routes: RwLock<RouteTable>,
    ttl: Duration,
}

impl AssignmentProjection {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self::with_ttl(store, DEFAULT_ROUTE_TTL)
    }

    pub fn with_ttl(store: Arc<dyn ConversationStore>, ttl: Duration) -> Self {
        Self {
            store,
            routes: RwLock::new(RouteTable {
                entries: HashMap::new(),
                next_sweep: Instant::now() + ttl,
            }),
            ttl,
        }
    }

    /// Current route, loading it from the store if not cached or expired
    pub async fn route(&self, id: ConversationId) -> SyncResult<ConversationRoute> {
        if let Some(cached) = self.routes.read().await.entries.get(&id) {
            if !cached.is_expired(Instant::now()) {
                return Ok(cached.route);
            }
        }

        let conversation = self.store.get_conversation(id).await?;
        Ok(self.record(&conversation).await)
    }

    /// Overwrite the cached route with the persisted conversation
    pub async fn record(&self, conversation: &Conversation) -> ConversationRoute {
        let route = ConversationRoute::from(conversation);
        let now = Instant::now();

        let mut routes = self.routes.write().await;
        routes.entries.insert(
            conversation.id,
            CachedRoute {
                route,
                expires_at: now + self.ttl,
            },
        );

        // Conversations nobody touched for a full TTL are dropped
        if now >= routes.next_sweep {
            routes.entries.retain(|_, cached| !cached.is_expired(now));
            routes.next_sweep = now + self.ttl;
        }
        route
    }

    pub async fn forget(&self, id: ConversationId) {
        self.routes.write().await.entries.remove(&id);
    }

    pub async fn len(&self) -> usize {
        self.routes.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.routes.read().await.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_route_loads_on_miss_and_caches() {
        let store = Arc::new(MemoryStore::new());
        let customer = CustomerId::new();
        let conversation = store.open_conversation(customer).await.unwrap();
        let projection = AssignmentProjection::new(store.clone());

        assert!(projection.is_empty().await);
        let route = projection.route(conversation.id).await.unwrap();
        assert_eq!(route.customer_id, customer);
        assert_eq!(route.assigned_agent, None);
        assert_eq!(projection.len().await, 1);
    }

    #[tokio::test]
    async fn test_record_overwrites_cached_route() {
        let store = Arc::new(MemoryStore::new());
        let conversation = store.open_conversation(CustomerId::new()).await.unwrap();
        let projection = AssignmentProjection::new(store.clone());
        projection.route(conversation.id).await.unwrap();

        let agent = AgentId::new();
        let claimed = store
            .set_assignment(conversation.id, Some(agent), None)
            .await
            .unwrap();
        projection.record(&claimed).await;

        let route = projection.route(conversation.id).await.unwrap();
        assert_eq!(route.assigned_agent, Some(agent));

        projection.forget(conversation.id).await;
        assert!(projection.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_routes_are_swept() {
        let store = Arc::new(MemoryStore::new());
        let idle = store.open_conversation(CustomerId::new()).await.unwrap();
        let busy = store.open_conversation(CustomerId::new()).await.unwrap();
        let projection = AssignmentProjection::with_ttl(store.clone(), Duration::from_secs(60));

        projection.route(idle.id).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        projection.route(busy.id).await.unwrap();
        assert_eq!(projection.len().await, 1);

        // Evicted routes reload from the store
        let route = projection.route(idle.id).await.unwrap();
        assert_eq!(route.customer_id, idle.customer_id);
        assert_eq!(projection.len().await, 2);
    }

    #[tokio::test]
    async fn test_unknown_conversation() {
        let projection = AssignmentProjection::new(Arc::new(MemoryStore::new()));
        assert!(projection.route(ConversationId::new()).await.is_err());
    }
}
