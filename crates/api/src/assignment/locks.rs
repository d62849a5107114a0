//! Per-conversation serialization
//!
//! Operations on one conversation run one at a time while unrelated
//! conversations proceed independently. A conversation's lock entry lives only
//! while someone holds or waits for it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};

use supportsync_shared::ConversationId;

type LockTable = HashMap<ConversationId, Arc<Mutex<()>>>;

#[derive(Default)]
pub struct ConversationLocks {
    // Never held across an await
    table: Arc<StdMutex<LockTable>>,
}

/// Exclusive access to one conversation, released on drop
pub struct ConversationGuard {
    id: ConversationId,
    guard: Option<OwnedMutexGuard<()>>,
    lock: Arc<Mutex<()>>,
    table: Arc<StdMutex<LockTable>>,
}

fn entries(table: &StdMutex<LockTable>) -> MutexGuard<'_, LockTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a conversation
    pub async fn lock(&self, id: ConversationId) -> ConversationGuard {
        let lock = Arc::clone(entries(&self.table).entry(id).or_default());
        let guard = Arc::clone(&lock).lock_owned().await;

        ConversationGuard {
            id,
            guard: Some(guard),
            lock,
            table: Arc::clone(&self.table),
        }
    }

    /// Conversations with a holder or waiter
    pub fn len(&self) -> usize {
        entries(&self.table).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Waiters clone the entry under the table lock, so with only the
        // table and this guard left nobody else can be queued on it
        let mut table = entries(&self.table);
        let idle = table
            .get(&self.id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock) && Arc::strong_count(entry) == 2);
        if idle {
            table.remove(&self.id);
        }
    }
}
