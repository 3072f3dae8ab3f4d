//! Per-conversation mutual exclusion.
//!
//! Held by the facade for the whole pipeline of a request, so two turns on
//! the same conversation persist in the order they were admitted. Requests
//! on different conversations never contend.

use parley_core::message::ConversationId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Number of tracked conversations above which idle locks are dropped.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Default)]
pub struct ConversationLocks {
    locks: Mutex<HashMap<ConversationId, Arc<AsyncMutex<()>>>>,
}

/// Released on drop.
pub struct ConversationGuard {
    _guard: OwnedMutexGuard<()>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`.
    pub async fn acquire(&self, id: &ConversationId) -> ConversationGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            if locks.len() > PRUNE_THRESHOLD {
                // Only the map holds an idle lock.
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(id.clone()).or_default().clone()
        };
        ConversationGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Forget the lock of a deleted conversation.
    pub fn remove(&self, id: &ConversationId) {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).remove(id);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn same_conversation_is_serialized() {
        let locks = Arc::new(ConversationLocks::new());
        let id = ConversationId::from("c1");
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = locks.acquire(&id).await;

        let task = {
            let (locks, id, order) = (locks.clone(), id.clone(), order.clone());
            tokio::spawn(async move {
                let _guard = locks.acquire(&id).await;
                order.lock().unwrap().push("second");
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        order.lock().unwrap().push("first");
        drop(first);
        task.await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn different_conversations_do_not_contend() {
        let locks = ConversationLocks::new();
        let _a = locks.acquire(&ConversationId::from("a")).await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.acquire(&ConversationId::from("b"))).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn remove_forgets_lock() {
        let locks = ConversationLocks::new();
        let id = ConversationId::from("gone");
        drop(locks.acquire(&id).await);
        locks.remove(&id);
        assert!(locks.is_empty());
    }
}
