//! Per-session FIFO lock: `start_task` chains onto any existing lock for the
//! session, so tasks sharing a session never interleave. `tokio::sync::Mutex`
//! queues waiters in arrival order, which is what gives the chain its FIFO
//! property. Entries are dropped once nothing references them, so an idle
//! session leaves no trace in the registry.

use aex_core::SessionId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct SessionLockRegistry {
    locks: StdMutex<HashMap<SessionId, Weak<AsyncMutex<()>>>>,
}

impl SessionLockRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, session_id: &SessionId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().expect("session lock registry poisoned");
        if let Some(existing) = locks.get(session_id).and_then(Weak::upgrade) {
            return existing;
        }
        let fresh = Arc::new(AsyncMutex::new(()));
        locks.insert(session_id.clone(), Arc::downgrade(&fresh));
        fresh
    }

    /// Awaits the session's lock. Dropping the returned guard releases it
    /// for the next queued task.
    pub async fn acquire(&self, session_id: &SessionId) -> OwnedMutexGuard<()> {
        let lock = self.lock_for(session_id);
        lock.lock_owned().await
    }

    /// Tasks currently queued or running for this session, including the
    /// one holding the lock.
    #[must_use]
    pub fn depth(&self, session_id: &SessionId) -> usize {
        let locks = self.locks.lock().expect("session lock registry poisoned");
        match locks.get(session_id).and_then(Weak::upgrade) {
            Some(lock) => Arc::strong_count(&lock).saturating_sub(1),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn tasks_sharing_a_session_run_strictly_in_order() {
        let registry = Arc::new(SessionLockRegistry::new());
        let session_id = SessionId::from("s1");
        let order = Arc::new(StdMutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let registry = Arc::clone(&registry);
            let session_id = session_id.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _guard = registry.acquire(&session_id).await;
                tokio::time::sleep(Duration::from_millis(1)).await;
                order.lock().unwrap().push(i);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn different_sessions_do_not_block_each_other() {
        let registry = Arc::new(SessionLockRegistry::new());
        let counter = Arc::new(AtomicU32::new(0));

        let guard_a = registry.acquire(&SessionId::from("a")).await;
        let registry2 = Arc::clone(&registry);
        let counter2 = Arc::clone(&counter);
        let handle = tokio::spawn(async move {
            let _guard = registry2.acquire(&SessionId::from("b")).await;
            counter2.fetch_add(1, Ordering::SeqCst);
        });
        handle.await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        drop(guard_a);
    }

    #[tokio::test]
    async fn registry_drops_entries_once_idle() {
        let registry = SessionLockRegistry::new();
        let session_id = SessionId::from("s1");
        {
            let _guard = registry.acquire(&session_id).await;
        }
        assert_eq!(registry.depth(&session_id), 0);
    }
}
