//! crates/engagement_core/src/locks.rs
//!
//! One async mutex per client, so passes for the same client never overlap
//! while different clients proceed in parallel.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Held for the duration of one client's evaluation.
pub type ClientGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct ClientLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl ClientLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, client_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(client_id).or_default().clone()
    }

    /// Takes the lock only if nobody holds it.
    pub fn try_acquire(&self, client_id: Uuid) -> Option<ClientGuard> {
        self.lock_for(client_id).try_lock_owned().ok()
    }

    /// Queues behind a running pass for at most `wait`.
    pub async fn acquire_within(&self, client_id: Uuid, wait: Duration) -> Option<ClientGuard> {
        let lock = self.lock_for(client_id);
        tokio::time::timeout(wait, lock.lock_owned()).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_client_is_exclusive() {
        let locks = ClientLocks::new();
        let id = Uuid::new_v4();

        let guard = locks.try_acquire(id).expect("first acquire succeeds");
        assert!(locks.try_acquire(id).is_none());
        assert!(locks
            .acquire_within(id, Duration::from_millis(20))
            .await
            .is_none());

        drop(guard);
        assert!(locks.try_acquire(id).is_some());
    }

    #[tokio::test]
    async fn different_clients_do_not_block_each_other() {
        let locks = ClientLocks::new();
        let _a = locks.try_acquire(Uuid::new_v4()).unwrap();
        assert!(locks.try_acquire(Uuid::new_v4()).is_some());
    }

    #[tokio::test]
    async fn waiter_gets_the_lock_once_released() {
        let locks = Arc::new(ClientLocks::new());
        let id = Uuid::new_v4();
        let guard = locks.try_acquire(id).unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire_within(id, Duration::from_secs(5)).await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(guard);

        assert!(waiter.await.unwrap());
    }
}
