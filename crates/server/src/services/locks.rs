use awgbot_common::PeerName;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<PeerName, Arc<Mutex<()>>>;

/// Per-peer mutual exclusion. Operations on different peers never contend.
#[derive(Debug, Default, Clone)]
pub struct PeerLocks {
    locks: Arc<LockMap>,
}

/// Holds one peer's lock. On release the map entry is dropped as well when
/// nobody else holds or waits on it, so the map only tracks peers in use.
#[derive(Debug)]
pub struct PeerGuard {
    guard: Option<OwnedMutexGuard<()>>,
    name: PeerName,
    locks: Arc<LockMap>,
}

impl Drop for PeerGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold a clone of the Arc, so a contended entry survives.
        self.locks
            .remove_if(&self.name, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl PeerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, name: &PeerName) -> PeerGuard {
        // Clone the Arc out so the map shard is not held across the await.
        let lock = Arc::clone(self.locks.entry(name.clone()).or_default().value());
        PeerGuard {
            guard: Some(lock.lock_owned().await),
            name: name.clone(),
            locks: Arc::clone(&self.locks),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
