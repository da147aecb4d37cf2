use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-key async locks.
///
/// Serialises mutating ledger operations on the same line or drum within
/// this process. Row locks in the store cover cross-process writers.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

/// Holds one key until dropped. The table entry is evicted once no other
/// task holds or waits on it.
pub struct KeyedGuard<'a> {
    table: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: impl Into<String>) -> KeyedGuard<'_> {
        let key = key.into();
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        KeyedGuard {
            table: self,
            key,
            guard: Some(guard),
        }
    }

    /// Acquires several keys in sorted order, skipping duplicates.
    ///
    /// Every caller that needs more than one key goes through here so that
    /// two tasks can never wait on each other's keys in opposite order.
    pub async fn acquire_many<I, K>(&self, keys: I) -> Vec<KeyedGuard<'_>>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.acquire(key).await);
        }
        guards
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.table
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
