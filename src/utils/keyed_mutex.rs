use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A mutex that allows locking based on a key (e.g., an output object key).
/// Holders of different keys never wait on each other.
#[derive(Debug, Clone, Default)]
pub struct KeyedMutex {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `key`; it is released when the guard is dropped.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        // The DashMap entry guard is gone before we await.
        mutex.lock_owned().await
    }

    /// Whether some task currently holds or waits on `key`.
    pub fn is_contended(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .is_some_and(|mutex| Arc::strong_count(mutex.value()) > 1)
    }

    /// Removes locks that are not currently held by any task.
    pub fn cleanup(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }
}
