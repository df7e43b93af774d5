use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::CacheKey;

type KeyLock = Arc<AsyncMutex<()>>;

/// Per-key async locks serializing origin fetches for the same cache key.
///
/// Only used when fetch coalescing is enabled; without it concurrent misses race and the last
/// writer wins.
#[derive(Default)]
pub struct FetchLocks {
    table: Arc<Mutex<HashMap<CacheKey, KeyLock>>>,
}

impl FetchLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &CacheKey) -> FetchGuard {
        let lock = {
            let mut table = self.table.lock();
            table.entry(key.clone()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        FetchGuard {
            guard: Some(guard),
            key: key.clone(),
            table: self.table.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct FetchGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: CacheKey,
    table: Arc<Mutex<HashMap<CacheKey, KeyLock>>>,
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = self.table.lock();
        // Waiters and in-progress acquirers hold their own clone.
        if let Some(lock) = table.get(&self.key)
            && Arc::strong_count(lock) == 1
        {
            table.remove(&self.key);
        }
    }
}
