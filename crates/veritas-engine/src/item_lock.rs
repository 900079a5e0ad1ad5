use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};

use tokio::sync::{Mutex, OwnedMutexGuard};
use veritas_core::HashId;

/// Process-wide mapping from `HashId` to a mutex, giving strict per-item
/// serialization of the check/create section without a single global lock.
///
/// Entries are held weakly: once every contender for an id has dropped its
/// guard, the map's `Weak` no longer upgrades and a fresh mutex is installed
/// on the next request. A periodic sweep drops dead weak entries so the
/// table's size tracks live contention rather than lifetime request volume.
pub struct ItemLock {
    table: StdMutex<HashMap<HashId, Weak<Mutex<()>>>>,
}

impl ItemLock {
    pub fn new() -> Self {
        Self {
            table: StdMutex::new(HashMap::new()),
        }
    }

    fn entry(&self, id: HashId) -> Arc<Mutex<()>> {
        let mut table = self.table.lock().unwrap();
        if let Some(existing) = table.get(&id).and_then(Weak::upgrade) {
            return existing;
        }
        let fresh = Arc::new(Mutex::new(()));
        table.insert(id, Arc::downgrade(&fresh));
        fresh
    }

    /// Run `body` under the lock for `id`. Concurrent calls with the same id
    /// are serialized; calls with distinct ids proceed in parallel. The lock
    /// is released on every exit path, including a panic inside `body`
    /// (tokio's guard drop runs during unwind).
    pub async fn with_lock<F, Fut, T>(&self, id: HashId, body: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let mutex = self.entry(id);
        let _guard: OwnedMutexGuard<()> = mutex.lock_owned().await;
        body().await
    }

    /// Drop weak entries whose mutex has no remaining owner. Intended to be
    /// driven by the same background sweep that ages out `ItemCache` entries
    /// and retired processors.
    pub fn sweep(&self) {
        let mut table = self.table.lock().unwrap();
        table.retain(|_, weak| weak.strong_count() > 0);
    }

    pub fn len(&self) -> usize {
        self.table.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ItemLock {
    fn default() -> Self {
        Self::new()
    }
}
