use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use veritas_core::{HashId, Item};

/// Bounded-TTL cache of item bodies by identifier. `get` evicts a stale
/// entry in place rather than merely reporting it absent, so repeated
/// misses on a dead key don't re-check the clock against it forever. No
/// capacity bound is required by the design — only age.
pub struct ItemCache {
    max_age: Duration,
    entries: Mutex<HashMap<HashId, (Instant, Item)>>,
}

impl ItemCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn put(&self, item: Item) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(item.id, (Instant::now(), item));
    }

    pub fn get(&self, id: &HashId) -> Option<Item> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(id) {
            Some((inserted_at, item)) => {
                if inserted_at.elapsed() > self.max_age {
                    entries.remove(id);
                    None
                } else {
                    Some(item.clone())
                }
            }
            None => None,
        }
    }

    pub fn contains(&self, id: &HashId) -> bool {
        self.get(id).is_some()
    }

    /// Background sweep: drop every entry older than `max_age` regardless of
    /// whether it is ever looked up again.
    pub fn sweep(&self) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, (inserted_at, _)| inserted_at.elapsed() <= self.max_age);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
