use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::warn;

const PRUNE_THRESHOLD: usize = 1024;

/// One mutex per key; work for different keys proceeds in parallel.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone + std::fmt::Display,
{
    fn slot(&self, key: &K) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.len() >= PRUNE_THRESHOLD {
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        }
        slots.entry(key.clone()).or_default().clone()
    }

    /// Run `work` while holding the lock for `key`.
    ///
    /// Slots guard no data, so a slot poisoned by a panicked holder is simply taken over.
    pub fn run<T>(&self, key: &K, work: impl FnOnce() -> T) -> T {
        let slot = self.slot(key);
        let _guard = acquire(&slot, key);
        work()
    }
}

fn acquire<'a, K: std::fmt::Display>(slot: &'a Mutex<()>, key: &K) -> MutexGuard<'a, ()> {
    slot.lock().unwrap_or_else(|poisoned| {
        warn!(key = %key, "recovering lock poisoned by a panicked holder");
        poisoned.into_inner()
    })
}
