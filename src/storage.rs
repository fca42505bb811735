//! Last-known cloud state shared between a pool and its readers.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// A mutex-guarded map of committed pool state.
///
/// Pools write entries only after the corresponding cloud call succeeded, so
/// readers outside the reconcile loop always see a committed view.
#[derive(Debug)]
pub struct Snapshotter<K, V> {
    cache: Mutex<BTreeMap<K, V>>,
}

impl<K: Ord + Clone, V: Clone> Snapshotter<K, V> {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<K, V>> {
        // A panic while holding the lock cannot leave the map half-written.
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, key: K, value: V) {
        self.lock().insert(key, value);
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.lock().get(key).cloned()
    }

    pub fn delete(&self, key: &K) -> Option<V> {
        self.lock().remove(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.lock().keys().cloned().collect()
    }

    pub fn snapshot(&self) -> BTreeMap<K, V> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<K: Ord + Clone, V: Clone> Default for Snapshotter<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
