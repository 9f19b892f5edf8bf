//! Read-mostly snapshot cache.
//!
//! Readers clone an `Arc` to the current map and work against that immutable
//! snapshot. Writers build a complete replacement map and publish it with a
//! single pointer swap, so a reader never sees a half-applied update.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Expiry policy for cached values.
pub trait Expiring {
    /// Returns true when the value must not be served at `now`.
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool;
}

/// Copy-on-write map published through an `Arc` swap.
#[derive(Debug)]
pub struct SnapshotCache<V> {
    current: RwLock<Arc<HashMap<String, V>>>,
}

impl<V> Default for SnapshotCache<V> {
    fn default() -> Self {
        Self { current: RwLock::new(Arc::new(HashMap::new())) }
    }
}

impl<V: Clone> SnapshotCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current immutable snapshot.
    pub async fn snapshot(&self) -> Arc<HashMap<String, V>> {
        Arc::clone(&*self.current.read().await)
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.snapshot().await.get(key).cloned()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.snapshot().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.snapshot().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshot().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.snapshot().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Publish a fully built map in place of the current one.
    pub async fn replace_all(&self, entries: HashMap<String, V>) {
        *self.current.write().await = Arc::new(entries);
    }

    /// Publish a copy of the current map with `key` set to `value`.
    pub async fn upsert(&self, key: impl Into<String>, value: V) {
        let mut guard = self.current.write().await;
        let mut next = HashMap::clone(&guard);
        next.insert(key.into(), value);
        *guard = Arc::new(next);
    }

    /// Publish a copy of the current map without `key`. Returns the removed value.
    pub async fn remove(&self, key: &str) -> Option<V> {
        let mut guard = self.current.write().await;
        if !guard.contains_key(key) {
            return None;
        }
        let mut next = HashMap::clone(&guard);
        let removed = next.remove(key);
        *guard = Arc::new(next);
        removed
    }

    pub async fn clear(&self) {
        *self.current.write().await = Arc::new(HashMap::new());
    }
}

impl<V: Clone + Expiring> SnapshotCache<V> {
    /// Returns the value only while it is still fresh at `now`.
    ///
    /// An expired entry is evicted so the caller can reload it.
    pub async fn get_fresh(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let value = self.get(key).await?;
        if value.is_expired_at(now) {
            let mut guard = self.current.write().await;
            // Re-check under the write lock; another task may have reloaded it.
            let still_expired = guard.get(key).is_some_and(|v| v.is_expired_at(now));
            if still_expired {
                let mut next = HashMap::clone(&guard);
                next.remove(key);
                *guard = Arc::new(next);
            }
            return None;
        }
        Some(value)
    }
}
