//! Short-lived in-memory cache for raw catalog responses
//!
//! Absorbs duplicate lookups within a session so they never burn quota.
//! Entirely separate from the season/series cache store.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// A cached entry with expiration time
#[derive(Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// TTL cache keyed by exact request parameters
pub struct TtlCache<K: Eq + Hash, V: Clone> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    ttl: Duration,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Get a cached value if it exists and hasn't expired
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read();
        entries.get(key).and_then(|entry| {
            if Instant::now() < entry.expires_at {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    pub fn set(&self, key: K, value: V) {
        let mut entries = self.entries.write();
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Remove all expired entries
    pub fn cleanup_expired(&self) {
        let mut entries = self.entries.write();
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn set_and_get() {
        let cache: TtlCache<(u32, u32), String> =
            TtlCache::new(Duration::from_secs(60));
        cache.set((1, 1), "value".to_string());
        assert_eq!(cache.get(&(1, 1)), Some("value".to_string()));
        assert_eq!(cache.get(&(1, 2)), None);
    }

    #[test]
    fn expiration() {
        let cache: TtlCache<u32, &str> = TtlCache::new(Duration::from_millis(50));
        cache.set(1, "value");
        assert_eq!(cache.get(&1), Some("value"));

        sleep(Duration::from_millis(60));
        assert_eq!(cache.get(&1), None);

        cache.cleanup_expired();
        assert!(cache.is_empty());
    }
}
