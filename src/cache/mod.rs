//! Session-scoped response cache.
//!
//! Entries are plain `key -> serialized body` pairs keyed by
//! [`RequestDescriptor::cache_key`]. The cache only ever appends or
//! overwrites; nothing is invalidated on read.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::transport::RequestDescriptor;

/// Backing key/value store. Must tolerate concurrent readers and atomic
/// single-key writes.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn set(&self, key: &str, value: String) -> Result<(), CacheError>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, String>,
    order: VecDeque<String>,
}

/// In-memory store. Unbounded unless built with [`MemoryStore::bounded`],
/// which evicts the oldest inserted key first.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<Entries>,
    capacity: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bounded(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            capacity: Some(capacity),
        }
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.read().map.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        let mut entries = self.entries.write();
        if entries.map.insert(key.to_string(), value).is_none() {
            entries.order.push_back(key.to_string());
        }
        if let Some(capacity) = self.capacity {
            if capacity == 0 {
                entries.map.clear();
                entries.order.clear();
                return Err(CacheError::QuotaExceeded(0));
            }
            while entries.map.len() > capacity {
                match entries.order.pop_front() {
                    Some(oldest) => {
                        entries.map.remove(&oldest);
                        debug!(key = %oldest, "evicted cache entry");
                    }
                    None => break,
                }
            }
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.read().map.len()
    }
}

/// Typed, best-effort view over a shared [`CacheStore`].
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.store.len())
            .finish()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn bounded(capacity: usize) -> Self {
        Self::new(Arc::new(MemoryStore::bounded(capacity)))
    }

    /// Cached value for `descriptor`. Storage failures and undecodable
    /// entries count as a miss.
    pub fn get<T: DeserializeOwned>(&self, descriptor: &RequestDescriptor) -> Option<T> {
        let key = descriptor.cache_key();
        let raw = match self.store.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, "failed to read cache entry");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key = %key, error = %err, "failed to parse cache data");
                None
            }
        }
    }

    /// Stores an already serialized value. Never fails the caller.
    pub fn put(&self, descriptor: &RequestDescriptor, serialized: &str) {
        let key = descriptor.cache_key();
        match self.store.set(&key, serialized.to_string()) {
            Ok(()) => debug!(key = %key, "cached response"),
            Err(err) => warn!(key = %key, error = %err, "failed to save data to cache"),
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Params;
    use serde_json::{json, Value};

    struct FullStore;

    impl CacheStore for FullStore {
        fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Ok(None)
        }
        fn set(&self, _key: &str, _value: String) -> Result<(), CacheError> {
            Err(CacheError::Storage("quota exceeded".into()))
        }
        fn len(&self) -> usize {
            0
        }
    }

    fn descriptor(id: i64) -> RequestDescriptor {
        let mut params = Params::new();
        params.insert("id".into(), json!(id));
        RequestDescriptor::get("https://api.example.com/items").with_params(params)
    }

    #[test]
    fn test_put_then_get() {
        let cache = ResponseCache::in_memory();
        cache.put(&descriptor(1), r#"{"name":"one"}"#);

        let value: Value = cache.get(&descriptor(1)).unwrap();
        assert_eq!(value, json!({"name": "one"}));
        assert!(cache.get::<Value>(&descriptor(2)).is_none());
    }

    #[test]
    fn test_overwrite_keeps_single_entry() {
        let cache = ResponseCache::in_memory();
        cache.put(&descriptor(1), "1");
        cache.put(&descriptor(1), "2");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get::<i64>(&descriptor(1)), Some(2));
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let cache = ResponseCache::in_memory();
        cache.put(&descriptor(1), "{not json");
        assert!(cache.get::<Value>(&descriptor(1)).is_none());
    }

    #[test]
    fn test_write_failure_is_swallowed() {
        let cache = ResponseCache::new(Arc::new(FullStore));
        cache.put(&descriptor(1), "{}");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_bounded_store_evicts_oldest() {
        let store = MemoryStore::bounded(2);
        store.set("a", "1".into()).unwrap();
        store.set("b", "2".into()).unwrap();
        store.set("a", "3".into()).unwrap();
        store.set("c", "4".into()).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("b").unwrap(), Some("2".to_string()));
        assert_eq!(store.get("c").unwrap(), Some("4".to_string()));
    }

    #[test]
    fn test_zero_capacity_rejects_writes() {
        let store = MemoryStore::bounded(0);
        assert!(matches!(
            store.set("a", "1".into()),
            Err(CacheError::QuotaExceeded(0))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let cache = ResponseCache::in_memory();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for n in 0..50 {
                        cache.put(&descriptor(i * 100 + n), &n.to_string());
                        let _ = cache.get::<i64>(&descriptor(i * 100));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 400);
    }
}
