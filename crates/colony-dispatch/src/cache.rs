use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};

struct Entry {
    value: Value,
    inserted: Instant,
    last_used: Instant,
}

/// Bounded TTL cache with LRU eviction. Callers hold a short sync lock
/// around it; nothing awaits while the lock is held.
pub struct TtlCache {
    entries: HashMap<String, Entry>,
    ttl: Duration,
    capacity: usize,
}

impl TtlCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            capacity,
        }
    }

    /// Deterministic key over the method and its argument JSON.
    pub fn key(method: &str, params: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(method.as_bytes());
        hasher.update(b"|");
        hasher.update(params.to_string().as_bytes());
        format!("{:064x}", hasher.finalize())
    }

    pub fn get(&mut self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let fresh = match self.entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.inserted) < self.ttl => {
                entry.last_used = now;
                Some(entry.value.clone())
            }
            Some(_) => None,
            None => return None,
        };
        if fresh.is_none() {
            self.entries.remove(key);
        }
        fresh
    }

    pub fn put(&mut self, key: String, value: Value) {
        let now = Instant::now();
        self.entries.retain(|_, e| now.duration_since(e.inserted) < self.ttl);
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            key,
            Entry {
                value,
                inserted: now,
                last_used: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_is_deterministic_and_arg_sensitive() {
        let a = TtlCache::key("get_price", &json!(["eth"]));
        let b = TtlCache::key("get_price", &json!(["eth"]));
        let c = TtlCache::key("get_price", &json!(["btc"]));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn expired_entries_miss() {
        let mut cache = TtlCache::new(Duration::from_millis(0), 16);
        cache.put("k".to_string(), json!(1));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let mut cache = TtlCache::new(Duration::from_secs(60), 2);
        cache.put("a".to_string(), json!(1));
        std::thread::sleep(Duration::from_millis(2));
        cache.put("b".to_string(), json!(2));
        std::thread::sleep(Duration::from_millis(2));
        // Touch "a" so "b" is the LRU victim.
        let _ = cache.get("a");
        cache.put("c".to_string(), json!(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }
}
