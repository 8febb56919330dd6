use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde_json::Value;
use tokio::time::Instant;

/// Composite cache key for an address and logical id.
pub fn cache_key(url: &str, logical_id: &str) -> String {
    format!("{url}|{logical_id}")
}

#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub written_at: Instant,
    /// `None` never expires.
    pub expires_in: Option<Duration>,
    pub payload: Value,
}

impl CacheEntry {
    pub fn new(payload: Value, expires_in: Option<Duration>) -> Self {
        Self {
            written_at: Instant::now(),
            expires_in,
            payload,
        }
    }

    /// Expired strictly after `expires_in` has elapsed since the write.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.expires_in {
            Some(ttl) => now.saturating_duration_since(self.written_at) > ttl,
            None => false,
        }
    }
}

/// Response cache shared by every request of the controllers holding it.
///
/// Clones share the same store. Expired entries are evicted lazily on read.
#[derive(Clone, Default)]
pub struct ResponseCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.lock();
        let expired = entries.get(key)?.is_expired(Instant::now());
        if expired {
            entries.remove(key);
            #[cfg(feature = "tracing")]
            tracing::debug!(key, "evicted expired cache entry");
            return None;
        }
        entries.get(key).map(|entry| entry.payload.clone())
    }

    pub fn set(&self, key: impl Into<String>, entry: CacheEntry) {
        self.lock().insert(key.into(), entry);
    }

    pub fn delete(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn key_joins_url_and_id() {
        assert_eq!(cache_key("https://api.test/users", ""), "https://api.test/users|");
        assert_eq!(cache_key("/a", "page-2"), "/a|page-2");
    }

    #[tokio::test(start_paused = true)]
    async fn entries_without_ttl_never_expire() {
        let cache = ResponseCache::new();
        cache.set("k", CacheEntry::new(json!({"ok": true}), None));
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert_eq!(cache.get("k"), Some(json!({"ok": true})));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_evicted_on_read() {
        let cache = ResponseCache::new();
        cache.set("k", CacheEntry::new(json!(1), Some(Duration::from_millis(500))));

        tokio::time::advance(Duration::from_millis(499)).await;
        assert_eq!(cache.get("k"), Some(json!(1)));

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(cache.contains("k"), "eviction is lazy");
        assert_eq!(cache.get("k"), None);
        assert!(!cache.contains("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn boundary_is_not_expired() {
        let entry = CacheEntry::new(json!(null), Some(Duration::from_millis(100)));
        let at_boundary = entry.written_at + Duration::from_millis(100);
        assert!(!entry.is_expired(at_boundary));
        assert!(entry.is_expired(at_boundary + Duration::from_millis(1)));
    }

    #[test]
    fn clones_share_the_store() {
        let cache = ResponseCache::new();
        let other = cache.clone();
        other.set("k", CacheEntry::new(json!("v"), None));
        assert_eq!(cache.get("k"), Some(json!("v")));
        cache.delete("k");
        cache.delete("k");
        assert!(other.is_empty());
    }
}
