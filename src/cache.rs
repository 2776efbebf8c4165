use std::time::{Duration, Instant};

use dashmap::DashMap;

struct CachedStreamUrl {
    url: String,
    expires_at: Instant,
}

/// Time-bounded map from track identity (canonical URL) to a previously
/// extracted stream locator. Entries are evicted lazily on lookup; no
/// background sweep. Safe for concurrent prefetch tasks.
pub struct StreamUrlCache {
    entries: DashMap<String, CachedStreamUrl>,
    ttl: Duration,
}

impl StreamUrlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if Instant::now() < entry.expires_at {
                    return Some(entry.url.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn insert(&self, key: impl Into<String>, url: impl Into<String>) {
        self.entries.insert(
            key.into(),
            CachedStreamUrl {
                url: url.into(),
                expires_at: Instant::now() + self.ttl,
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

    #[test]
    fn hit_within_ttl() {
        let cache = StreamUrlCache::new(Duration::from_secs(300));
        cache.insert("https://youtu.be/abc", "https://cdn.example/stream.webm");
        assert_eq!(
            cache.get("https://youtu.be/abc").as_deref(),
            Some("https://cdn.example/stream.webm")
        );
    }

    #[test]
    fn expired_entry_evicted_on_lookup() {
        let cache = StreamUrlCache::new(Duration::from_millis(20));
        cache.insert("k", "v");
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn reinsert_refreshes_expiry() {
        let cache = StreamUrlCache::new(Duration::from_millis(60));
        cache.insert("k", "old");
        std::thread::sleep(Duration::from_millis(40));
        cache.insert("k", "new");
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("k").as_deref(), Some("new"));
    }
}
