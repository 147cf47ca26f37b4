use super::{CacheResult, EntityCache};
use crate::core::Entity;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const DEFAULT_CAPACITY: usize = 1024;

struct CacheEntry {
    value: Entity,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Bounded in-process cache with per-entry TTL. Least recently used entries
/// are evicted once capacity is reached.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MemoryCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EntityCache for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Entity>> {
        let mut entries = self.entries.lock()?;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn add(&self, key: &str, value: Entity, ttl: Duration) -> CacheResult<bool> {
        let mut entries = self.entries.lock()?;
        let now = Instant::now();
        if entries.peek(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        entries.put(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.lock()?.pop(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EntityKey, PropertyMap};

    fn entity(name: &str) -> Entity {
        Entity::new(
            EntityKey::new("Feed").with_string_name(name).unwrap(),
            PropertyMap::new(),
        )
    }

    #[tokio::test]
    async fn test_add_is_write_once() {
        let cache = MemoryCache::default();
        assert!(cache.add("k", entity("a"), Duration::from_secs(60)).await.unwrap());
        assert!(!cache.add("k", entity("b"), Duration::from_secs(60)).await.unwrap());

        let cached = cache.get("k").await.unwrap().unwrap();
        assert_eq!(cached.key.name(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = MemoryCache::default();
        cache.add("k", entity("a"), Duration::from_secs(120)).await.unwrap();

        tokio::time::advance(Duration::from_secs(119)).await;
        assert!(cache.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("k").await.unwrap().is_none());
        assert!(cache.is_empty());

        // an expired entry no longer blocks add
        assert!(cache.add("k", entity("b"), Duration::from_secs(120)).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_and_capacity() {
        let cache = MemoryCache::with_capacity(2);
        for name in ["a", "b", "c"] {
            cache.add(name, entity(name), Duration::from_secs(60)).await.unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").await.unwrap().is_none());

        cache.delete("b").await.unwrap();
        assert!(cache.get("b").await.unwrap().is_none());
    }
}
