// ============================================================================
// External Cache
// ============================================================================
//
// Best-effort read/write-through cache in front of the store. Failures here
// are reported as `CacheError` and only ever logged by the model layer.
//
// ============================================================================

pub mod memory;

use crate::core::{CacheError, Entity};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;

pub use memory::MemoryCache;

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Default lifetime of a cache entry.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(120);

#[async_trait]
pub trait EntityCache: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<Entity>>;

    /// Stores `value` unless a live entry already exists; returns whether it
    /// was stored.
    async fn add(&self, key: &str, value: Entity, ttl: Duration) -> CacheResult<bool>;

    async fn delete(&self, key: &str) -> CacheResult<()>;
}

/// `"{kind}_{sha256-hex(natural_id)}"`
pub fn cache_key(kind: &str, natural_id: &str) -> String {
    format!("{}_{}", kind, stable_hash(natural_id))
}

pub fn stable_hash(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_is_deterministic() {
        let a = cache_key("FeedModel", "http://example.com/feed.xml");
        let b = cache_key("FeedModel", "http://example.com/feed.xml");
        assert_eq!(a, b);
        assert!(a.starts_with("FeedModel_"));
        assert_eq!(a.len(), "FeedModel_".len() + 64);
        assert_ne!(a, cache_key("FeedModel", "http://example.com/other.xml"));
    }
}
