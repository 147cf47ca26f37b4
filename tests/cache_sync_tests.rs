/// Cache sync tests
///
/// Lifecycle hooks keeping the entity cache consistent with the store, and
/// the store shrugging off cache failures.
/// Run with: cargo test --test cache_sync_tests
use async_trait::async_trait;
use kindstore::cache::CacheResult;
use kindstore::gateway::GatewayCall;
use kindstore::{
    CacheError, Entity, EntityCache, FeedModel, InMemoryGateway, MemoryCache, Model, ModelError,
    ModelStore,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const URL: &str = "http://example.com/feed.xml";

/// A cache whose backend is always down.
#[derive(Default)]
struct BrokenCache {
    attempts: AtomicUsize,
}

#[async_trait]
impl EntityCache for BrokenCache {
    async fn get(&self, _key: &str) -> CacheResult<Option<Entity>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn add(&self, _key: &str, _value: Entity, _ttl: Duration) -> CacheResult<bool> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Unavailable("connection refused".into()))
    }
}

fn setup() -> (Arc<InMemoryGateway>, Arc<MemoryCache>, ModelStore) {
    let gateway = Arc::new(InMemoryGateway::new());
    let cache = Arc::new(MemoryCache::default());
    let store = ModelStore::new(gateway.clone()).with_cache(cache.clone());
    (gateway, cache, store)
}

async fn run_query_count(gateway: &InMemoryGateway) -> usize {
    gateway
        .calls()
        .await
        .iter()
        .filter(|call| matches!(call, GatewayCall::RunQuery(_)))
        .count()
}

#[tokio::test]
async fn test_put_populates_cache() {
    let (_gateway, cache, store) = setup();
    let mut feed = FeedModel::new(URL);

    store.put(&mut feed, None).await.unwrap();

    let cached = cache.get(&FeedModel::cache_key(URL)).await.unwrap().unwrap();
    assert_eq!(FeedModel::from_entity(cached).unwrap(), feed);
}

#[tokio::test]
async fn test_delete_evicts_cache() {
    let (_gateway, cache, store) = setup();
    let mut feed = FeedModel::new(URL);
    store.put(&mut feed, None).await.unwrap();

    store.delete(&feed, None).await.unwrap();

    assert!(cache.get(&FeedModel::cache_key(URL)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_delete_leaves_cache_evicted_and_store_intact() {
    let (gateway, cache, store) = setup();
    let mut feed = FeedModel::new(URL);
    store.put(&mut feed, None).await.unwrap();
    gateway.fail_nth_commit(2).await;

    let err = store.delete(&feed, None).await.unwrap_err();

    assert!(matches!(err, ModelError::RemoteCommit(_)));
    assert!(cache.get(&FeedModel::cache_key(URL)).await.unwrap().is_none());
    assert!(gateway.peek(&feed.key().to_wire(None)).await.is_some());

    // the next read repopulates the cache
    let found = FeedModel::get(&store, URL).await.unwrap();
    assert_eq!(found, vec![feed]);
    assert!(cache.get(&FeedModel::cache_key(URL)).await.unwrap().is_some());
}

#[tokio::test]
async fn test_get_prefers_cache() {
    let (gateway, cache, store) = setup();
    let mut feed = FeedModel::new(URL);
    store.put(&mut feed, None).await.unwrap();

    let found = FeedModel::get(&store, URL).await.unwrap();
    assert_eq!(found, vec![feed.clone()]);
    assert_eq!(run_query_count(&gateway).await, 0);

    cache.delete(&FeedModel::cache_key(URL)).await.unwrap();
    let found = FeedModel::get(&store, URL).await.unwrap();
    assert_eq!(found, vec![feed]);
    assert_eq!(run_query_count(&gateway).await, 1);
}

#[tokio::test]
async fn test_get_without_cache_queries_store() {
    let gateway = Arc::new(InMemoryGateway::new());
    let store = ModelStore::new(gateway.clone());
    store.put(&mut FeedModel::new(URL), None).await.unwrap();
    store.put(&mut FeedModel::new("http://example.com/other.xml"), None).await.unwrap();

    let found = FeedModel::get(&store, URL).await.unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].subscriber_url(), URL);
    assert_eq!(run_query_count(&gateway).await, 1);
}

#[tokio::test]
async fn test_broken_cache_never_fails_persistence() {
    let gateway = Arc::new(InMemoryGateway::new());
    let cache = Arc::new(BrokenCache::default());
    let store = ModelStore::new(gateway.clone()).with_cache(cache.clone());
    let mut feed = FeedModel::new(URL);

    store.put(&mut feed, None).await.unwrap();
    let found = FeedModel::get(&store, URL).await.unwrap();
    assert_eq!(found, vec![feed.clone()]);
    store.delete(&feed, None).await.unwrap();

    assert_eq!(gateway.entity_count().await, 0);
    // add on write, get then add on read, delete before delete
    assert_eq!(cache.attempts.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_put_batch_caches_every_item() {
    let (_gateway, cache, store) = setup();
    let urls: Vec<String> = (0..5).map(|i| format!("http://example.com/{}.xml", i)).collect();
    let mut feeds: Vec<FeedModel> = urls.iter().map(FeedModel::new).collect();

    store.put_batch(&mut feeds).await.unwrap();

    for url in &urls {
        assert!(cache.get(&FeedModel::cache_key(url)).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_failed_chunk_items_are_not_cached() {
    let gateway = Arc::new(InMemoryGateway::new());
    let cache = Arc::new(MemoryCache::default());
    let store = ModelStore::new(gateway.clone())
        .with_cache(cache.clone())
        .with_batch_limit(2);
    gateway.fail_nth_commit(2).await;
    let urls: Vec<String> = (0..4).map(|i| format!("http://example.com/{}.xml", i)).collect();
    let mut feeds: Vec<FeedModel> = urls.iter().map(FeedModel::new).collect();

    assert!(store.put_batch(&mut feeds).await.is_err());

    let mut cached = Vec::new();
    for url in &urls {
        cached.push(cache.get(&FeedModel::cache_key(url)).await.unwrap().is_some());
    }
    assert_eq!(cached, vec![true, true, false, false]);
}

#[tokio::test(start_paused = true)]
async fn test_cached_entries_expire() {
    let gateway = Arc::new(InMemoryGateway::new());
    let cache = Arc::new(MemoryCache::default());
    let store = ModelStore::new(gateway)
        .with_cache(cache.clone())
        .with_cache_ttl(Duration::from_secs(10));
    store.put(&mut FeedModel::new(URL), None).await.unwrap();

    tokio::time::advance(Duration::from_secs(9)).await;
    assert!(cache.get(&FeedModel::cache_key(URL)).await.unwrap().is_some());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(cache.get(&FeedModel::cache_key(URL)).await.unwrap().is_none());
}
