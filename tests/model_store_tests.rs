/// Model store tests
///
/// Put/delete routing, lookups, batching and transactions against the
/// in-memory gateway.
/// Run with: cargo test --test model_store_tests
use chrono::{DateTime, TimeZone, Utc};
use kindstore::core::{encode_date, encode_string, encode_string_list};
use kindstore::gateway::GatewayCall;
use kindstore::wire::CommitMode;
use kindstore::{
    Entity, EntityKey, InMemoryGateway, Model, ModelError, ModelStore, PropertyMap, Result,
};
use std::sync::Arc;

const ARTICLE_KIND: &str = "Article";

#[derive(Debug, Clone, PartialEq)]
struct Article {
    key: EntityKey,
    title: String,
    tags: Vec<String>,
    published: Option<DateTime<Utc>>,
}

impl Article {
    fn new(title: &str) -> Self {
        Self {
            key: EntityKey::new(ARTICLE_KIND),
            title: title.to_string(),
            tags: Vec::new(),
            published: None,
        }
    }

    fn named(name: &str, title: &str) -> Self {
        let mut article = Self::new(title);
        article.key = EntityKey::new(ARTICLE_KIND).with_string_name(name).unwrap();
        article
    }
}

impl Model for Article {
    fn kind_name() -> &'static str {
        ARTICLE_KIND
    }

    fn key(&self) -> &EntityKey {
        &self.key
    }

    fn key_mut(&mut self) -> &mut EntityKey {
        &mut self.key
    }

    fn to_properties(&self) -> Result<PropertyMap> {
        let mut properties = PropertyMap::new();
        properties.insert("title".to_string(), encode_string(self.title.as_str(), true));
        properties.insert("tags".to_string(), encode_string_list(self.tags.clone(), false));
        if let Some(published) = self.published {
            properties.insert(
                "published".to_string(),
                encode_date(&published.to_rfc3339(), true)?,
            );
        }
        Ok(properties)
    }

    fn from_entity(entity: Entity) -> Result<Self> {
        Ok(Self {
            title: entity.string("title")?.to_string(),
            tags: entity.string_list("tags").map(<[String]>::to_vec).unwrap_or_default(),
            published: entity.date_time("published").ok(),
            key: entity.key,
        })
    }
}

fn setup() -> (Arc<InMemoryGateway>, ModelStore) {
    let gateway = Arc::new(InMemoryGateway::new());
    let store = ModelStore::new(gateway.clone());
    (gateway, store)
}

fn articles(count: usize) -> Vec<Article> {
    (0..count).map(|i| Article::new(&format!("article {}", i))).collect()
}

#[tokio::test]
async fn test_put_without_identity_inserts_with_auto_id() {
    let (gateway, store) = setup();
    let mut article = Article::new("Hello");

    store.put(&mut article, None).await.unwrap();

    let commits = gateway.commit_requests().await;
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].mode, CommitMode::NonTransactional);
    assert_eq!(commits[0].mutation.insert_auto_id.len(), 1);
    assert!(commits[0].mutation.upsert.is_empty());

    let id = article.key().id().expect("id assigned by the store");
    let fetched: Vec<Article> = store.fetch_by_id(id, None).await.unwrap();
    assert_eq!(fetched, vec![article]);
}

#[tokio::test]
async fn test_fetched_entity_is_upserted() {
    let (gateway, store) = setup();
    store.put(&mut Article::named("abc", "First"), None).await.unwrap();

    let mut fetched: Vec<Article> = store.fetch_by_name("abc", None).await.unwrap();
    assert_eq!(fetched.len(), 1);
    let article = &mut fetched[0];
    assert_eq!(article.title, "First");
    assert_eq!(article.key().name(), Some("abc"));

    article.title = "Second".to_string();
    store.put(article, None).await.unwrap();

    let commits = gateway.commit_requests().await;
    let last = commits.last().unwrap();
    assert_eq!(last.mutation.upsert.len(), 1);
    assert!(last.mutation.insert_auto_id.is_empty());
    assert_eq!(gateway.entity_count().await, 1);
}

#[tokio::test]
async fn test_indexed_string_survives_round_trip() {
    let (gateway, store) = setup();
    let mut article = Article::named("round-trip", "Indexed title");
    store.put(&mut article, None).await.unwrap();

    let stored = gateway.peek(&article.key().to_wire(None)).await.unwrap();
    assert!(stored.properties["title"].is_indexed());

    let fetched: Vec<Article> = store.fetch_by_name("round-trip", None).await.unwrap();
    let entity = fetched[0].to_entity().unwrap();
    let title = entity.get("title").unwrap();
    assert_eq!(title.as_str(), Some("Indexed title"));
    assert!(title.is_indexed());
}

#[tokio::test]
async fn test_date_and_list_round_trip() {
    let (_gateway, store) = setup();
    let mut article = Article::named("dated", "Dated");
    article.published = Some(encode_date("2020-01-02T00:00:00Z", true).unwrap().as_date_time().unwrap());
    article.tags = vec!["rust".to_string(), "storage".to_string()];
    store.put(&mut article, None).await.unwrap();

    let fetched: Vec<Article> = store.fetch_by_name("dated", None).await.unwrap();
    assert_eq!(
        fetched[0].published,
        Some(Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap())
    );
    assert_eq!(fetched[0].tags, vec!["rust", "storage"]);
}

#[tokio::test]
async fn test_fetch_missing_returns_empty() {
    let (_gateway, store) = setup();
    let by_name: Vec<Article> = store.fetch_by_name("nope", None).await.unwrap();
    let by_id: Vec<Article> = store.fetch_by_id(42, None).await.unwrap();
    assert!(by_name.is_empty());
    assert!(by_id.is_empty());
}

#[tokio::test]
async fn test_delete_without_identity_issues_no_rpc() {
    let (gateway, store) = setup();
    let result = store.delete(&Article::new("never stored"), None).await;

    assert!(matches!(result, Err(ModelError::MissingIdentity(kind)) if kind == ARTICLE_KIND));
    assert_eq!(gateway.call_count().await, 0);
}

#[tokio::test]
async fn test_delete_removes_entity() {
    let (gateway, store) = setup();
    let mut article = Article::new("Doomed");
    store.put(&mut article, None).await.unwrap();

    store.delete(&article, None).await.unwrap();

    assert_eq!(gateway.entity_count().await, 0);
    let fetched: Vec<Article> = store.fetch_by_id(article.key().id().unwrap(), None).await.unwrap();
    assert!(fetched.is_empty());
}

#[tokio::test]
async fn test_all_returns_every_entity_of_kind() {
    let (_gateway, store) = setup();
    let mut batch = articles(5);
    store.put_batch(&mut batch).await.unwrap();

    let all: Vec<Article> = store.all().await.unwrap();
    assert_eq!(all.len(), 5);
}

#[tokio::test]
async fn test_put_batch_chunks_thousand_items() {
    let (gateway, store) = setup();
    let mut batch = articles(1000);

    store.put_batch(&mut batch).await.unwrap();

    let sizes: Vec<usize> = gateway
        .commit_requests()
        .await
        .iter()
        .map(|c| c.mutation.len())
        .collect();
    assert_eq!(sizes, vec![490, 490, 20]);
    assert!(batch.iter().all(|a| a.key().id().is_some()));
    assert_eq!(gateway.entity_count().await, 1000);
}

#[tokio::test]
async fn test_put_batch_counts_across_routes() {
    let (gateway, store) = setup();
    let mut batch: Vec<Article> = (0..490)
        .map(|i| Article::named(&format!("n{}", i), "named"))
        .chain(articles(490))
        .collect();

    store.put_batch(&mut batch).await.unwrap();

    let commits = gateway.commit_requests().await;
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].mutation.upsert.len(), 490);
    assert!(commits[0].mutation.insert_auto_id.is_empty());
    assert_eq!(commits[1].mutation.insert_auto_id.len(), 490);
}

#[tokio::test]
async fn test_empty_put_batch_issues_no_rpc() {
    let (gateway, store) = setup();
    store.put_batch::<Article>(&mut []).await.unwrap();
    assert_eq!(gateway.call_count().await, 0);
}

#[tokio::test]
async fn test_put_batch_stops_at_failed_chunk() {
    let (gateway, store) = setup();
    gateway.fail_nth_commit(2).await;
    let mut batch = articles(1000);

    let result = store.put_batch(&mut batch).await;

    assert!(matches!(result, Err(ModelError::RemoteCommit(_))));
    assert_eq!(gateway.commit_requests().await.len(), 2);
    assert_eq!(gateway.entity_count().await, 490);
    assert!(batch[..490].iter().all(|a| a.key().is_persisted()));
    assert!(batch[490..].iter().all(|a| !a.key().is_persisted()));

    // retrying upserts the first chunk instead of duplicating it
    store.put_batch(&mut batch).await.unwrap();
    assert_eq!(gateway.entity_count().await, 1000);
}

#[tokio::test]
async fn test_put_batch_respects_custom_limit() {
    let gateway = Arc::new(InMemoryGateway::new().with_max_mutations(10));
    let store = ModelStore::new(gateway.clone()).with_batch_limit(10);
    let mut batch = articles(25);

    store.put_batch(&mut batch).await.unwrap();

    assert_eq!(gateway.commit_requests().await.len(), 3);
}

#[tokio::test]
async fn test_batch_transactional_requires_transaction() {
    let (gateway, store) = setup();
    let mut upserts = articles(2);

    let result = store.batch_transactional(None, &mut upserts, &[]).await;

    assert!(matches!(result, Err(ModelError::MissingTransaction)));
    assert_eq!(gateway.call_count().await, 0);
}

#[tokio::test]
async fn test_batch_transactional_commits_once() {
    let (gateway, store) = setup();
    let mut doomed = Article::named("doomed", "Doomed");
    store.put(&mut doomed, None).await.unwrap();

    let txn = store.begin_transaction().await.unwrap();
    let mut upserts = vec![Article::new("one"), Article::named("two", "Two")];
    store
        .batch_transactional(Some(&txn), &mut upserts, std::slice::from_ref(&doomed))
        .await
        .unwrap();

    let commits = gateway.commit_requests().await;
    assert_eq!(commits.len(), 2);
    let commit = &commits[1];
    assert_eq!(commit.mode, CommitMode::Transactional);
    assert_eq!(commit.transaction.as_ref(), Some(&txn));
    assert_eq!(commit.mutation.insert_auto_id.len(), 1);
    assert_eq!(commit.mutation.upsert.len(), 1);
    assert_eq!(commit.mutation.delete.len(), 1);

    assert!(upserts[0].key().id().is_some());
    assert_eq!(gateway.entity_count().await, 2);
    assert_eq!(gateway.open_transactions().await, 0);
}

#[tokio::test]
async fn test_batch_transactional_rejects_unidentified_delete() {
    let (gateway, store) = setup();
    let txn = store.begin_transaction().await.unwrap();

    let result = store
        .batch_transactional(Some(&txn), &mut [], &[Article::new("ghost")])
        .await;

    assert!(matches!(result, Err(ModelError::MissingIdentity(_))));
    assert_eq!(gateway.commit_requests().await.len(), 0);
}

#[tokio::test]
async fn test_concurrent_write_surfaces_contention() {
    let (gateway, store) = setup();
    store.put(&mut Article::named("shared", "v1"), None).await.unwrap();

    let txn = store.begin_transaction().await.unwrap();
    let mut seen: Vec<Article> = store.fetch_by_name("shared", Some(&txn)).await.unwrap();

    // another writer gets in first
    store.put(&mut Article::named("shared", "v2"), None).await.unwrap();

    seen[0].title = "v3".to_string();
    let err = store.put(&mut seen[0], Some(&txn)).await.unwrap_err();
    assert!(err.is_contention());
    assert!(matches!(err, ModelError::RemoteCommit(_)));

    // no retry happened
    let commits = gateway.commit_requests().await;
    assert_eq!(commits.len(), 3);
    let stored: Vec<Article> = store.fetch_by_name("shared", None).await.unwrap();
    assert_eq!(stored[0].title, "v2");
}

#[tokio::test]
async fn test_rollback_releases_transaction() {
    let (gateway, store) = setup();
    let txn = store.begin_transaction().await.unwrap();
    assert_eq!(gateway.open_transactions().await, 1);

    store.rollback(&txn).await.unwrap();

    assert_eq!(gateway.open_transactions().await, 0);
    assert!(matches!(
        gateway.calls().await.last(),
        Some(GatewayCall::Rollback(handle)) if handle == &txn
    ));
    let err = store.rollback(&txn).await.unwrap_err();
    assert!(matches!(err, ModelError::Remote(_)));
}

#[tokio::test]
async fn test_allocate_id_then_put_upserts() {
    let (gateway, store) = setup();
    let mut article = Article::new("Reserved");

    let id = store.allocate_id(&mut article).await.unwrap();
    assert_eq!(article.key().id(), Some(id));
    assert_eq!(gateway.entity_count().await, 0);

    store.put(&mut article, None).await.unwrap();
    let commits = gateway.commit_requests().await;
    assert_eq!(commits[0].mutation.upsert.len(), 1);

    let err = store.allocate_id(&mut article).await.unwrap_err();
    assert!(matches!(err, ModelError::InvalidState(_)));
}

#[tokio::test]
async fn test_namespaces_are_isolated() {
    let gateway = Arc::new(InMemoryGateway::new());
    let tenant_a = ModelStore::new(gateway.clone()).with_namespace("tenant-a");
    let tenant_b = ModelStore::new(gateway.clone()).with_namespace("tenant-b");

    let mut article = Article::named("shared-name", "A's");
    tenant_a.put(&mut article, None).await.unwrap();

    let in_a: Vec<Article> = tenant_a.all().await.unwrap();
    let in_b: Vec<Article> = tenant_b.all().await.unwrap();
    assert_eq!(in_a.len(), 1);
    assert!(in_b.is_empty());
    assert!(gateway
        .peek(&article.key().to_wire(Some("tenant-a")))
        .await
        .is_some());
}

#[tokio::test]
async fn test_key_kind_must_match_model() {
    let (gateway, store) = setup();
    let mut article = Article::new("Misfiled");
    article.key = EntityKey::new("Other");

    let err = store.put(&mut article, None).await.unwrap_err();
    assert!(matches!(err, ModelError::InvalidState(_)));
    assert_eq!(gateway.call_count().await, 0);
}
