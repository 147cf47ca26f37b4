use super::batch::{BatchChunk, DEFAULT_BATCH_LIMIT, Route, plan_batch};
use super::{HookContext, Model};
use crate::cache::{CacheResult, EntityCache};
use crate::core::{Entity, EntityKey, ModelError, Result};
use crate::gateway::{DatastoreGateway, HttpGateway};
use crate::query::Query;
use crate::wire::{
    self, AllocateIdsRequest, BeginTransactionRequest, CommitRequest, CommitResponse,
    LookupRequest, Mutation, PartitionId, RollbackRequest, RunQueryRequest, TransactionHandle,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Entry point for reading and writing models.
///
/// Holds the gateway, the namespace applied to keys that do not carry their
/// own, and the cache handed to model hooks. Cheap to clone.
#[derive(Clone)]
pub struct ModelStore {
    gateway: Arc<dyn DatastoreGateway>,
    hooks: HookContext,
    namespace: Option<String>,
    batch_limit: usize,
}

impl ModelStore {
    pub fn new(gateway: Arc<dyn DatastoreGateway>) -> Self {
        Self {
            gateway,
            hooks: HookContext::default(),
            namespace: None,
            batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }

    /// Builds a store over a shared HTTP gateway, taking its configured
    /// namespace. Keep the `Arc` to install or refresh the bearer token with
    /// [`HttpGateway::set_access_token`].
    pub fn connect(gateway: Arc<HttpGateway>) -> Self {
        let namespace = gateway.config().namespace.clone();
        let store = Self::new(gateway);
        match namespace {
            Some(ns) => store.with_namespace(ns),
            None => store,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn EntityCache>) -> Self {
        self.hooks.set_cache(cache);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.hooks.set_ttl(ttl);
        self
    }

    /// Items per commit in [`ModelStore::put_batch`]. Zero is treated as one.
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    pub fn gateway(&self) -> &Arc<dyn DatastoreGateway> {
        &self.gateway
    }

    pub fn hooks(&self) -> &HookContext {
        &self.hooks
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub async fn begin_transaction(&self) -> Result<TransactionHandle> {
        let response = self
            .gateway
            .begin_transaction(BeginTransactionRequest::default())
            .await
            .map_err(ModelError::Remote)?;
        debug!(transaction = %response.transaction, "transaction started");
        Ok(response.transaction)
    }

    pub async fn rollback(&self, txn: &TransactionHandle) -> Result<()> {
        self.gateway
            .rollback(RollbackRequest {
                transaction: txn.clone(),
            })
            .await
            .map_err(ModelError::Remote)?;
        debug!(transaction = %txn, "transaction rolled back");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Writes one item: inserted with a store-assigned id when its key has no
    /// identity yet, upserted otherwise. On success a new id is written back
    /// into the item's key and its post-write hook runs.
    pub async fn put<M: Model>(&self, item: &mut M, txn: Option<&TransactionHandle>) -> Result<()> {
        let entity = self.wire_entity(&*item)?;
        let route = Route::for_key(item.key());
        let mutation = match route {
            Route::InsertAutoId => Mutation {
                insert_auto_id: vec![entity],
                ..Mutation::default()
            },
            Route::Upsert => Mutation {
                upsert: vec![entity],
                ..Mutation::default()
            },
        };

        debug!(
            kind = M::kind_name(),
            ?route,
            transactional = txn.is_some(),
            "put"
        );
        let response = self.commit(mutation, txn).await?;
        if route == Route::InsertAutoId {
            assign_ids(
                std::slice::from_mut(&mut *item),
                &[0],
                &response.mutation_result.insert_auto_id_keys,
            );
        }

        self.after_write(&*item).await;
        Ok(())
    }

    /// Deletes one item. Its pre-delete hook runs before the commit, so a
    /// failed delete leaves the cache entry evicted and the stored entity
    /// intact.
    pub async fn delete<M: Model>(&self, item: &M, txn: Option<&TransactionHandle>) -> Result<()> {
        require_identity(item)?;
        let key = self.wire_key(item.key());

        self.before_delete(item).await;
        debug!(
            kind = M::kind_name(),
            key = %item.key(),
            transactional = txn.is_some(),
            "delete"
        );
        self.commit(
            Mutation {
                delete: vec![key],
                ..Mutation::default()
            },
            txn,
        )
        .await?;
        Ok(())
    }

    /// Commits `upserts` and `deletes` atomically in one transactional
    /// commit. A missing transaction is rejected before any hook or call.
    pub async fn batch_transactional<M: Model>(
        &self,
        txn: Option<&TransactionHandle>,
        upserts: &mut [M],
        deletes: &[M],
    ) -> Result<()> {
        let txn = txn.ok_or(ModelError::MissingTransaction)?;
        for item in deletes {
            require_identity(item)?;
        }

        let chunk = plan_batch(upserts.iter().map(|m| Route::for_key(m.key())), usize::MAX)
            .into_iter()
            .next()
            .unwrap_or_default();
        let mut entities = self.wire_entities(upserts)?;
        let mut mutation = chunk_mutation(&chunk, &mut entities);

        for item in deletes {
            self.before_delete(item).await;
            mutation.delete.push(self.wire_key(item.key()));
        }

        debug!(
            kind = M::kind_name(),
            transaction = %txn,
            mutations = mutation.len(),
            "batch commit"
        );
        let response = self.commit(mutation, Some(txn)).await?;
        assign_ids(
            upserts,
            &chunk.insert_auto_id,
            &response.mutation_result.insert_auto_id_keys,
        );

        for item in upserts.iter() {
            self.after_write(item).await;
        }
        Ok(())
    }

    /// Writes `items` without a transaction, one commit per chunk of at most
    /// the batch limit.
    ///
    /// Chunks commit in order. Each chunk's items get their ids and run their
    /// post-write hooks once that chunk is committed. If a chunk fails, its
    /// error is returned, earlier chunks stay written, and items of the failed
    /// and later chunks are left untouched; every item already carrying an id
    /// is upserted when the batch is retried.
    pub async fn put_batch<M: Model>(&self, items: &mut [M]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let chunks = plan_batch(items.iter().map(|m| Route::for_key(m.key())), self.batch_limit);
        let mut entities = self.wire_entities(items)?;

        let total = chunks.len();
        for (position, chunk) in chunks.iter().enumerate() {
            let mutation = chunk_mutation(chunk, &mut entities);
            debug!(
                kind = M::kind_name(),
                chunk = position + 1,
                of = total,
                inserts = chunk.insert_auto_id.len(),
                upserts = chunk.upsert.len(),
                "batch put"
            );
            let response = self.commit(mutation, None).await?;
            assign_ids(
                items,
                &chunk.insert_auto_id,
                &response.mutation_result.insert_auto_id_keys,
            );
            for index in chunk.indices() {
                self.after_write(&items[index]).await;
            }
        }
        Ok(())
    }

    /// Reserves an id for an item that has no identity yet and writes it
    /// into the item's key without storing anything.
    pub async fn allocate_id<M: Model>(&self, item: &mut M) -> Result<i64> {
        if item.key().is_persisted() {
            return Err(ModelError::InvalidState(format!(
                "{} already has an identity",
                item.key()
            )));
        }

        let response = self
            .gateway
            .allocate_ids(AllocateIdsRequest {
                keys: vec![self.wire_key(item.key())],
            })
            .await
            .map_err(ModelError::Remote)?;

        let id = response
            .keys
            .first()
            .and_then(wire::Key::leaf)
            .and_then(|leaf| leaf.id)
            .ok_or_else(|| ModelError::MalformedKey("allocateIds returned no id".to_string()))?;
        item.key_mut().set_numeric_id(id)?;
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Looks up the entity named `name`; empty when it does not exist.
    pub async fn fetch_by_name<M: Model>(
        &self,
        name: &str,
        txn: Option<&TransactionHandle>,
    ) -> Result<Vec<M>> {
        let key = EntityKey::new(M::kind_name()).with_string_name(name)?;
        self.lookup(&key, txn).await
    }

    /// Looks up the entity with numeric id `id`; empty when it does not exist.
    pub async fn fetch_by_id<M: Model>(
        &self,
        id: i64,
        txn: Option<&TransactionHandle>,
    ) -> Result<Vec<M>> {
        let key = EntityKey::new(M::kind_name()).with_numeric_id(id)?;
        self.lookup(&key, txn).await
    }

    pub async fn all<M: Model>(&self) -> Result<Vec<M>> {
        self.run_query(M::query()).await
    }

    /// Runs `query` in the store's namespace and decodes every result as `M`.
    pub async fn run_query<M: Model>(&self, query: Query) -> Result<Vec<M>> {
        let request = RunQueryRequest {
            partition_id: self.namespace.as_ref().map(|ns| PartitionId {
                dataset_id: None,
                namespace: Some(ns.clone()),
            }),
            query,
        };
        let response = self
            .gateway
            .run_query(request)
            .await
            .map_err(ModelError::Remote)?;
        self.decode_results(response.batch.entity_results).await
    }

    async fn lookup<M: Model>(
        &self,
        key: &EntityKey,
        txn: Option<&TransactionHandle>,
    ) -> Result<Vec<M>> {
        let request = LookupRequest::new(vec![self.wire_key(key)], txn);
        let response = self
            .gateway
            .lookup(request)
            .await
            .map_err(ModelError::Remote)?;
        self.decode_results(response.found).await
    }

    async fn decode_results<M: Model>(&self, results: Vec<wire::EntityResult>) -> Result<Vec<M>> {
        let mut models = Vec::with_capacity(results.len());
        for result in results {
            let model = M::from_entity(Entity::from_wire(&result.entity)?)?;
            log_hook_failure("read", &model, model.on_item_read(&self.hooks).await);
            models.push(model);
        }
        Ok(models)
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    fn wire_key(&self, key: &EntityKey) -> wire::Key {
        key.to_wire(self.namespace())
    }

    fn wire_entity<M: Model>(&self, item: &M) -> Result<wire::Entity> {
        Ok(item.to_entity()?.to_wire(self.namespace()))
    }

    fn wire_entities<M: Model>(&self, items: &[M]) -> Result<Vec<Option<wire::Entity>>> {
        items
            .iter()
            .map(|item| self.wire_entity(item).map(Some))
            .collect()
    }

    async fn commit(
        &self,
        mutation: Mutation,
        txn: Option<&TransactionHandle>,
    ) -> Result<CommitResponse> {
        self.gateway
            .commit(CommitRequest::new(mutation, txn))
            .await
            .map_err(ModelError::RemoteCommit)
    }

    async fn after_write<M: Model>(&self, item: &M) {
        log_hook_failure("write", item, item.on_item_write(&self.hooks).await);
    }

    async fn before_delete<M: Model>(&self, item: &M) {
        log_hook_failure("delete", item, item.before_item_delete(&self.hooks).await);
    }
}

fn require_identity<M: Model>(item: &M) -> Result<()> {
    if item.key().is_persisted() {
        Ok(())
    } else {
        Err(ModelError::MissingIdentity(M::kind_name().to_string()))
    }
}

/// Moves the chunk's prepared entities out of `entities` into a mutation.
fn chunk_mutation(chunk: &BatchChunk, entities: &mut [Option<wire::Entity>]) -> Mutation {
    Mutation {
        insert_auto_id: take_entities(&chunk.insert_auto_id, &mut *entities),
        upsert: take_entities(&chunk.upsert, &mut *entities),
        delete: Vec::new(),
    }
}

fn take_entities(indices: &[usize], entities: &mut [Option<wire::Entity>]) -> Vec<wire::Entity> {
    indices
        .iter()
        .filter_map(|&i| entities.get_mut(i).and_then(Option::take))
        .collect()
}

/// Writes the ids the store assigned to inserted entities back into the
/// corresponding items, pairing them in mutation order.
/// Writes store-assigned ids back into the inserted items. The commit has
/// already landed, so a key that cannot be applied is logged and its item
/// keeps `AutoAssign` while the others still get their ids.
fn assign_ids<M: Model>(items: &mut [M], inserted: &[usize], keys: &[wire::Key]) {
    if keys.len() != inserted.len() {
        warn!(
            "commit returned {} keys for {} inserted {} entities",
            keys.len(),
            inserted.len(),
            M::kind_name()
        );
    }
    for (&index, key) in inserted.iter().zip(keys) {
        let Some(item) = items.get_mut(index) else {
            continue;
        };
        let applied = EntityKey::from_wire(key)
            .and_then(|returned| {
                returned.id().ok_or_else(|| {
                    ModelError::MalformedKey(format!("commit returned a key without id: {:?}", key))
                })
            })
            .and_then(|id| item.key_mut().set_numeric_id(id));
        if let Err(err) = applied {
            warn!(
                "assigned id dropped: kind='{}' index={} error='{}'",
                M::kind_name(),
                index,
                err
            );
        }
    }
}

fn log_hook_failure<M: Model>(stage: &str, item: &M, result: CacheResult<()>) {
    if let Err(err) = result {
        warn!(
            "cache hook failed: stage='{}' kind='{}' key='{}' error='{}'",
            stage,
            M::kind_name(),
            item.key(),
            err
        );
    }
}
