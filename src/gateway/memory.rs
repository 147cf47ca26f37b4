// ============================================================================
// In-Memory Gateway
// ============================================================================
//
// A complete in-process stand-in for the remote store: id allocation,
// optimistic transactions, lookups and query evaluation. Every RPC is
// recorded so callers can assert on the exact requests that were issued,
// and commits can be made to fail on demand.
//
// Transactions are optimistic: a transactional commit fails with
// `Contention` when any key read or written inside the transaction was
// modified by another commit after the transaction began. Commit and
// rollback both end the transaction.
//
// ============================================================================

use super::{DatastoreGateway, GatewayResult};
use crate::core::GatewayError;
use crate::core::value::parse_date;
use crate::query::{Direction, Filter, PropertyOrder};
use crate::wire::{
    AllocateIdsRequest, AllocateIdsResponse, BeginTransactionRequest, BeginTransactionResponse,
    CommitMode, CommitRequest, CommitResponse, Entity, EntityResult, Key, KeyPathElement,
    LookupRequest, LookupResponse, MutationResult, PartitionId, QueryResultBatch,
    RollbackRequest, RollbackResponse, RunQueryRequest, RunQueryResponse, TransactionHandle, Value,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Maximum number of mutations the store accepts in one commit.
pub const DEFAULT_MAX_MUTATIONS: usize = 500;

/// One recorded RPC.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    AllocateIds(AllocateIdsRequest),
    BeginTransaction,
    Commit(CommitRequest),
    Lookup(LookupRequest),
    Rollback(TransactionHandle),
    RunQuery(RunQueryRequest),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct StoredKey {
    namespace: Option<String>,
    kind: String,
    id: Option<i64>,
    name: Option<String>,
}

impl StoredKey {
    fn complete(key: &Key) -> GatewayResult<Self> {
        if !key.is_complete() {
            return Err(GatewayError::InvalidArgument(
                "key is incomplete; an id or name is required".to_string(),
            ));
        }
        Ok(Self::of(key))
    }

    fn of(key: &Key) -> Self {
        let leaf = key.leaf();
        Self {
            namespace: key.namespace().map(str::to_string),
            kind: leaf.map(|l| l.kind.clone()).unwrap_or_default(),
            id: leaf.and_then(|l| l.id),
            name: leaf.and_then(|l| l.name.clone()),
        }
    }

    fn to_wire(&self) -> Key {
        Key {
            partition_id: self.namespace.as_ref().map(|ns| PartitionId {
                dataset_id: None,
                namespace: Some(ns.clone()),
            }),
            path: vec![KeyPathElement {
                kind: self.kind.clone(),
                id: self.id,
                name: self.name.clone(),
            }],
        }
    }
}

struct TxnState {
    start_version: u64,
    touched: HashSet<StoredKey>,
}

#[derive(Default)]
struct State {
    entities: BTreeMap<StoredKey, Entity>,
    modified_at: HashMap<StoredKey, u64>,
    version: u64,
    last_id: i64,
    transactions: HashMap<TransactionHandle, TxnState>,
    calls: Vec<GatewayCall>,
    commits_seen: usize,
    failing_commits: HashSet<usize>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn assign_id(&mut self, key: &Key) -> GatewayResult<Key> {
        if key.is_complete() {
            return Err(GatewayError::InvalidArgument(
                "auto-id key must not carry an id or name".to_string(),
            ));
        }
        let mut stored = StoredKey::of(key);
        if stored.kind.is_empty() {
            return Err(GatewayError::InvalidArgument("key has no kind".to_string()));
        }
        stored.id = Some(self.next_id());
        Ok(stored.to_wire())
    }

    fn finish_transaction(&mut self, txn: &TransactionHandle) -> GatewayResult<TxnState> {
        self.transactions.remove(txn).ok_or_else(|| {
            GatewayError::InvalidArgument(format!("unknown or finished transaction '{}'", txn))
        })
    }

    fn commit(&mut self, request: &CommitRequest, max_mutations: usize) -> GatewayResult<CommitResponse> {
        self.commits_seen += 1;
        if self.failing_commits.remove(&self.commits_seen) {
            if let Some(txn) = &request.transaction {
                self.transactions.remove(txn);
            }
            return Err(GatewayError::Unavailable(format!(
                "injected failure on commit #{}",
                self.commits_seen
            )));
        }

        // Any commit naming a transaction ends it, whatever its outcome.
        let finished = match &request.transaction {
            Some(txn) => Some((txn, self.finish_transaction(txn)?)),
            None => None,
        };
        match (request.mode, &finished) {
            (CommitMode::Transactional, None) => {
                return Err(GatewayError::InvalidArgument(
                    "transactional commit requires a transaction".to_string(),
                ));
            }
            (CommitMode::NonTransactional, Some(_)) => {
                return Err(GatewayError::InvalidArgument(
                    "non-transactional commit must not name a transaction".to_string(),
                ));
            }
            _ => {}
        }

        let mutation = &request.mutation;
        if mutation.len() > max_mutations {
            return Err(GatewayError::InvalidArgument(format!(
                "too many mutations in one commit: {} > {}",
                mutation.len(),
                max_mutations
            )));
        }

        let upserts = mutation
            .upsert
            .iter()
            .map(|e| StoredKey::complete(&e.key))
            .collect::<GatewayResult<Vec<_>>>()?;
        let deletes = mutation
            .delete
            .iter()
            .map(StoredKey::complete)
            .collect::<GatewayResult<Vec<_>>>()?;
        if mutation
            .insert_auto_id
            .iter()
            .any(|e| e.key.is_complete() || e.key.leaf().is_none_or(|l| l.kind.is_empty()))
        {
            return Err(GatewayError::InvalidArgument(
                "insertAutoId entity needs a kind and an incomplete key".to_string(),
            ));
        }

        if let Some((txn, state)) = &finished {
            let conflicted = state
                .touched
                .iter()
                .chain(upserts.iter())
                .chain(deletes.iter())
                .find(|key| {
                    self.modified_at
                        .get(*key)
                        .is_some_and(|v| *v > state.start_version)
                });
            if let Some(key) = conflicted {
                return Err(GatewayError::Contention(format!(
                    "entity {}({:?}/{:?}) changed during transaction '{}'",
                    key.kind, key.id, key.name, txn
                )));
            }
        }

        self.version += 1;
        let version = self.version;
        let mut result = MutationResult::default();

        for entity in &mutation.insert_auto_id {
            let key = self.assign_id(&entity.key)?;
            let stored = StoredKey::of(&key);
            self.entities.insert(
                stored.clone(),
                Entity {
                    key: key.clone(),
                    properties: entity.properties.clone(),
                },
            );
            self.modified_at.insert(stored, version);
            result.insert_auto_id_keys.push(key);
            result.index_updates += 1;
        }

        for (stored, entity) in upserts.into_iter().zip(&mutation.upsert) {
            self.entities.insert(stored.clone(), entity.clone());
            self.modified_at.insert(stored, version);
            result.index_updates += 1;
        }

        for stored in deletes {
            if self.entities.remove(&stored).is_some() {
                result.index_updates += 1;
            }
            self.modified_at.insert(stored, version);
        }

        Ok(CommitResponse {
            mutation_result: result,
        })
    }
}

pub struct InMemoryGateway {
    state: Mutex<State>,
    max_mutations: usize,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_mutations: DEFAULT_MAX_MUTATIONS,
        }
    }

    /// Overrides the per-commit mutation limit.
    pub fn with_max_mutations(mut self, max: usize) -> Self {
        self.max_mutations = max;
        self
    }

    /// Makes the `n`-th commit (counted from 1 over the gateway's lifetime)
    /// fail with `Unavailable` without applying anything.
    pub async fn fail_nth_commit(&self, n: usize) {
        self.state.lock().await.failing_commits.insert(n);
    }

    pub async fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.state.lock().await.calls.len()
    }

    pub async fn commit_requests(&self) -> Vec<CommitRequest> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                GatewayCall::Commit(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn entity_count(&self) -> usize {
        self.state.lock().await.entities.len()
    }

    /// Reads an entity without recording a call.
    pub async fn peek(&self, key: &Key) -> Option<Entity> {
        self.state
            .lock()
            .await
            .entities
            .get(&StoredKey::of(key))
            .cloned()
    }

    pub async fn open_transactions(&self) -> usize {
        self.state.lock().await.transactions.len()
    }
}

#[async_trait]
impl DatastoreGateway for InMemoryGateway {
    async fn allocate_ids(&self, request: AllocateIdsRequest) -> GatewayResult<AllocateIdsResponse> {
        let mut state = self.state.lock().await;
        state.calls.push(GatewayCall::AllocateIds(request.clone()));

        let keys = request
            .keys
            .iter()
            .map(|key| state.assign_id(key))
            .collect::<GatewayResult<Vec<_>>>()?;
        Ok(AllocateIdsResponse { keys })
    }

    async fn begin_transaction(
        &self,
        _request: BeginTransactionRequest,
    ) -> GatewayResult<BeginTransactionResponse> {
        let mut state = self.state.lock().await;
        state.calls.push(GatewayCall::BeginTransaction);

        let transaction = TransactionHandle::new(Uuid::new_v4().to_string());
        let start_version = state.version;
        state.transactions.insert(
            transaction.clone(),
            TxnState {
                start_version,
                touched: HashSet::new(),
            },
        );
        Ok(BeginTransactionResponse { transaction })
    }

    async fn commit(&self, request: CommitRequest) -> GatewayResult<CommitResponse> {
        let mut state = self.state.lock().await;
        state.calls.push(GatewayCall::Commit(request.clone()));
        state.commit(&request, self.max_mutations)
    }

    async fn lookup(&self, request: LookupRequest) -> GatewayResult<LookupResponse> {
        let mut state = self.state.lock().await;
        state.calls.push(GatewayCall::Lookup(request.clone()));

        let keys = request
            .keys
            .iter()
            .map(StoredKey::complete)
            .collect::<GatewayResult<Vec<_>>>()?;

        if let Some(txn) = request.transaction() {
            let txn_state = state.transactions.get_mut(txn).ok_or_else(|| {
                GatewayError::InvalidArgument(format!("unknown or finished transaction '{}'", txn))
            })?;
            txn_state.touched.extend(keys.iter().cloned());
        }

        let mut response = LookupResponse::default();
        for (stored, key) in keys.iter().zip(&request.keys) {
            match state.entities.get(stored) {
                Some(entity) => response.found.push(EntityResult {
                    entity: entity.clone(),
                }),
                None => response.missing.push(EntityResult {
                    entity: Entity {
                        key: key.clone(),
                        properties: BTreeMap::new(),
                    },
                }),
            }
        }
        Ok(response)
    }

    async fn rollback(&self, request: RollbackRequest) -> GatewayResult<RollbackResponse> {
        let mut state = self.state.lock().await;
        state.calls.push(GatewayCall::Rollback(request.transaction.clone()));
        state.finish_transaction(&request.transaction)?;
        Ok(RollbackResponse {})
    }

    async fn run_query(&self, request: RunQueryRequest) -> GatewayResult<RunQueryResponse> {
        let mut state = self.state.lock().await;
        state.calls.push(GatewayCall::RunQuery(request.clone()));

        let namespace = request
            .partition_id
            .as_ref()
            .and_then(|p| p.namespace.clone());
        let query = &request.query;

        let mut matched: Vec<&Entity> = state
            .entities
            .iter()
            .filter(|(key, _)| key.namespace == namespace)
            .filter(|(key, _)| query.kinds.iter().any(|k| k.name == key.kind) || query.kinds.is_empty())
            .map(|(_, entity)| entity)
            .filter(|entity| query.filter.as_ref().is_none_or(|f| matches(f, entity)))
            .filter(|entity| {
                query
                    .order
                    .iter()
                    .all(|order| sort_value(entity, order).is_some())
            })
            .collect();

        matched.sort_by(|a, b| {
            for order in &query.order {
                let (Some(left), Some(right)) = (sort_value(a, order), sort_value(b, order)) else {
                    continue;
                };
                let ordering = match order.direction {
                    Direction::Ascending => left.total_cmp(&right),
                    Direction::Descending => right.total_cmp(&left),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        Ok(RunQueryResponse {
            batch: QueryResultBatch {
                entity_results: matched
                    .into_iter()
                    .map(|entity| EntityResult {
                        entity: entity.clone(),
                    })
                    .collect(),
                more_results: Some("NO_MORE_RESULTS".to_string()),
            },
        })
    }
}

/// A comparable scalar. Values of different types order by type rank.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Scalar<'a> {
    Str(&'a str),
    Date(DateTime<Utc>),
}

impl<'a> Scalar<'a> {
    fn of(value: &'a Value) -> Option<Self> {
        if let Some(s) = &value.string_value {
            return Some(Self::Str(s));
        }
        value
            .date_time_value
            .as_deref()
            .and_then(|d| parse_date(d).ok())
            .map(Self::Date)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Str(_) => 0,
            Self::Date(_) => 1,
        }
    }

    /// `None` for values of different types; filters never match across types.
    fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    fn total_cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

/// Indexed scalars of a property; list properties contribute every indexed
/// element.
fn indexed_scalars(property: &Value) -> Vec<Scalar<'_>> {
    match &property.list_value {
        Some(elements) => elements
            .iter()
            .filter(|e| e.is_indexed())
            .filter_map(Scalar::of)
            .collect(),
        None if property.is_indexed() => Scalar::of(property).into_iter().collect(),
        None => Vec::new(),
    }
}

fn matches(filter: &Filter, entity: &Entity) -> bool {
    match filter {
        Filter::CompositeFilter(composite) => composite.filters.iter().all(|f| matches(f, entity)),
        Filter::PropertyFilter(pf) => {
            let Some(property) = entity.properties.get(&pf.property.name) else {
                return false;
            };
            let Some(expected) = Scalar::of(&pf.value) else {
                return false;
            };
            indexed_scalars(property).iter().any(|stored| {
                stored
                    .compare(&expected)
                    .is_some_and(|ordering| pf.operator.accepts(ordering))
            })
        }
    }
}

/// Multi-valued properties sort by their smallest value ascending and their
/// largest value descending.
fn sort_value<'a>(entity: &'a Entity, order: &PropertyOrder) -> Option<Scalar<'a>> {
    let scalars = indexed_scalars(entity.properties.get(&order.property.name)?);
    match order.direction {
        Direction::Ascending => scalars.into_iter().min_by(|a, b| a.total_cmp(b)),
        Direction::Descending => scalars.into_iter().max_by(|a, b| a.total_cmp(b)),
    }
}
