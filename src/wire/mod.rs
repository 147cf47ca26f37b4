// ============================================================================
// Wire Layout
// ============================================================================
//
// JSON request/response bodies exchanged with the remote document store.
// Field names follow the store's camelCase layout; key paths are only ever
// produced with a single `{kind, id|name}` segment.
//
// ============================================================================

mod int64;

use crate::query::Query;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque transaction token handed out by `beginTransaction`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionHandle(String);

impl TransactionHandle {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionId {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPathElement {
    pub kind: String,
    #[serde(default, with = "int64", skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_id: Option<PartitionId>,
    #[serde(default)]
    pub path: Vec<KeyPathElement>,
}

impl Key {
    pub fn namespace(&self) -> Option<&str> {
        self.partition_id
            .as_ref()
            .and_then(|p| p.namespace.as_deref())
    }

    /// The last path element, which addresses the entity itself.
    pub fn leaf(&self) -> Option<&KeyPathElement> {
        self.path.last()
    }

    /// A key is complete once its leaf carries an id or a name.
    pub fn is_complete(&self) -> bool {
        self.leaf()
            .is_some_and(|leaf| leaf.id.is_some() || leaf.name.is_some())
    }
}

/// A property value. Properties and list elements share this shape; exactly
/// one of the value fields is expected to be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Value {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_value: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed: Option<bool>,
}

pub type Property = Value;

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            string_value: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn date_time(value: impl Into<String>) -> Self {
        Self {
            date_time_value: Some(value.into()),
            ..Self::default()
        }
    }

    /// Unset `indexed` means indexed.
    pub fn is_indexed(&self) -> bool {
        self.indexed.unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub key: Key,
    #[serde(default)]
    pub properties: BTreeMap<String, Property>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityResult {
    pub entity: Entity,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upsert: Vec<Entity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insert_auto_id: Vec<Entity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<Key>,
}

impl Mutation {
    /// Number of individual mutations carried by this request.
    pub fn len(&self) -> usize {
        self.upsert.len() + self.insert_auto_id.len() + self.delete.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitMode {
    Transactional,
    NonTransactional,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub mode: CommitMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionHandle>,
    pub mutation: Mutation,
}

impl CommitRequest {
    /// `Transactional` when a transaction is given, `NonTransactional` otherwise.
    pub fn new(mutation: Mutation, txn: Option<&TransactionHandle>) -> Self {
        Self {
            mode: if txn.is_some() {
                CommitMode::Transactional
            } else {
                CommitMode::NonTransactional
            },
            transaction: txn.cloned(),
            mutation,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationResult {
    #[serde(default)]
    pub index_updates: i64,
    #[serde(default)]
    pub insert_auto_id_keys: Vec<Key>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    #[serde(default)]
    pub mutation_result: MutationResult,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionHandle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_options: Option<ReadOptions>,
    pub keys: Vec<Key>,
}

impl LookupRequest {
    pub fn new(keys: Vec<Key>, txn: Option<&TransactionHandle>) -> Self {
        Self {
            read_options: txn.map(|t| ReadOptions {
                transaction: Some(t.clone()),
            }),
            keys,
        }
    }

    pub fn transaction(&self) -> Option<&TransactionHandle> {
        self.read_options
            .as_ref()
            .and_then(|o| o.transaction.as_ref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResponse {
    #[serde(default)]
    pub found: Vec<EntityResult>,
    #[serde(default)]
    pub missing: Vec<EntityResult>,
    #[serde(default)]
    pub deferred: Vec<Key>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_id: Option<PartitionId>,
    pub query: Query,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResultBatch {
    #[serde(default)]
    pub entity_results: Vec<EntityResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub more_results: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunQueryResponse {
    #[serde(default)]
    pub batch: QueryResultBatch,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginTransactionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginTransactionResponse {
    pub transaction: TransactionHandle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRequest {
    pub transaction: TransactionHandle,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackResponse {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateIdsRequest {
    pub keys: Vec<Key>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateIdsResponse {
    #[serde(default)]
    pub keys: Vec<Key>,
}
