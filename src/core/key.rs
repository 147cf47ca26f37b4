// ============================================================================
// Entity Keys
// ============================================================================
//
// A key addresses one entity inside a kind: either the store assigns the id
// on first insert (AutoAssign), or the caller supplies a numeric id or a
// string name. Exactly one identity form holds at any time.
//
// ============================================================================

use super::error::{ModelError, Result};
use crate::wire;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Identity {
    #[default]
    AutoAssign,
    NumericId(i64),
    StringName(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    kind: String,
    identity: Identity,
    namespace: Option<String>,
}

impl EntityKey {
    /// A fresh key whose identity the store will assign.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            identity: Identity::AutoAssign,
            namespace: None,
        }
    }

    /// A key already named, as for models keyed by a natural identifier.
    pub fn named(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            identity: Identity::StringName(name.into()),
            namespace: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_numeric_id(mut self, id: i64) -> Result<Self> {
        self.set_numeric_id(id)?;
        Ok(self)
    }

    pub fn with_string_name(mut self, name: impl Into<String>) -> Result<Self> {
        self.set_string_name(name)?;
        Ok(self)
    }

    /// Fails with `InvalidState` when the key already holds a string name.
    pub fn set_numeric_id(&mut self, id: i64) -> Result<()> {
        if let Identity::StringName(name) = &self.identity {
            return Err(ModelError::InvalidState(format!(
                "key of kind '{}' already has name '{}'; cannot also set id {}",
                self.kind, name, id
            )));
        }
        self.identity = Identity::NumericId(id);
        Ok(())
    }

    /// Fails with `InvalidState` when the key already holds a numeric id.
    pub fn set_string_name(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if let Identity::NumericId(id) = &self.identity {
            return Err(ModelError::InvalidState(format!(
                "key of kind '{}' already has id {}; cannot also set name '{}'",
                self.kind, id, name
            )));
        }
        self.identity = Identity::StringName(name);
        Ok(())
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn id(&self) -> Option<i64> {
        match self.identity {
            Identity::NumericId(id) => Some(id),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match &self.identity {
            Identity::StringName(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_persisted(&self) -> bool {
        !matches!(self.identity, Identity::AutoAssign)
    }

    /// Builds the single-segment wire key. The key's own namespace wins over
    /// `default_namespace`.
    pub fn to_wire(&self, default_namespace: Option<&str>) -> wire::Key {
        let namespace = self.namespace.as_deref().or(default_namespace);
        let (id, name) = match &self.identity {
            Identity::AutoAssign => (None, None),
            Identity::NumericId(id) => (Some(*id), None),
            Identity::StringName(name) => (None, Some(name.clone())),
        };

        wire::Key {
            partition_id: namespace.map(|ns| wire::PartitionId {
                dataset_id: None,
                namespace: Some(ns.to_string()),
            }),
            path: vec![wire::KeyPathElement {
                kind: self.kind.clone(),
                id,
                name,
            }],
        }
    }

    pub fn from_wire(key: &wire::Key) -> Result<Self> {
        let leaf = key
            .leaf()
            .ok_or_else(|| ModelError::MalformedKey("key has an empty path".to_string()))?;

        let identity = match (leaf.id, &leaf.name) {
            (Some(_), Some(_)) => {
                return Err(ModelError::InvalidState(format!(
                    "key of kind '{}' carries both an id and a name",
                    leaf.kind
                )));
            }
            (Some(id), None) => Identity::NumericId(id),
            (None, Some(name)) => Identity::StringName(name.clone()),
            (None, None) => Identity::AutoAssign,
        };

        Ok(Self {
            kind: leaf.kind.clone(),
            identity,
            namespace: key.namespace().map(str::to_string),
        })
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ns) = &self.namespace {
            write!(f, "{}:", ns)?;
        }
        match &self.identity {
            Identity::AutoAssign => write!(f, "{}(auto)", self.kind),
            Identity::NumericId(id) => write!(f, "{}({})", self.kind, id),
            Identity::StringName(name) => write!(f, "{}('{}')", self.kind, name),
        }
    }
}
