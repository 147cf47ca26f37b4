// ============================================================================
// Entity Models
// ============================================================================
//
// A model is a concrete entity type: a constant kind name, its key state, a
// property mapping and a reconstruction from a stored entity. `ModelStore`
// drives every read and write generically over this trait.
//
// Lifecycle hooks let a model keep an external cache consistent with the
// store. Hook failures are logged by the store and never abort the
// surrounding operation.
//
// ============================================================================

pub mod batch;
pub mod feed;
pub mod store;

use crate::cache::{CacheResult, DEFAULT_CACHE_TTL, EntityCache};
use crate::core::{Entity, EntityKey, ModelError, PropertyMap, Result};
use crate::query::Query;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use batch::{BatchChunk, DEFAULT_BATCH_LIMIT, Route, plan_batch};
pub use feed::FeedModel;
pub use store::ModelStore;

/// What hooks get to work with: the store's cache, if one is configured,
/// and the TTL to apply to entries.
#[derive(Clone)]
pub struct HookContext {
    cache: Option<Arc<dyn EntityCache>>,
    ttl: Duration,
}

impl Default for HookContext {
    fn default() -> Self {
        Self {
            cache: None,
            ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl HookContext {
    pub fn new(cache: Option<Arc<dyn EntityCache>>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub fn cache(&self) -> Option<&dyn EntityCache> {
        self.cache.as_deref()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub(crate) fn set_cache(&mut self, cache: Arc<dyn EntityCache>) {
        self.cache = Some(cache);
    }

    pub(crate) fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = ttl;
    }
}

#[async_trait]
pub trait Model: Send + Sync + Sized {
    /// Kind shared by every instance of the type.
    fn kind_name() -> &'static str;

    fn key(&self) -> &EntityKey;

    fn key_mut(&mut self) -> &mut EntityKey;

    fn to_properties(&self) -> Result<PropertyMap>;

    /// Rebuilds an instance from a lookup or query result.
    fn from_entity(entity: Entity) -> Result<Self>;

    fn query() -> Query {
        Query::new(Self::kind_name())
    }

    fn to_entity(&self) -> Result<Entity> {
        if self.key().kind() != Self::kind_name() {
            return Err(ModelError::InvalidState(format!(
                "model of kind '{}' holds a key of kind '{}'",
                Self::kind_name(),
                self.key().kind()
            )));
        }
        Ok(Entity::new(self.key().clone(), self.to_properties()?))
    }

    /// Runs after a commit carrying this item succeeded.
    async fn on_item_write(&self, _hooks: &HookContext) -> CacheResult<()> {
        Ok(())
    }

    /// Runs before the commit that deletes this item is issued.
    async fn before_item_delete(&self, _hooks: &HookContext) -> CacheResult<()> {
        Ok(())
    }

    /// Runs for every item decoded from a lookup or query.
    async fn on_item_read(&self, _hooks: &HookContext) -> CacheResult<()> {
        Ok(())
    }
}
