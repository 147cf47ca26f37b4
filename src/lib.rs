// ============================================================================
// Kindstore Library
// ============================================================================
//
// Typed entity models over a remote key/value entity store: keys, property
// codecs, a query builder, the gateway RPC surface, and the model store that
// ties them together with cache-sync hooks.
//
// ============================================================================

pub mod cache;
pub mod core;
pub mod gateway;
pub mod model;
pub mod query;
pub mod wire;

// Re-export main types for convenience
pub use cache::{EntityCache, MemoryCache};
pub use core::{
    CacheError, Entity, EntityKey, GatewayError, Identity, ModelError, PropertyMap,
    PropertyValue, Result,
};
pub use gateway::{DatastoreGateway, GatewayConfig, HttpGateway, InMemoryGateway};
pub use model::{FeedModel, HookContext, Model, ModelStore};
pub use query::{Direction, Filter, Operator, Query};
pub use wire::TransactionHandle;
