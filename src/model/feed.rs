//! Feed subscriptions, the stock model.
//!
//! A feed is keyed by a hash of its subscriber URL, so putting the same URL
//! twice writes the same entity. Every write and read is mirrored into the
//! store's cache under [`FeedModel::cache_key`]; `get` consults the cache
//! before querying.

use super::store::ModelStore;
use super::{HookContext, Model};
use crate::cache::{CacheResult, cache_key, stable_hash};
use crate::core::{Entity, EntityKey, PropertyMap, Result, encode_string};
use crate::query::Filter;
use async_trait::async_trait;
use tracing::warn;

pub const FEED_MODEL_KIND: &str = "FeedModel";
pub const SUBSCRIBER_URL_NAME: &str = "subscriber_url";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedModel {
    key: EntityKey,
    subscriber_url: String,
}

impl FeedModel {
    pub fn new(subscriber_url: impl Into<String>) -> Self {
        let subscriber_url = subscriber_url.into();
        let key = EntityKey::named(FEED_MODEL_KIND, stable_hash(&subscriber_url));
        Self {
            key,
            subscriber_url,
        }
    }

    pub fn subscriber_url(&self) -> &str {
        &self.subscriber_url
    }

    pub fn cache_key(subscriber_url: &str) -> String {
        cache_key(FEED_MODEL_KIND, subscriber_url)
    }

    /// Feeds subscribed at `subscriber_url`: the cached entry if there is a
    /// live one, otherwise the result of an equality query.
    pub async fn get(store: &ModelStore, subscriber_url: &str) -> Result<Vec<FeedModel>> {
        if let Some(cache) = store.hooks().cache() {
            match cache.get(&Self::cache_key(subscriber_url)).await {
                Ok(Some(entity)) => match Self::from_entity(entity) {
                    Ok(feed) => return Ok(vec![feed]),
                    Err(err) => warn!("ignoring undecodable cached feed: {}", err),
                },
                Ok(None) => {}
                Err(err) => warn!("feed cache lookup failed: {}", err),
            }
        }

        let query = Self::query().add_composite_and(vec![Filter::equal(
            SUBSCRIBER_URL_NAME,
            subscriber_url,
        )]);
        store.run_query(query).await
    }

    fn properties(&self) -> PropertyMap {
        PropertyMap::from([(
            SUBSCRIBER_URL_NAME.to_string(),
            encode_string(self.subscriber_url.as_str(), true),
        )])
    }

    async fn cache_self(&self, hooks: &HookContext) -> CacheResult<()> {
        if let Some(cache) = hooks.cache() {
            let entity = Entity::new(self.key.clone(), self.properties());
            cache
                .add(&Self::cache_key(&self.subscriber_url), entity, hooks.ttl())
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Model for FeedModel {
    fn kind_name() -> &'static str {
        FEED_MODEL_KIND
    }

    fn key(&self) -> &EntityKey {
        &self.key
    }

    fn key_mut(&mut self) -> &mut EntityKey {
        &mut self.key
    }

    fn to_properties(&self) -> Result<PropertyMap> {
        Ok(self.properties())
    }

    fn from_entity(entity: Entity) -> Result<Self> {
        let subscriber_url = entity.string(SUBSCRIBER_URL_NAME)?.to_string();
        Ok(Self {
            key: entity.key,
            subscriber_url,
        })
    }

    async fn on_item_write(&self, hooks: &HookContext) -> CacheResult<()> {
        self.cache_self(hooks).await
    }

    async fn before_item_delete(&self, hooks: &HookContext) -> CacheResult<()> {
        if let Some(cache) = hooks.cache() {
            cache.delete(&Self::cache_key(&self.subscriber_url)).await?;
        }
        Ok(())
    }

    async fn on_item_read(&self, hooks: &HookContext) -> CacheResult<()> {
        self.cache_self(hooks).await
    }
}
