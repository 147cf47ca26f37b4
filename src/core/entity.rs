use super::error::{ModelError, Result};
use super::key::EntityKey;
use super::value::{self, PropertyValue};
use crate::wire;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// A key plus its typed properties: the projection of a model instance that
/// is built right before a write and decoded right after a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub key: EntityKey,
    pub properties: PropertyMap,
}

impl Entity {
    pub fn new(key: EntityKey, properties: PropertyMap) -> Self {
        Self { key, properties }
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn string(&self, name: &str) -> Result<&str> {
        self.get(name)
            .and_then(PropertyValue::as_str)
            .ok_or_else(|| mismatch(name, "string"))
    }

    pub fn string_list(&self, name: &str) -> Result<&[String]> {
        self.get(name)
            .and_then(PropertyValue::as_string_list)
            .ok_or_else(|| mismatch(name, "string list"))
    }

    pub fn date_time(&self, name: &str) -> Result<DateTime<Utc>> {
        self.get(name)
            .and_then(PropertyValue::as_date_time)
            .ok_or_else(|| mismatch(name, "date"))
    }

    pub fn to_wire(&self, default_namespace: Option<&str>) -> wire::Entity {
        wire::Entity {
            key: self.key.to_wire(default_namespace),
            properties: self
                .properties
                .iter()
                .map(|(name, value)| (name.clone(), value.to_wire()))
                .collect(),
        }
    }

    pub fn from_wire(entity: &wire::Entity) -> Result<Self> {
        let key = EntityKey::from_wire(&entity.key)?;
        let mut properties = PropertyMap::new();
        for (name, property) in &entity.properties {
            properties.insert(name.clone(), value::decode(property)?);
        }
        Ok(Self { key, properties })
    }
}

fn mismatch(name: &str, expected: &'static str) -> ModelError {
    ModelError::PropertyMismatch {
        name: name.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::{encode_date, encode_string};

    #[test]
    fn test_wire_round_trip() {
        let key = EntityKey::new("Feed").with_string_name("k").unwrap();
        let mut properties = PropertyMap::new();
        properties.insert("url".into(), encode_string("http://a", true));
        properties.insert("tags".into(), encode_string(vec!["x", "y"], false));
        properties.insert(
            "seen".into(),
            encode_date("2021-03-04T05:06:07Z", false).unwrap(),
        );
        let entity = Entity::new(key, properties);

        let decoded = Entity::from_wire(&entity.to_wire(Some("ns"))).unwrap();
        assert_eq!(decoded.key.namespace(), Some("ns"));
        assert_eq!(decoded.properties, entity.properties);
        assert_eq!(decoded.string("url").unwrap(), "http://a");
        assert_eq!(decoded.string_list("tags").unwrap().len(), 2);
    }

    #[test]
    fn test_typed_accessors_report_mismatch() {
        let mut properties = PropertyMap::new();
        properties.insert("url".into(), encode_string("http://a", true));
        let entity = Entity::new(EntityKey::new("Feed"), properties);

        assert!(matches!(
            entity.date_time("url"),
            Err(ModelError::PropertyMismatch { expected: "date", .. })
        ));
        assert!(entity.string("missing").is_err());
    }
}
