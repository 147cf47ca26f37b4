// ============================================================================
// Query Builder
// ============================================================================
//
// Builds kind-scoped queries with property filters, conjunctive composite
// filters and a sort order. The builder types serialize directly to the
// store's query layout.
//
// Only AND composition exists: there is no OR and no NOT. A query carries at
// most one sort order; setting a new one replaces the previous order.
//
// ============================================================================

use crate::core::Result;
use crate::core::value::{format_date, parse_date};
use crate::wire;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindExpression {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyReference {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Equal,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl Operator {
    /// Applies the operator to an already computed ordering of
    /// `stored` relative to the filter value.
    pub fn accepts(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Self::Equal => ordering == Equal,
            Self::LessThan => ordering == Less,
            Self::LessThanOrEqual => ordering != Greater,
            Self::GreaterThan => ordering == Greater,
            Self::GreaterThanOrEqual => ordering != Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Ascending,
    #[default]
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompositeOperator {
    And,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyFilter {
    pub property: PropertyReference,
    pub operator: Operator,
    pub value: wire::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeFilter {
    pub operator: CompositeOperator,
    pub filters: Vec<Filter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Filter {
    PropertyFilter(PropertyFilter),
    CompositeFilter(CompositeFilter),
}

impl Filter {
    pub fn string(name: impl Into<String>, value: impl Into<String>, operator: Operator) -> Self {
        Self::property(name, wire::Value::string(value), operator)
    }

    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::string(name, value, Operator::Equal)
    }

    /// Date filters parse `iso` the same way date properties are encoded.
    pub fn date(name: impl Into<String>, iso: &str, operator: Operator) -> Result<Self> {
        let value = format_date(&parse_date(iso)?);
        Ok(Self::property(name, wire::Value::date_time(value), operator))
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Self::CompositeFilter(CompositeFilter {
            operator: CompositeOperator::And,
            filters,
        })
    }

    fn property(name: impl Into<String>, value: wire::Value, operator: Operator) -> Self {
        Self::PropertyFilter(PropertyFilter {
            property: PropertyReference { name: name.into() },
            operator,
            value,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyOrder {
    pub property: PropertyReference,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub kinds: Vec<KindExpression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<PropertyOrder>,
}

impl Query {
    /// An unfiltered query over every entity of `kind`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kinds: vec![KindExpression { name: kind.into() }],
            filter: None,
            order: Vec::new(),
        }
    }

    pub fn kind(&self) -> Option<&str> {
        self.kinds.first().map(|k| k.name.as_str())
    }

    pub fn add_equality_filter(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.and_filter(Filter::equal(name, value))
    }

    pub fn add_filter(
        self,
        name: impl Into<String>,
        value: impl Into<String>,
        operator: Operator,
    ) -> Self {
        self.and_filter(Filter::string(name, value, operator))
    }

    pub fn add_composite_and(self, filters: Vec<Filter>) -> Self {
        self.and_filter(Filter::and(filters))
    }

    /// Conjoins `filter` with whatever the query already filters on.
    pub fn and_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            None => filter,
            Some(Filter::CompositeFilter(mut composite)) => {
                composite.filters.push(filter);
                Filter::CompositeFilter(composite)
            }
            Some(existing) => Filter::and(vec![existing, filter]),
        });
        self
    }

    /// Replaces any previous order.
    pub fn add_order(mut self, name: impl Into<String>, direction: Direction) -> Self {
        self.order = vec![PropertyOrder {
            property: PropertyReference { name: name.into() },
            direction,
        }];
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_query_is_kind_scoped_and_unfiltered() {
        let query = Query::new("Feed");
        assert_eq!(query.kind(), Some("Feed"));
        assert!(query.filter.is_none());
        assert_eq!(
            serde_json::to_value(&query).unwrap(),
            json!({"kinds": [{"name": "Feed"}]})
        );
    }

    #[test]
    fn test_filters_serialize_in_store_layout() {
        let query = Query::new("Feed").add_composite_and(vec![Filter::equal("subscriber_url", "b")]);
        assert_eq!(
            serde_json::to_value(&query).unwrap()["filter"],
            json!({
                "compositeFilter": {
                    "operator": "and",
                    "filters": [{
                        "propertyFilter": {
                            "property": {"name": "subscriber_url"},
                            "operator": "equal",
                            "value": {"stringValue": "b"}
                        }
                    }]
                }
            })
        );
    }

    #[test]
    fn test_successive_filters_are_conjoined() {
        let query = Query::new("Feed")
            .add_equality_filter("a", "1")
            .add_filter("b", "2", Operator::GreaterThan)
            .add_filter("c", "3", Operator::LessThanOrEqual);

        match query.filter {
            Some(Filter::CompositeFilter(composite)) => {
                assert_eq!(composite.operator, CompositeOperator::And);
                assert_eq!(composite.filters.len(), 3);
            }
            other => panic!("expected composite filter, got {:?}", other),
        }
    }

    #[test]
    fn test_last_order_wins() {
        let query = Query::new("Feed")
            .add_order("created", Direction::Ascending)
            .add_order("updated", Direction::default());

        assert_eq!(query.order.len(), 1);
        assert_eq!(query.order[0].property.name, "updated");
        assert_eq!(query.order[0].direction, Direction::Descending);
    }

    #[test]
    fn test_date_filter_normalizes_value() {
        let filter = Filter::date("seen", "2020-01-02T01:00:00+01:00", Operator::GreaterThan).unwrap();
        match filter {
            Filter::PropertyFilter(f) => {
                assert_eq!(f.value.date_time_value.as_deref(), Some("2020-01-02T00:00:00Z"));
            }
            _ => panic!("expected property filter"),
        }
        assert!(Filter::date("seen", "soon", Operator::Equal).is_err());
    }

    #[test]
    fn test_operator_accepts() {
        use std::cmp::Ordering;
        assert!(Operator::GreaterThanOrEqual.accepts(Ordering::Equal));
        assert!(!Operator::LessThan.accepts(Ordering::Equal));
        assert!(Operator::LessThanOrEqual.accepts(Ordering::Less));
    }
}
