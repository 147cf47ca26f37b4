// ============================================================================
// Property Codec
// ============================================================================
//
// Typed property values and their wire representation. Dates are carried on
// the wire as normalized RFC 3339 strings in UTC rather than as binary
// timestamps.
//
// ============================================================================

use super::error::{ModelError, Result};
use crate::wire;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    String { value: String, indexed: bool },
    StringList { values: Vec<String>, indexed: bool },
    DateTime { value: DateTime<Utc>, indexed: bool },
}

impl PropertyValue {
    /// Whether the store may use this value in filters and sort orders.
    pub fn is_indexed(&self) -> bool {
        match self {
            Self::String { indexed, .. }
            | Self::StringList { indexed, .. }
            | Self::DateTime { indexed, .. } => *indexed,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String { .. } => "string",
            Self::StringList { .. } => "string list",
            Self::DateTime { .. } => "date",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_string_list(&self) -> Option<&[String]> {
        match self {
            Self::StringList { values, .. } => Some(values),
            _ => None,
        }
    }

    pub fn as_date_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::DateTime { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn to_wire(&self) -> wire::Property {
        match self {
            Self::String { value, indexed } => wire::Value {
                indexed: Some(*indexed),
                ..wire::Value::string(value.clone())
            },
            // `indexed` goes on each element; only an empty list, which has
            // no element to carry it, keeps it at list level.
            Self::StringList { values, indexed } => wire::Value {
                list_value: Some(
                    values
                        .iter()
                        .map(|s| wire::Value {
                            indexed: Some(*indexed),
                            ..wire::Value::string(s.clone())
                        })
                        .collect(),
                ),
                indexed: values.is_empty().then_some(*indexed),
                ..wire::Value::default()
            },
            Self::DateTime { value, indexed } => wire::Value {
                indexed: Some(*indexed),
                ..wire::Value::date_time(format_date(value))
            },
        }
    }
}

/// Input accepted by [`encode_string`]: a single string or a list of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringInput {
    Scalar(String),
    List(Vec<String>),
}

impl From<&str> for StringInput {
    fn from(value: &str) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<String> for StringInput {
    fn from(value: String) -> Self {
        Self::Scalar(value)
    }
}

impl From<&String> for StringInput {
    fn from(value: &String) -> Self {
        Self::Scalar(value.clone())
    }
}

impl From<Vec<String>> for StringInput {
    fn from(values: Vec<String>) -> Self {
        Self::List(values)
    }
}

impl From<Vec<&str>> for StringInput {
    fn from(values: Vec<&str>) -> Self {
        Self::List(values.into_iter().map(str::to_string).collect())
    }
}

impl From<&[String]> for StringInput {
    fn from(values: &[String]) -> Self {
        Self::List(values.to_vec())
    }
}

impl From<&[&str]> for StringInput {
    fn from(values: &[&str]) -> Self {
        Self::List(values.iter().map(|s| s.to_string()).collect())
    }
}

/// Encodes a scalar as `String` and a list as `StringList`. A one-element
/// list stays a list.
pub fn encode_string(value: impl Into<StringInput>, indexed: bool) -> PropertyValue {
    match value.into() {
        StringInput::Scalar(value) => PropertyValue::String { value, indexed },
        StringInput::List(values) => PropertyValue::StringList { values, indexed },
    }
}

pub fn encode_string_list<I, S>(values: I, indexed: bool) -> PropertyValue
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    PropertyValue::StringList {
        values: values.into_iter().map(Into::into).collect(),
        indexed,
    }
}

pub fn encode_date(iso: &str, indexed: bool) -> Result<PropertyValue> {
    Ok(PropertyValue::DateTime {
        value: parse_date(iso)?,
        indexed,
    })
}

/// Parses RFC 3339 / ISO-8601. Inputs without an offset are read as UTC and a
/// bare date means midnight UTC.
pub fn parse_date(iso: &str) -> Result<DateTime<Utc>> {
    let trimmed = iso.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }
    match NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        Ok(date) => date
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .ok_or_else(|| malformed(iso, "date out of range")),
        Err(err) => Err(malformed(iso, &err.to_string())),
    }
}

pub fn format_date(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn malformed(value: &str, reason: &str) -> ModelError {
    ModelError::MalformedDate {
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Inverse of [`PropertyValue::to_wire`].
pub fn decode(property: &wire::Property) -> Result<PropertyValue> {
    let set = [
        property.string_value.is_some(),
        property.date_time_value.is_some(),
        property.list_value.is_some(),
    ]
    .iter()
    .filter(|s| **s)
    .count();
    if set != 1 {
        return Err(ModelError::UnsupportedPropertyShape(format!(
            "expected exactly one value field, found {}",
            set
        )));
    }

    if let Some(value) = &property.string_value {
        return Ok(PropertyValue::String {
            value: value.clone(),
            indexed: property.is_indexed(),
        });
    }

    if let Some(value) = &property.date_time_value {
        return Ok(PropertyValue::DateTime {
            value: parse_date(value)?,
            indexed: property.is_indexed(),
        });
    }

    let elements = property.list_value.as_deref().unwrap_or_default();
    let mut values = Vec::with_capacity(elements.len());
    for element in elements {
        match element {
            wire::Value {
                string_value: Some(s),
                date_time_value: None,
                list_value: None,
                ..
            } => values.push(s.clone()),
            _ => {
                return Err(ModelError::UnsupportedPropertyShape(
                    "list elements must be plain strings".to_string(),
                ));
            }
        }
    }
    let indexed = if elements.is_empty() {
        property.is_indexed()
    } else {
        elements.iter().all(wire::Value::is_indexed)
    };

    Ok(PropertyValue::StringList { values, indexed })
}
