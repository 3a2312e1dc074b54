use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};

use super::window::format_ymd;

/// A field value after casting to its semantic type.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    String(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    Date(Date),
    DateTime(OffsetDateTime),
    Timestamp(OffsetDateTime),
    Array(Vec<Value>),
    Object(Map<String, Value>),
}

impl FieldValue {
    /// Converts an untyped JSON value without consulting a schema.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(value) => Self::Boolean(value),
            Value::Number(number) => match number.as_i64() {
                Some(value) => Self::Integer(value),
                None => number.as_f64().map_or(Self::Null, Self::Number),
            },
            Value::String(value) => Self::String(value),
            Value::Array(values) => Self::Array(values),
            Value::Object(map) => Self::Object(map),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::String(value) => Value::String(value.clone()),
            Self::Integer(value) => Value::Number(Number::from(*value)),
            Self::Number(value) => Number::from_f64(*value).map_or(Value::Null, Value::Number),
            Self::Boolean(value) => Value::Bool(*value),
            Self::Date(value) => Value::String(format_ymd(*value)),
            Self::DateTime(value) | Self::Timestamp(value) => {
                Value::String(format_rfc3339(*value))
            }
            Self::Array(values) => Value::Array(values.clone()),
            Self::Object(map) => Value::Object(map.clone()),
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub const fn as_date(&self) -> Option<Date> {
        match self {
            Self::Date(value) => Some(*value),
            _ => None,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Number(_) => "number",
            Self::Boolean(_) => "boolean",
            Self::Date(_) => "date",
            Self::DateTime(_) => "datetime",
            Self::Timestamp(_) => "timestamp",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    /// Stable textual form used to build unique-key tuples.
    pub fn key_fragment(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::String(value) => value.clone(),
            Self::Integer(value) => value.to_string(),
            Self::Number(value) => value.to_string(),
            Self::Boolean(value) => value.to_string(),
            Self::Date(value) => format_ymd(*value),
            Self::DateTime(value) | Self::Timestamp(value) => format_rfc3339(*value),
            Self::Array(_) | Self::Object(_) => self.to_json().to_string(),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

pub(crate) fn format_rfc3339(value: OffsetDateTime) -> String {
    value.format(&Rfc3339).unwrap_or_else(|_| value.to_string())
}

/// One fetched row, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TypedRecord {
    values: BTreeMap<String, FieldValue>,
}

impl TypedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        self.values.insert(field.into(), value)
    }

    pub fn with(mut self, field: impl Into<String>, value: FieldValue) -> Self {
        self.insert(field, value);
        self
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.values.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Shallow merge: every field of `other` overwrites the same field here.
    pub fn merge_from(&mut self, other: TypedRecord) {
        self.values.extend(other.values);
    }

    /// Reads a URL asset sub-structure stored under `field`.
    pub fn url_asset(&self, field: &str) -> Option<UrlAsset> {
        match self.values.get(field)? {
            FieldValue::Object(map) => serde_json::from_value(Value::Object(map.clone())).ok(),
            _ => None,
        }
    }

    pub fn set_url_asset(&mut self, field: impl Into<String>, asset: &UrlAsset) {
        let value = match serde_json::to_value(asset) {
            Ok(Value::Object(map)) => FieldValue::Object(map),
            _ => FieldValue::Null,
        };
        self.values.insert(field.into(), value);
    }

    pub fn into_values(self) -> BTreeMap<String, FieldValue> {
        self.values
    }
}

impl FromIterator<(String, FieldValue)> for TypedRecord {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Link asset attached to ad insights broken down by destination URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlAsset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get_params: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
