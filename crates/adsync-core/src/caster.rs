//! Schema-driven conversion of raw provider values into typed fields.

use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, Time, UtcOffset};

use crate::domain::{parse_ymd, FieldValue, NodeSchema, SemanticType, TypedRecord};

/// Casts raw records of one node. Pure: malformed values become null, never errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordCaster;

impl RecordCaster {
    pub fn cast(&self, node: &NodeSchema, raw: Map<String, Value>) -> TypedRecord {
        raw.into_iter()
            .map(|(name, value)| {
                let typed = match node.field(&name) {
                    Some(field) => cast_value(&field.semantic_type, value),
                    None => FieldValue::from_json(value),
                };
                (name, typed)
            })
            .collect()
    }
}

pub fn cast_value(semantic_type: &SemanticType, value: Value) -> FieldValue {
    if value.is_null() {
        return FieldValue::Null;
    }

    match semantic_type {
        SemanticType::String => match value {
            Value::String(text) => FieldValue::String(text),
            Value::Number(number) => FieldValue::String(number.to_string()),
            Value::Bool(flag) => FieldValue::String(flag.to_string()),
            other => FieldValue::String(other.to_string()),
        },
        SemanticType::Integer => to_integer(&value).map_or(FieldValue::Null, FieldValue::Integer),
        SemanticType::Number => to_number(&value).map_or(FieldValue::Null, FieldValue::Number),
        SemanticType::Boolean => FieldValue::Boolean(truthy(&value)),
        SemanticType::Date => value
            .as_str()
            .and_then(parse_ymd)
            .map_or(FieldValue::Null, FieldValue::Date),
        SemanticType::DateTime => to_timestamp(&value).map_or(FieldValue::Null, FieldValue::DateTime),
        SemanticType::Timestamp => {
            to_timestamp(&value).map_or(FieldValue::Null, FieldValue::Timestamp)
        }
        SemanticType::Array => match structured(value) {
            Value::Array(values) => FieldValue::Array(values),
            _ => FieldValue::Null,
        },
        SemanticType::Object => match structured(value) {
            Value::Object(map) => FieldValue::Object(map),
            _ => FieldValue::Null,
        },
        SemanticType::Unknown(_) => FieldValue::from_json(value),
    }
}

fn to_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().and_then(integral)),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().and_then(integral))
        }
        Value::Bool(flag) => Some(i64::from(*flag)),
        _ => None,
    }
}

fn integral(value: f64) -> Option<i64> {
    let in_range = value >= i64::MIN as f64 && value < i64::MAX as f64;
    (value.is_finite() && value.fract() == 0.0 && in_range).then_some(value as i64)
}

fn to_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "" | "false" | "0" | "no" | "n" | "f" | "off"
        ),
        Value::Array(_) | Value::Object(_) => true,
        Value::Null => false,
    }
}

/// Accepts JSON text for structured fields that some providers send as strings.
fn structured(value: Value) -> Value {
    match value {
        Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::Null),
        other => other,
    }
}

/// Parses provider timestamps: RFC 3339, offsets without a colon (`+0000`), space
/// separated local times (taken as UTC), bare dates (UTC midnight) and epoch seconds.
pub fn parse_timestamp(input: &str) -> Option<OffsetDateTime> {
    let input = input.trim();
    if input.len() == 10 {
        return parse_ymd(input).map(|date| date.with_time(Time::MIDNIGHT).assume_utc());
    }

    let mut normalized = input.replacen(' ', "T", 1);
    if normalized.ends_with('z') {
        normalized.pop();
        normalized.push('Z');
    }
    if !has_offset(&normalized) {
        normalized.push('Z');
    } else if let Some(fixed) = colonize_offset(&normalized) {
        normalized = fixed;
    }

    OffsetDateTime::parse(&normalized, &Rfc3339)
        .ok()
        .map(|value| value.to_offset(UtcOffset::UTC))
}

fn to_timestamp(value: &Value) -> Option<OffsetDateTime> {
    match value {
        Value::String(text) => parse_timestamp(text),
        Value::Number(number) => number
            .as_i64()
            .and_then(|seconds| OffsetDateTime::from_unix_timestamp(seconds).ok()),
        _ => None,
    }
}

fn has_offset(value: &str) -> bool {
    if value.ends_with('Z') {
        return true;
    }
    // offset sign after the time part, e.g. 2024-01-01T10:00:00+0000
    value
        .get(19..)
        .is_some_and(|tail| tail.contains('+') || tail.contains('-'))
}

fn colonize_offset(value: &str) -> Option<String> {
    let split = value.len().checked_sub(5)?;
    let (head, tail) = (value.get(..split)?, value.get(split..)?);
    let mut chars = tail.chars();
    let sign = chars.next()?;
    let digits = chars.as_str();
    if !matches!(sign, '+' | '-') || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{head}{sign}{}:{}", &digits[..2], &digits[2..]))
}
