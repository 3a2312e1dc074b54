use adsync_core::{format_ymd, FieldValue, SemanticType};
use time::format_description::well_known::Rfc3339;

use super::{finite_number, utc_timestamp, ColumnSpec, DdlStatement, Dialect};
use crate::error::QueryError;
use crate::TableRef;

/// Snowflake over the SQL API. Unknown semantic types fall back to `VARCHAR`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnowflakeDialect;

impl Dialect for SnowflakeDialect {
    fn name(&self) -> &'static str {
        "snowflake"
    }

    fn native_type(&self, semantic_type: &SemanticType) -> Option<String> {
        let native = match semantic_type {
            SemanticType::String | SemanticType::Unknown(_) => "VARCHAR",
            SemanticType::Number => "FLOAT",
            SemanticType::Integer => "NUMBER(38,0)",
            SemanticType::Boolean => "BOOLEAN",
            SemanticType::Date => "DATE",
            SemanticType::DateTime => "TIMESTAMP_NTZ",
            SemanticType::Timestamp => "TIMESTAMP_TZ",
            SemanticType::Array => "ARRAY",
            SemanticType::Object => "VARIANT",
        };
        Some(native.to_owned())
    }

    fn string_literal(&self, value: &str) -> String {
        let mut escaped = String::with_capacity(value.len() + 2);
        escaped.push('\'');
        for c in value.chars() {
            match c {
                '\\' => escaped.push_str("\\\\"),
                '\'' => escaped.push_str("\\'"),
                '\n' => escaped.push_str("\\n"),
                '\r' => escaped.push_str("\\r"),
                '\t' => escaped.push_str("\\t"),
                '\0' => {}
                c if c.is_control() && u32::from(c) < 0x80 => {
                    escaped.push_str(&format!("\\x{:02x}", u32::from(c)));
                }
                c => escaped.push(c),
            }
        }
        escaped.push('\'');
        escaped
    }

    fn literal(&self, value: &FieldValue) -> String {
        match value {
            FieldValue::Null => String::from("NULL"),
            FieldValue::String(value) => self.string_literal(value),
            FieldValue::Integer(value) => value.to_string(),
            FieldValue::Number(value) => finite_number(*value),
            FieldValue::Boolean(value) => String::from(if *value { "TRUE" } else { "FALSE" }),
            FieldValue::Date(value) => format!("TO_DATE('{}')", format_ymd(*value)),
            FieldValue::DateTime(value) => format!("TO_TIMESTAMP_NTZ('{}')", utc_timestamp(*value)),
            FieldValue::Timestamp(value) => {
                let rendered = value.format(&Rfc3339).unwrap_or_else(|_| utc_timestamp(*value));
                format!("TO_TIMESTAMP_TZ('{rendered}')")
            }
            FieldValue::Array(_) | FieldValue::Object(_) => {
                format!("PARSE_JSON({})", self.string_literal(&value.to_json().to_string()))
            }
        }
    }

    fn is_missing_table(&self, error: &QueryError) -> bool {
        match error {
            QueryError::Statement { code, message } => {
                code == "002003" || message.to_ascii_lowercase().contains("does not exist")
            }
            _ => false,
        }
    }

    fn add_columns(&self, table: &TableRef, columns: &[ColumnSpec]) -> Vec<DdlStatement> {
        if columns.is_empty() {
            return Vec::new();
        }
        let definitions = columns
            .iter()
            .map(|column| format!("{} {}", self.quote_ident(&column.name), column.native_type))
            .collect::<Vec<_>>()
            .join(", ");
        vec![DdlStatement::required(format!(
            "ALTER TABLE {} ADD COLUMN {definitions}",
            self.qualified(table)
        ))
        .adding(columns.iter().map(|column| column.name.as_str()))]
    }
}
