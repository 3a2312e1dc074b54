use adsync_core::{format_ymd, FieldValue, SemanticType};

use super::{
    escape_sql_string, finite_number, non_key_columns, utc_timestamp, ColumnSpec, DdlStatement,
    Dialect, MergePlan, TableRef,
};

const DEFAULT_SCHEMA: &str = "main";

/// Embedded `DuckDB`. Structured values are stored as JSON text.
#[derive(Debug, Default, Clone, Copy)]
pub struct DuckDbDialect;

impl Dialect for DuckDbDialect {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn native_type(&self, semantic_type: &SemanticType) -> Option<String> {
        let native = match semantic_type {
            SemanticType::String | SemanticType::Array | SemanticType::Object => "VARCHAR",
            SemanticType::Number => "DOUBLE",
            SemanticType::Integer => "BIGINT",
            SemanticType::Boolean => "BOOLEAN",
            SemanticType::Date => "DATE",
            SemanticType::DateTime | SemanticType::Timestamp => "TIMESTAMP",
            SemanticType::Unknown(_) => return None,
        };
        Some(native.to_owned())
    }

    fn literal(&self, value: &FieldValue) -> String {
        match value {
            FieldValue::Null => String::from("NULL"),
            FieldValue::String(value) => self.string_literal(value),
            FieldValue::Integer(value) => value.to_string(),
            FieldValue::Number(value) => finite_number(*value),
            FieldValue::Boolean(value) => String::from(if *value { "TRUE" } else { "FALSE" }),
            FieldValue::Date(value) => format!("DATE '{}'", format_ymd(*value)),
            FieldValue::DateTime(value) | FieldValue::Timestamp(value) => {
                format!("TIMESTAMP '{}'", utc_timestamp(*value))
            }
            FieldValue::Array(_) | FieldValue::Object(_) => {
                self.string_literal(&value.to_json().to_string())
            }
        }
    }

    /// Reads `information_schema`, which yields no rows for a missing table.
    fn describe_sql(&self, table: &TableRef) -> String {
        let mut sql = format!(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_schema = '{}' AND table_name = '{}'",
            escape_sql_string(table.schema.as_deref().unwrap_or(DEFAULT_SCHEMA)),
            escape_sql_string(&table.name)
        );
        if let Some(catalog) = &table.catalog {
            sql.push_str(&format!(" AND table_catalog = '{}'", escape_sql_string(catalog)));
        }
        sql.push_str(" ORDER BY ordinal_position");
        sql
    }

    fn add_columns(&self, table: &TableRef, columns: &[ColumnSpec]) -> Vec<DdlStatement> {
        columns
            .iter()
            .map(|column| {
                DdlStatement::required(format!(
                    "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}",
                    self.qualified(table),
                    self.quote_ident(&column.name),
                    column.native_type
                ))
                .adding([column.name.as_str()])
            })
            .collect()
    }

    /// No `MERGE` statement: update matched rows from staging, then insert the
    /// rest, in one transaction.
    fn merge(&self, target: &TableRef, staging: &TableRef, columns: &[String], unique_keys: &[String]) -> MergePlan {
        let target_sql = self.qualified(target);
        let staging_sql = self.qualified(staging);
        let column_list = self.ident_list(columns);

        if unique_keys.is_empty() {
            return MergePlan {
                statements: vec![format!(
                    "INSERT INTO {target_sql} ({column_list}) SELECT {column_list} FROM {staging_sql}"
                )],
                atomic: true,
            };
        }

        let on = self.key_condition("t", "s", unique_keys);
        let mut statements = Vec::with_capacity(2);

        let updates = non_key_columns(columns, unique_keys)
            .map(|column| {
                let column = self.quote_ident(column);
                format!("{column} = s.{column}")
            })
            .collect::<Vec<_>>();
        if !updates.is_empty() {
            statements.push(format!(
                "UPDATE {target_sql} AS t SET {} FROM {staging_sql} AS s WHERE {on}",
                updates.join(", ")
            ));
        }

        let staged = columns
            .iter()
            .map(|column| format!("s.{}", self.quote_ident(column)))
            .collect::<Vec<_>>()
            .join(", ");
        statements.push(format!(
            "INSERT INTO {target_sql} ({column_list}) SELECT {staged} FROM {staging_sql} AS s \
             WHERE NOT EXISTS (SELECT 1 FROM {target_sql} AS t WHERE {on})"
        ));

        MergePlan {
            statements,
            atomic: true,
        }
    }
}
