use adsync_core::{format_ymd, FieldValue, SemanticType};

use super::{finite_number, utc_timestamp, ColumnSpec, DdlStatement, Dialect};
use crate::error::QueryError;
use crate::TableRef;

const MISSING_OBJECT_CODES: [&str; 3] = [
    "TABLE_OR_VIEW_NOT_FOUND",
    "SCHEMA_NOT_FOUND",
    "CATALOG_NOT_FOUND",
];

/// Databricks SQL through the Statement Execution API.
#[derive(Debug, Default, Clone, Copy)]
pub struct DatabricksDialect;

impl Dialect for DatabricksDialect {
    fn name(&self) -> &'static str {
        "databricks"
    }

    fn native_type(&self, semantic_type: &SemanticType) -> Option<String> {
        let native = match semantic_type {
            SemanticType::String | SemanticType::Array | SemanticType::Object => "STRING",
            SemanticType::Number => "DOUBLE",
            SemanticType::Integer => "BIGINT",
            SemanticType::Boolean => "BOOLEAN",
            SemanticType::Date => "DATE",
            SemanticType::DateTime => "TIMESTAMP_NTZ",
            SemanticType::Timestamp => "TIMESTAMP",
            SemanticType::Unknown(_) => return None,
        };
        Some(native.to_owned())
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn string_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
    }

    fn literal(&self, value: &FieldValue) -> String {
        match value {
            FieldValue::Null => String::from("NULL"),
            FieldValue::String(value) => self.string_literal(value),
            FieldValue::Integer(value) => value.to_string(),
            FieldValue::Number(value) => finite_number(*value),
            FieldValue::Boolean(value) => String::from(if *value { "TRUE" } else { "FALSE" }),
            FieldValue::Date(value) => format!("DATE'{}'", format_ymd(*value)),
            FieldValue::DateTime(value) => format!("TIMESTAMP_NTZ'{}'", utc_timestamp(*value)),
            FieldValue::Timestamp(value) => format!("TIMESTAMP'{}Z'", utc_timestamp(*value)),
            FieldValue::Array(_) | FieldValue::Object(_) => {
                self.string_literal(&value.to_json().to_string())
            }
        }
    }

    fn is_missing_table(&self, error: &QueryError) -> bool {
        let rendered = error.to_string();
        MISSING_OBJECT_CODES
            .iter()
            .any(|code| rendered.contains(code))
            || rendered.to_ascii_lowercase().contains("does not exist")
    }

    fn create_namespace(&self, table: &TableRef) -> Vec<DdlStatement> {
        let mut statements = Vec::new();
        if let Some(catalog) = &table.catalog {
            statements.push(DdlStatement::best_effort(format!(
                "CREATE CATALOG IF NOT EXISTS {}",
                self.quote_ident(catalog)
            )));
        }
        if let Some(schema) = &table.schema {
            let namespace = match &table.catalog {
                Some(catalog) => format!("{}.{}", self.quote_ident(catalog), self.quote_ident(schema)),
                None => self.quote_ident(schema),
            };
            statements.push(DdlStatement::required(format!(
                "CREATE SCHEMA IF NOT EXISTS {namespace}"
            )));
        }
        statements
    }

    /// Informational primary keys need NOT NULL columns and Unity Catalog, so the
    /// constraint statements are optional.
    fn create_table(
        &self,
        table: &TableRef,
        columns: &[ColumnSpec],
        unique_keys: &[String],
    ) -> Vec<DdlStatement> {
        let qualified = self.qualified(table);
        let definitions = columns
            .iter()
            .map(|column| format!("{} {}", self.quote_ident(&column.name), column.native_type))
            .collect::<Vec<_>>()
            .join(", ");

        let mut statements = vec![DdlStatement::required(format!(
            "CREATE TABLE IF NOT EXISTS {qualified} ({definitions})"
        ))];
        if unique_keys.is_empty() {
            return statements;
        }

        statements.extend(unique_keys.iter().map(|key| {
            DdlStatement::best_effort(format!(
                "ALTER TABLE {qualified} ALTER COLUMN {} SET NOT NULL",
                self.quote_ident(key)
            ))
        }));
        statements.push(DdlStatement::best_effort(format!(
            "ALTER TABLE {qualified} ADD CONSTRAINT {} PRIMARY KEY ({})",
            self.quote_ident(&format!("{}_pk", table.name)),
            self.ident_list(unique_keys)
        )));
        statements
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
            "ALTER TABLE {} ADD COLUMNS ({definitions})",
            self.qualified(table)
        ))
        .adding(columns.iter().map(|column| column.name.as_str()))]
    }

    fn column_comments(&self, table: &TableRef, columns: &[ColumnSpec]) -> Vec<DdlStatement> {
        columns
            .iter()
            .filter_map(|column| {
                let comment = column.comment.as_deref()?;
                Some(DdlStatement::best_effort(format!(
                    "ALTER TABLE {} ALTER COLUMN {} COMMENT {}",
                    self.qualified(table),
                    self.quote_ident(&column.name),
                    self.string_literal(comment)
                )))
            })
            .collect()
    }

    fn key_match(&self, left: &str, right: &str) -> String {
        format!("{left} <=> {right}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, native_type: &str) -> ColumnSpec {
        ColumnSpec {
            name: name.to_owned(),
            native_type: native_type.to_owned(),
            comment: None,
        }
    }

    #[test]
    fn literals_escape_backslashes_and_drop_non_finite_numbers() {
        let dialect = DatabricksDialect;
        assert_eq!(dialect.string_literal(r"it's C:\ads"), r"'it\'s C:\\ads'");
        assert_eq!(dialect.literal(&FieldValue::Number(f64::NEG_INFINITY)), "NULL");
        assert_eq!(dialect.literal(&FieldValue::Boolean(true)), "TRUE");
    }

    #[test]
    fn primary_key_statements_are_best_effort() {
        let table = TableRef::new("ads").in_schema("raw").in_catalog("main");
        let statements = DatabricksDialect.create_table(
            &table,
            &[spec("ad_id", "STRING"), spec("spend", "DOUBLE")],
            &[String::from("ad_id")],
        );

        assert_eq!(
            statements[0],
            DdlStatement::required("CREATE TABLE IF NOT EXISTS `main`.`raw`.`ads` (`ad_id` STRING, `spend` DOUBLE)")
        );
        assert!(statements[1..].iter().all(|statement| !statement.required));
        assert!(statements
            .last()
            .is_some_and(|statement| statement.sql.contains("PRIMARY KEY (`ad_id`)")));
    }

    #[test]
    fn catalog_creation_is_optional_but_schema_is_required() {
        let table = TableRef::new("ads").in_schema("raw").in_catalog("main");
        let statements = DatabricksDialect.create_namespace(&table);

        assert_eq!(
            statements,
            vec![
                DdlStatement::best_effort("CREATE CATALOG IF NOT EXISTS `main`"),
                DdlStatement::required("CREATE SCHEMA IF NOT EXISTS `main`.`raw`"),
            ]
        );
    }

    #[test]
    fn detects_missing_objects_by_error_class() {
        for code in MISSING_OBJECT_CODES {
            let error = QueryError::statement(code, "missing");
            assert!(DatabricksDialect.is_missing_table(&error), "{code}");
        }
        let error = QueryError::statement("PARSE_SYNTAX_ERROR", "bad sql");
        assert!(!DatabricksDialect.is_missing_table(&error));
    }

    #[test]
    fn merge_uses_null_safe_key_match() {
        let plan = DatabricksDialect.merge(
            &TableRef::new("ads"),
            &TableRef::new("ads_staging"),
            &[String::from("ad_id"), String::from("spend")],
            &[String::from("ad_id")],
        );
        assert!(plan.statements[0].contains("ON t.`ad_id` <=> s.`ad_id`"));
        assert!(plan.statements[0].contains("UPDATE SET `spend` = s.`spend`"));
    }
}
