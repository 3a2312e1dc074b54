//! SQL dialects: native column types, literal rendering, DDL and the merge shape.

mod databricks;
mod duckdb;
mod snowflake;

use std::fmt::{Display, Formatter};

use adsync_core::{FieldValue, NodeSchema, SemanticType};
use time::{OffsetDateTime, UtcOffset};

use crate::error::{QueryError, StorageError};
use crate::executor::QueryResult;

pub use databricks::DatabricksDialect;
pub use self::duckdb::DuckDbDialect;
pub use snowflake::SnowflakeDialect;

/// Destination table, optionally qualified by catalog/database and schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            catalog: None,
            schema: None,
            name: name.into(),
        }
    }

    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn in_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    /// Sibling table in the same catalog and schema.
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self {
            catalog: self.catalog.clone(),
            schema: self.schema.clone(),
            name: name.into(),
        }
    }

    fn parts(&self) -> impl Iterator<Item = &str> {
        self.catalog
            .as_deref()
            .into_iter()
            .chain(self.schema.as_deref())
            .chain(std::iter::once(self.name.as_str()))
    }
}

impl Display for TableRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.parts().collect::<Vec<_>>().join("."))
    }
}

/// Column to create or add, with its native type and optional comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub native_type: String,
    pub comment: Option<String>,
}

/// A DDL statement; failures of optional ones are logged and skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdlStatement {
    pub sql: String,
    pub required: bool,
    /// Columns that exist once this statement succeeds.
    pub adds: Vec<String>,
}

impl DdlStatement {
    pub fn required(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            required: true,
            adds: Vec::new(),
        }
    }

    pub fn best_effort(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            required: false,
            adds: Vec::new(),
        }
    }

    pub fn adding(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.adds = columns.into_iter().map(Into::into).collect();
        self
    }
}

/// Statements that merge a populated staging table into its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub statements: Vec<String>,
    /// Run inside one transaction.
    pub atomic: bool,
}

/// Existing column as reported by the warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingColumn {
    pub name: String,
    pub native_type: String,
}

pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Native type for a semantic type, `None` when the dialect cannot store it.
    fn native_type(&self, semantic_type: &SemanticType) -> Option<String>;

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn qualified(&self, table: &TableRef) -> String {
        table
            .parts()
            .map(|part| self.quote_ident(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn string_literal(&self, value: &str) -> String {
        format!("'{}'", escape_sql_string(value))
    }

    fn literal(&self, value: &FieldValue) -> String;

    fn describe_sql(&self, table: &TableRef) -> String {
        format!("DESCRIBE TABLE {}", self.qualified(table))
    }

    /// Reads `(name, type)` pairs from a describe result.
    fn parse_describe(&self, result: &QueryResult) -> Vec<ExistingColumn> {
        (0..result.row_count)
            .filter_map(|row| {
                let name = result.text(row, 0)?;
                let name = name.trim();
                if name.is_empty() || name.starts_with('#') {
                    return None;
                }
                Some(ExistingColumn {
                    name: name.to_owned(),
                    native_type: result.text(row, 1).unwrap_or_default(),
                })
            })
            .collect()
    }

    fn is_missing_table(&self, error: &QueryError) -> bool {
        error.to_string().to_ascii_lowercase().contains("does not exist")
    }

    fn create_namespace(&self, table: &TableRef) -> Vec<DdlStatement> {
        let Some(schema) = &table.schema else {
            return Vec::new();
        };
        let namespace = TableRef {
            catalog: table.catalog.clone(),
            schema: None,
            name: schema.clone(),
        };
        vec![DdlStatement::required(format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            self.qualified(&namespace)
        ))]
    }

    fn create_table(
        &self,
        table: &TableRef,
        columns: &[ColumnSpec],
        unique_keys: &[String],
    ) -> Vec<DdlStatement> {
        let mut definitions = columns
            .iter()
            .map(|column| format!("{} {}", self.quote_ident(&column.name), column.native_type))
            .collect::<Vec<_>>();
        if !unique_keys.is_empty() {
            definitions.push(format!("PRIMARY KEY ({})", self.ident_list(unique_keys)));
        }
        vec![DdlStatement::required(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.qualified(table),
            definitions.join(", ")
        ))]
    }

    /// One statement per column batch.
    fn add_columns(&self, table: &TableRef, columns: &[ColumnSpec]) -> Vec<DdlStatement>;

    fn column_comments(&self, table: &TableRef, columns: &[ColumnSpec]) -> Vec<DdlStatement> {
        columns
            .iter()
            .filter_map(|column| {
                let comment = column.comment.as_deref()?;
                Some(DdlStatement::best_effort(format!(
                    "COMMENT ON COLUMN {}.{} IS {}",
                    self.qualified(table),
                    self.quote_ident(&column.name),
                    self.string_literal(comment)
                )))
            })
            .collect()
    }

    /// Empty copy of the target restricted to `columns`.
    fn create_staging(&self, staging: &TableRef, target: &TableRef, columns: &[String]) -> String {
        format!(
            "CREATE TABLE {} AS SELECT {} FROM {} WHERE 1 = 0",
            self.qualified(staging),
            self.ident_list(columns),
            self.qualified(target)
        )
    }

    /// Literal-value projection of `rows` into the staging table.
    fn insert_rows(&self, staging: &TableRef, columns: &[String], rows: &[Vec<&FieldValue>]) -> String {
        let selects = rows
            .iter()
            .map(|row| {
                let values = row
                    .iter()
                    .map(|value| self.literal(value))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("SELECT {values}")
            })
            .collect::<Vec<_>>()
            .join(" UNION ALL ");
        format!(
            "INSERT INTO {} ({}) {selects}",
            self.qualified(staging),
            self.ident_list(columns)
        )
    }

    fn drop_table(&self, table: &TableRef) -> String {
        format!("DROP TABLE IF EXISTS {}", self.qualified(table))
    }

    /// Null-safe equality used to match rows on unique keys.
    fn key_match(&self, left: &str, right: &str) -> String {
        format!("{left} IS NOT DISTINCT FROM {right}")
    }

    fn merge(&self, target: &TableRef, staging: &TableRef, columns: &[String], unique_keys: &[String]) -> MergePlan {
        let target_sql = self.qualified(target);
        let staging_sql = self.qualified(staging);
        let column_list = self.ident_list(columns);

        if unique_keys.is_empty() {
            return MergePlan {
                statements: vec![format!(
                    "INSERT INTO {target_sql} ({column_list}) SELECT {column_list} FROM {staging_sql}"
                )],
                atomic: false,
            };
        }

        let on = self.key_condition("t", "s", unique_keys);
        let updates = non_key_columns(columns, unique_keys)
            .map(|column| {
                let column = self.quote_ident(column);
                format!("{column} = s.{column}")
            })
            .collect::<Vec<_>>();
        let values = columns
            .iter()
            .map(|column| format!("s.{}", self.quote_ident(column)))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!("MERGE INTO {target_sql} AS t USING {staging_sql} AS s ON {on}");
        if !updates.is_empty() {
            sql.push_str(&format!(" WHEN MATCHED THEN UPDATE SET {}", updates.join(", ")));
        }
        sql.push_str(&format!(
            " WHEN NOT MATCHED THEN INSERT ({column_list}) VALUES ({values})"
        ));

        MergePlan {
            statements: vec![sql],
            atomic: false,
        }
    }

    fn ident_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|column| self.quote_ident(column))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn key_condition(&self, left: &str, right: &str, unique_keys: &[String]) -> String {
        unique_keys
            .iter()
            .map(|key| {
                let key = self.quote_ident(key);
                self.key_match(&format!("{left}.{key}"), &format!("{right}.{key}"))
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

pub(crate) fn non_key_columns<'a>(
    columns: &'a [String],
    unique_keys: &'a [String],
) -> impl Iterator<Item = &'a String> {
    columns.iter().filter(move |column| !unique_keys.contains(column))
}

/// Maps the node's fields named in `names` to native columns.
///
/// # Errors
///
/// [`StorageError::Schema`] when a field is unknown to the node or its semantic
/// type has no native column type in this dialect.
pub fn column_specs(
    dialect: &dyn Dialect,
    table: &TableRef,
    node: &NodeSchema,
    names: &[String],
) -> Result<Vec<ColumnSpec>, StorageError> {
    names
        .iter()
        .map(|name| {
            let field = node.field(name).ok_or_else(|| {
                StorageError::schema(
                    table.to_string(),
                    format!("field '{name}' is not defined for node '{}'", node.node_name),
                )
            })?;
            let native_type = dialect.native_type(&field.semantic_type).ok_or_else(|| {
                StorageError::schema(
                    table.to_string(),
                    format!(
                        "{} cannot store semantic type {} of field '{name}'",
                        dialect.name(),
                        field.semantic_type
                    ),
                )
            })?;
            Ok(ColumnSpec {
                name: name.clone(),
                native_type,
                comment: field.description.clone().filter(|comment| !comment.is_empty()),
            })
        })
        .collect()
}

pub(crate) fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}

/// `YYYY-MM-DD HH:MM:SS.ffffff` in UTC.
pub(crate) fn utc_timestamp(value: OffsetDateTime) -> String {
    let value = value.to_offset(UtcOffset::UTC);
    format!(
        "{} {:02}:{:02}:{:02}.{:06}",
        adsync_core::format_ymd(value.date()),
        value.hour(),
        value.minute(),
        value.second(),
        value.microsecond()
    )
}

pub(crate) fn finite_number(value: f64) -> String {
    if value.is_finite() {
        value.to_string()
    } else {
        String::from("NULL")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adsync_core::FieldDescriptor;

    fn node() -> NodeSchema {
        NodeSchema::new(
            "ads",
            [
                FieldDescriptor::new("ad_id", SemanticType::String).with_description("Ad ID"),
                FieldDescriptor::new("clicks", SemanticType::Integer),
                FieldDescriptor::new("geo", SemanticType::Unknown(String::from("geo_point"))),
            ],
            ["ad_id"],
        )
    }

    #[test]
    fn table_ref_displays_dotted_path() {
        let table = TableRef::new("ads").in_schema("raw").in_catalog("main");
        assert_eq!(table.to_string(), "main.raw.ads");
        assert_eq!(table.sibling("ads_staging").to_string(), "main.raw.ads_staging");
        assert_eq!(TableRef::new("ads").to_string(), "ads");
    }

    #[test]
    fn column_specs_carry_type_and_comment() {
        let table = TableRef::new("ads");
        let specs = column_specs(
            &DuckDbDialect,
            &table,
            &node(),
            &[String::from("ad_id"), String::from("clicks")],
        )
        .expect("known types");

        assert_eq!(specs[0].native_type, "VARCHAR");
        assert_eq!(specs[0].comment.as_deref(), Some("Ad ID"));
        assert_eq!(specs[1].native_type, "BIGINT");
        assert_eq!(specs[1].comment, None);
    }

    #[test]
    fn unmappable_type_is_a_schema_error() {
        let table = TableRef::new("ads");
        let error = column_specs(&DuckDbDialect, &table, &node(), &[String::from("geo")])
            .expect_err("geo_point has no duckdb type");

        assert_eq!(error.code(), "storage.schema");
        assert!(error.to_string().contains("geo_point"));

        let specs = column_specs(&SnowflakeDialect, &table, &node(), &[String::from("geo")])
            .expect("snowflake falls back to text");
        assert_eq!(specs[0].native_type, "VARCHAR");
    }

    #[test]
    fn merge_without_keys_appends() {
        let plan = DuckDbDialect.merge(
            &TableRef::new("t"),
            &TableRef::new("s"),
            &[String::from("a")],
            &[],
        );
        assert_eq!(plan.statements, vec![r#"INSERT INTO "t" ("a") SELECT "a" FROM "s""#]);
    }
}
