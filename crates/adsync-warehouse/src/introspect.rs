//! Existing destination columns and the diff against the desired column set.

use std::sync::Arc;

use tracing::debug;

use crate::dialect::{ColumnSpec, Dialect, ExistingColumn, TableRef};
use crate::error::StorageError;
use crate::executor::QueryExecutor;

/// Columns of the live destination table, in warehouse order.
///
/// Empty means the table does not exist yet. Names compare case-insensitively
/// since warehouses fold unquoted identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistingColumns {
    columns: Vec<ExistingColumn>,
}

impl ExistingColumns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns
            .iter()
            .any(|column| column.name.eq_ignore_ascii_case(name))
    }

    pub fn native_type(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|column| column.name.eq_ignore_ascii_case(name))
            .map(|column| column.native_type.as_str())
    }

    /// Adds a column unless one with the same name is already known.
    pub fn insert(&mut self, column: ExistingColumn) -> bool {
        if self.contains(&column.name) {
            return false;
        }
        self.columns.push(column);
        true
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }
}

impl FromIterator<ExistingColumn> for ExistingColumns {
    fn from_iter<I: IntoIterator<Item = ExistingColumn>>(iter: I) -> Self {
        let mut columns = Self::new();
        for column in iter {
            columns.insert(column);
        }
        columns
    }
}

impl From<&ColumnSpec> for ExistingColumn {
    fn from(spec: &ColumnSpec) -> Self {
        Self {
            name: spec.name.clone(),
            native_type: spec.native_type.clone(),
        }
    }
}

/// Reads the columns of destination tables through a dialect's describe query.
#[derive(Clone)]
pub struct SchemaIntrospector {
    dialect: Arc<dyn Dialect>,
    executor: Arc<dyn QueryExecutor>,
}

impl SchemaIntrospector {
    pub fn new(dialect: Arc<dyn Dialect>, executor: Arc<dyn QueryExecutor>) -> Self {
        Self { dialect, executor }
    }

    /// Columns of `table`, empty when the table does not exist.
    ///
    /// # Errors
    ///
    /// [`StorageError::Schema`] when the describe query fails for any reason other
    /// than a missing table.
    pub async fn existing_columns(&self, table: &TableRef) -> Result<ExistingColumns, StorageError> {
        let sql = self.dialect.describe_sql(table);
        match self.executor.execute(&sql).await {
            Ok(result) => {
                let columns = self
                    .dialect
                    .parse_describe(&result)
                    .into_iter()
                    .collect::<ExistingColumns>();
                debug!(table = %table, columns = columns.len(), "introspected destination table");
                Ok(columns)
            }
            Err(error) if self.dialect.is_missing_table(&error) => {
                debug!(table = %table, "destination table does not exist");
                Ok(ExistingColumns::new())
            }
            Err(error) => Err(StorageError::schema(
                table.to_string(),
                format!("cannot describe table: {error}"),
            )),
        }
    }
}

/// Desired columns not yet present in `existing`, in desired order.
pub fn missing_columns<'a>(desired: &'a [ColumnSpec], existing: &ExistingColumns) -> Vec<&'a ColumnSpec> {
    desired
        .iter()
        .filter(|column| !existing.contains(&column.name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{DatabricksDialect, DuckDbDialect};
    use crate::error::QueryError;
    use crate::executor::testing::RecordingExecutor;
    use crate::executor::{QueryResult, SqlColumn};
    use serde_json::json;

    fn column(name: &str, native_type: &str) -> ExistingColumn {
        ExistingColumn {
            name: name.to_owned(),
            native_type: native_type.to_owned(),
        }
    }

    fn spec(name: &str) -> ColumnSpec {
        ColumnSpec {
            name: name.to_owned(),
            native_type: String::from("VARCHAR"),
            comment: None,
        }
    }

    #[test]
    fn missing_columns_preserve_desired_order() {
        let existing = [column("AD_ID", "VARCHAR")].into_iter().collect::<ExistingColumns>();
        let desired = [spec("spend"), spec("ad_id"), spec("clicks")];

        let missing = missing_columns(&desired, &existing)
            .into_iter()
            .map(|column| column.name.as_str())
            .collect::<Vec<_>>();

        assert_eq!(missing, vec!["spend", "clicks"]);
    }

    #[test]
    fn duplicate_describe_rows_are_collapsed() {
        let columns = [column("day", "DATE"), column("spend", "DOUBLE"), column("day", "DATE")]
            .into_iter()
            .collect::<ExistingColumns>();

        assert_eq!(columns.len(), 2);
        assert_eq!(columns.native_type("SPEND"), Some("DOUBLE"));
    }

    #[tokio::test]
    async fn missing_table_yields_no_columns() {
        let executor = Arc::new(RecordingExecutor::default());
        executor.push_result(Err(QueryError::statement(
            "TABLE_OR_VIEW_NOT_FOUND",
            "[TABLE_OR_VIEW_NOT_FOUND] The table `raw`.`ads` cannot be found.",
        )));
        let introspector = SchemaIntrospector::new(Arc::new(DatabricksDialect), executor.clone());

        let columns = introspector
            .existing_columns(&TableRef::new("ads").in_schema("raw"))
            .await
            .expect("missing table is not an error");

        assert!(columns.is_empty());
        assert_eq!(executor.statements(), vec!["DESCRIBE TABLE `raw`.`ads`"]);
    }

    #[tokio::test]
    async fn other_describe_failures_are_schema_errors() {
        let executor = Arc::new(RecordingExecutor::default());
        executor.push_result(Err(QueryError::Transport(String::from("connection reset"))));
        let introspector = SchemaIntrospector::new(Arc::new(DuckDbDialect), executor);

        let error = introspector
            .existing_columns(&TableRef::new("ads"))
            .await
            .expect_err("transport failure must surface");

        assert_eq!(error.code(), "storage.schema");
    }

    #[tokio::test]
    async fn describe_rows_become_existing_columns() {
        let executor = Arc::new(RecordingExecutor::default());
        executor.push_result(Ok(QueryResult::from_rows(
            vec![
                SqlColumn {
                    name: String::from("col_name"),
                    r#type: String::from("string"),
                },
                SqlColumn {
                    name: String::from("data_type"),
                    r#type: String::from("string"),
                },
            ],
            vec![
                vec![json!("ad_id"), json!("string")],
                vec![json!(""), json!("")],
                vec![json!("# Partition Information"), json!("")],
                vec![json!("spend"), json!("double")],
            ],
        )));
        let introspector = SchemaIntrospector::new(Arc::new(DatabricksDialect), executor);

        let columns = introspector
            .existing_columns(&TableRef::new("ads"))
            .await
            .expect("describe succeeds");

        assert_eq!(columns.names().collect::<Vec<_>>(), vec!["ad_id", "spend"]);
    }
}
