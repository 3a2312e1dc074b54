use std::sync::Arc;

use tracing::{info, warn};

use crate::dialect::{ColumnSpec, DdlStatement, Dialect, ExistingColumn, TableRef};
use crate::error::StorageError;
use crate::executor::QueryExecutor;
use crate::introspect::{missing_columns, ExistingColumns};

/// What [`TableProvisioner::ensure_table`] had to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    Altered { added: Vec<String> },
    Unchanged,
}

/// Creates destination tables and appends missing columns. Existing columns are
/// never altered or dropped.
#[derive(Clone)]
pub struct TableProvisioner {
    dialect: Arc<dyn Dialect>,
    executor: Arc<dyn QueryExecutor>,
}

impl TableProvisioner {
    pub fn new(dialect: Arc<dyn Dialect>, executor: Arc<dyn QueryExecutor>) -> Self {
        Self { dialect, executor }
    }

    /// Makes `table` hold every column in `columns`, recording successful DDL in
    /// `existing`.
    ///
    /// # Errors
    ///
    /// [`StorageError::Schema`] when a required statement fails. Columns added by
    /// earlier statements stay recorded.
    pub async fn ensure_table(
        &self,
        table: &TableRef,
        columns: &[ColumnSpec],
        unique_keys: &[String],
        existing: &mut ExistingColumns,
    ) -> Result<Provisioned, StorageError> {
        if existing.is_empty() {
            self.create(table, columns, unique_keys).await?;
            for column in columns {
                existing.insert(ExistingColumn::from(column));
            }
            return Ok(Provisioned::Created);
        }

        let missing = missing_columns(columns, existing)
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();
        if missing.is_empty() {
            return Ok(Provisioned::Unchanged);
        }

        let added = missing.iter().map(|column| column.name.clone()).collect::<Vec<_>>();
        info!(table = %table, columns = ?added, "adding columns");
        for statement in self.dialect.add_columns(table, &missing) {
            if !self.run(table, &statement).await? {
                continue;
            }
            for name in &statement.adds {
                if let Some(column) = missing.iter().find(|column| &column.name == name) {
                    existing.insert(ExistingColumn::from(column));
                }
            }
        }
        for statement in self.dialect.column_comments(table, &missing) {
            self.run(table, &statement).await?;
        }

        Ok(Provisioned::Altered { added })
    }

    async fn create(
        &self,
        table: &TableRef,
        columns: &[ColumnSpec],
        unique_keys: &[String],
    ) -> Result<(), StorageError> {
        if columns.is_empty() {
            return Err(StorageError::schema(
                table.to_string(),
                "cannot create a table without columns",
            ));
        }

        info!(
            table = %table,
            dialect = self.dialect.name(),
            columns = columns.len(),
            "creating destination table"
        );
        let statements = self
            .dialect
            .create_namespace(table)
            .into_iter()
            .chain(self.dialect.create_table(table, columns, unique_keys))
            .chain(self.dialect.column_comments(table, columns));
        for statement in statements {
            self.run(table, &statement).await?;
        }
        Ok(())
    }

    /// Runs one statement; `false` means an optional statement failed.
    async fn run(&self, table: &TableRef, statement: &DdlStatement) -> Result<bool, StorageError> {
        match self.executor.execute(&statement.sql).await {
            Ok(_) => Ok(true),
            Err(error) if !statement.required => {
                warn!(table = %table, sql = %statement.sql, error = %error, "optional DDL failed");
                Ok(false)
            }
            Err(error) => Err(StorageError::schema(
                table.to_string(),
                format!("{} failed: {error}", statement.sql),
            )),
        }
    }
}
