use std::sync::Arc;

use adsync_core::{FieldValue, TypedRecord};
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dialect::{Dialect, TableRef};
use crate::error::{QueryError, StorageError};
use crate::executor::QueryExecutor;

static NULL_VALUE: FieldValue = FieldValue::Null;

/// Upserts records through a uniquely named staging table that is always dropped.
#[derive(Clone)]
pub struct MergeExecutor {
    dialect: Arc<dyn Dialect>,
    executor: Arc<dyn QueryExecutor>,
    max_batch_size: usize,
}

impl MergeExecutor {
    pub fn new(dialect: Arc<dyn Dialect>, executor: Arc<dyn QueryExecutor>, max_batch_size: usize) -> Self {
        Self {
            dialect,
            executor,
            max_batch_size: max_batch_size.max(1),
        }
    }

    /// Merges `records` into `table` on `unique_keys`, writing only `columns`.
    /// Returns the number of staged records.
    ///
    /// # Errors
    ///
    /// [`StorageError::Write`] naming the staging table when staging or the merge
    /// fails. The staging table is dropped before the error is returned.
    pub async fn upsert(
        &self,
        table: &TableRef,
        columns: &[String],
        records: &[TypedRecord],
        unique_keys: &[String],
    ) -> Result<usize, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }

        let staging = table.sibling(staging_name(&table.name));
        let outcome = self.stage_and_merge(table, &staging, columns, records, unique_keys).await;

        if let Err(error) = self.executor.execute(&self.dialect.drop_table(&staging)).await {
            warn!(staging = %staging, error = %error, "failed to drop staging table");
        }

        outcome.map(|()| records.len()).map_err(|error| {
            StorageError::write(table.to_string(), Some(staging.to_string()), error.to_string())
        })
    }

    async fn stage_and_merge(
        &self,
        table: &TableRef,
        staging: &TableRef,
        columns: &[String],
        records: &[TypedRecord],
        unique_keys: &[String],
    ) -> Result<(), QueryError> {
        self.executor
            .execute(&self.dialect.create_staging(staging, table, columns))
            .await?;

        for (batch, chunk) in records.chunks(self.max_batch_size).enumerate() {
            let rows = chunk
                .iter()
                .map(|record| {
                    columns
                        .iter()
                        .map(|column| record.get(column).unwrap_or(&NULL_VALUE))
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>();
            debug!(staging = %staging, batch, rows = rows.len(), "staging batch");
            self.executor
                .execute(&self.dialect.insert_rows(staging, columns, &rows))
                .await?;
        }

        let plan = self.dialect.merge(table, staging, columns, unique_keys);
        if plan.atomic {
            self.executor.execute_transaction(&plan.statements).await
        } else {
            for statement in &plan.statements {
                self.executor.execute(statement).await?;
            }
            Ok(())
        }
    }
}

/// `{table}_staging_{unix_millis}_{8 hex}`, unique across concurrent writers.
pub fn staging_name(table: &str) -> String {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{table}_staging_{millis}_{}", &suffix[..8])
}
