//! Storage engine for adsync.
//!
//! Typed records from an [`adsync_core::Source`] are buffered per unique key and
//! upserted through a staging table into DuckDB, Snowflake or Databricks. Tables
//! are created on first use and only ever gain columns.

pub mod buffer;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod introspect;
pub mod merge;
pub mod provision;
pub mod storage;
pub mod sync;

pub use buffer::UpsertBuffer;
pub use dialect::{
    column_specs, ColumnSpec, DatabricksDialect, DdlStatement, Dialect, DuckDbDialect, ExistingColumn,
    MergePlan, SnowflakeDialect, TableRef,
};
pub use error::{QueryError, StorageError};
pub use executor::{
    DuckDbExecutor, QueryExecutor, QueryFuture, QueryResult, SqlColumn, StatementApiExecutor,
    StatementProtocol,
};
pub use introspect::{missing_columns, ExistingColumns, SchemaIntrospector};
pub use merge::{staging_name, MergeExecutor};
pub use provision::{Provisioned, TableProvisioner};
pub use storage::{
    open_storage, DataStorage, DatabricksSettings, DuckDbSettings, SnowflakeSettings, StorageConfig,
    StorageFuture, StorageState, WarehouseSettings, WarehouseStorage,
};
pub use sync::{sync_node, SyncError, SyncReport, SyncRequest};
