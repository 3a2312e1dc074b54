//! # Storage lifecycle
//!
//! A [`WarehouseStorage`] owns one destination table. It moves through
//! `uninitialized -> schema_loaded -> ready -> flushing -> ready ... -> closed`:
//!
//! - `init` introspects the table and provisions it when needed.
//! - `save_data` buffers records and flushes whenever the buffer is full.
//! - `close` flushes what is left and releases the connection. A closed storage
//!   rejects every call with [`StorageError::Lifecycle`].
//!
//! A failed flush keeps its records buffered so a later flush or `close` can
//! resubmit them.

use std::env;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use adsync_core::{ConnectorConfig, HttpClient, NodeSchema, TypedRecord};
use serde::Deserialize;
use tracing::{debug, info};

use crate::buffer::UpsertBuffer;
use crate::dialect::{column_specs, DatabricksDialect, Dialect, DuckDbDialect, SnowflakeDialect, TableRef};
use crate::error::StorageError;
use crate::executor::{DuckDbExecutor, QueryExecutor, StatementApiExecutor, StatementProtocol};
use crate::introspect::{ExistingColumns, SchemaIntrospector};
use crate::merge::MergeExecutor;
use crate::provision::{Provisioned, TableProvisioner};

pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageState {
    Uninitialized,
    SchemaLoaded,
    Ready,
    Flushing,
    Closed,
}

impl StorageState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::SchemaLoaded => "schema_loaded",
            Self::Ready => "ready",
            Self::Flushing => "flushing",
            Self::Closed => "closed",
        }
    }
}

impl Display for StorageState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability interface implemented once per warehouse.
pub trait DataStorage: Send {
    fn state(&self) -> StorageState;

    /// Introspects and provisions the destination table. Idempotent.
    fn init<'a>(&'a mut self) -> StorageFuture<'a, ()>;

    /// Buffers `records`, flushing whenever the buffer reaches its threshold.
    /// Returns the number of rows written by those flushes.
    fn save_data<'a>(&'a mut self, records: Vec<TypedRecord>) -> StorageFuture<'a, usize>;

    /// Writes every buffered record.
    fn flush<'a>(&'a mut self) -> StorageFuture<'a, usize>;

    /// Final flush, then releases the connection.
    fn close<'a>(&'a mut self) -> StorageFuture<'a, usize>;
}

/// Destination table and write tunables for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub table: TableRef,
    pub node: NodeSchema,
    /// Empty means every field of the node.
    pub selected_fields: Vec<String>,
    pub unique_keys: Vec<String>,
    pub max_buffer_size: usize,
    pub max_batch_size: usize,
    /// Provision at `init` even before any record arrives.
    pub create_empty_table: bool,
}

impl StorageConfig {
    pub fn new(table: TableRef, node: NodeSchema) -> Self {
        Self {
            table,
            unique_keys: node.unique_keys.clone(),
            node,
            selected_fields: Vec::new(),
            max_buffer_size: 250,
            max_batch_size: 500,
            create_empty_table: true,
        }
    }

    /// Table, fields and tunables for `node` as configured for a connector.
    pub fn from_connector(config: &ConnectorConfig, node: NodeSchema, table: TableRef) -> Self {
        let selected_fields = config
            .fields
            .fields_for(&node.node_name)
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        Self {
            selected_fields,
            max_buffer_size: config.max_buffer_size,
            max_batch_size: config.max_batch_size,
            create_empty_table: config.create_empty_tables,
            ..Self::new(table, node)
        }
    }

    pub fn with_selected_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.selected_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_unique_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.unique_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }

    pub fn with_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_create_empty_table(mut self, create_empty_table: bool) -> Self {
        self.create_empty_table = create_empty_table;
        self
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        if self.max_buffer_size == 0 {
            return Err(StorageError::Configuration(String::from(
                "maxBufferSize must be greater than zero",
            )));
        }
        if self.max_batch_size == 0 {
            return Err(StorageError::Configuration(String::from(
                "maxBatchSize must be greater than zero",
            )));
        }
        if let Some(key) = self.unique_keys.iter().find(|key| !self.node.contains(key)) {
            return Err(StorageError::Configuration(format!(
                "unique key '{key}' is not a field of node '{}'",
                self.node.node_name
            )));
        }
        Ok(())
    }

    /// Unique keys first, then the selected fields the node defines.
    pub fn columns(&self) -> Vec<String> {
        let mut columns = self.unique_keys.clone();
        for field in self.node.resolve_fields(&self.selected_fields) {
            if self.node.contains(&field) && !columns.contains(&field) {
                columns.push(field);
            }
        }
        columns
    }
}

/// Storage over any dialect and query channel.
pub struct WarehouseStorage {
    config: StorageConfig,
    dialect: Arc<dyn Dialect>,
    executor: Arc<dyn QueryExecutor>,
    introspector: SchemaIntrospector,
    provisioner: TableProvisioner,
    merger: MergeExecutor,
    buffer: UpsertBuffer,
    existing: ExistingColumns,
    columns: Vec<String>,
    state: StorageState,
}

impl WarehouseStorage {
    pub fn new(
        dialect: Arc<dyn Dialect>,
        executor: Arc<dyn QueryExecutor>,
        config: StorageConfig,
    ) -> Result<Self, StorageError> {
        config.validate()?;
        let columns = config.columns();
        Ok(Self {
            introspector: SchemaIntrospector::new(Arc::clone(&dialect), Arc::clone(&executor)),
            provisioner: TableProvisioner::new(Arc::clone(&dialect), Arc::clone(&executor)),
            merger: MergeExecutor::new(Arc::clone(&dialect), Arc::clone(&executor), config.max_batch_size),
            buffer: UpsertBuffer::new(config.unique_keys.clone(), config.max_buffer_size),
            existing: ExistingColumns::new(),
            columns,
            state: StorageState::Uninitialized,
            dialect,
            executor,
            config,
        })
    }

    pub fn table(&self) -> &TableRef {
        &self.config.table
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Columns known to exist in the destination table.
    pub fn existing_columns(&self) -> &ExistingColumns {
        &self.existing
    }

    fn transition(&mut self, next: StorageState) {
        debug!(table = %self.config.table, from = %self.state, to = %next, "storage state");
        self.state = next;
    }

    fn ensure_open(&self, operation: &'static str) -> Result<(), StorageError> {
        if self.state == StorageState::Closed {
            return Err(StorageError::Lifecycle {
                state: self.state,
                operation,
            });
        }
        Ok(())
    }

    async fn initialize(&mut self) -> Result<(), StorageError> {
        self.ensure_open("init")?;
        if self.state == StorageState::Uninitialized {
            self.existing = self.introspector.existing_columns(&self.config.table).await?;
            self.transition(StorageState::SchemaLoaded);
        }
        if self.state == StorageState::SchemaLoaded {
            if self.config.create_empty_table || !self.existing.is_empty() {
                self.provision().await?;
            }
            self.transition(StorageState::Ready);
        }
        Ok(())
    }

    async fn provision(&mut self) -> Result<Provisioned, StorageError> {
        let specs = column_specs(
            self.dialect.as_ref(),
            &self.config.table,
            &self.config.node,
            &self.columns,
        )?;
        self.provisioner
            .ensure_table(&self.config.table, &specs, &self.config.unique_keys, &mut self.existing)
            .await
    }

    /// Grows the column set with node fields that appear in `records`.
    fn evolve_columns(&mut self, records: &[TypedRecord]) {
        for record in records {
            for field in record.field_names() {
                if self.config.node.contains(field) && !self.columns.iter().any(|column| column == field) {
                    self.columns.push(field.to_owned());
                }
            }
        }
    }

    async fn flush_buffer(&mut self) -> Result<usize, StorageError> {
        self.ensure_open("flush")?;
        if self.buffer.is_empty() {
            return Ok(0);
        }
        self.initialize().await?;

        self.transition(StorageState::Flushing);
        let records = self.buffer.drain();
        let outcome = self.write(&records).await;
        self.transition(StorageState::Ready);

        match outcome {
            Ok(written) => {
                info!(table = %self.config.table, rows = written, "flushed records");
                Ok(written)
            }
            Err(error) => {
                self.buffer.restore(records);
                Err(error)
            }
        }
    }

    async fn write(&mut self, records: &[TypedRecord]) -> Result<usize, StorageError> {
        self.evolve_columns(records);
        self.provision().await?;
        self.merger
            .upsert(&self.config.table, &self.columns, records, &self.config.unique_keys)
            .await
    }

    async fn save(&mut self, records: Vec<TypedRecord>) -> Result<usize, StorageError> {
        self.ensure_open("save data")?;
        self.initialize().await?;

        let mut written = 0;
        for record in records {
            self.buffer.add(record);
            if self.buffer.should_flush() {
                written += self.flush_buffer().await?;
            }
        }
        Ok(written)
    }

    async fn shutdown(&mut self) -> Result<usize, StorageError> {
        self.ensure_open("close")?;
        let written = self.flush_buffer().await?;
        self.executor.close().await.map_err(|error| {
            StorageError::write(
                self.config.table.to_string(),
                None,
                format!("cannot release connection: {error}"),
            )
        })?;
        self.transition(StorageState::Closed);
        Ok(written)
    }
}

impl DataStorage for WarehouseStorage {
    fn state(&self) -> StorageState {
        self.state
    }

    fn init<'a>(&'a mut self) -> StorageFuture<'a, ()> {
        Box::pin(self.initialize())
    }

    fn save_data<'a>(&'a mut self, records: Vec<TypedRecord>) -> StorageFuture<'a, usize> {
        Box::pin(self.save(records))
    }

    fn flush<'a>(&'a mut self) -> StorageFuture<'a, usize> {
        Box::pin(self.flush_buffer())
    }

    fn close<'a>(&'a mut self) -> StorageFuture<'a, usize> {
        Box::pin(self.shutdown())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuckDbSettings {
    /// Defaults to `$ADSYNC_HOME/warehouse.duckdb`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnowflakeSettings {
    pub account: String,
    pub token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub database: String,
    #[serde(default)]
    pub warehouse: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

fn default_token_type() -> String {
    String::from("OAUTH")
}

impl std::fmt::Debug for SnowflakeSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnowflakeSettings")
            .field("account", &self.account)
            .field("database", &self.database)
            .field("warehouse", &self.warehouse)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabricksSettings {
    pub host: String,
    pub token: String,
    pub warehouse_id: String,
    #[serde(default)]
    pub catalog: Option<String>,
}

impl std::fmt::Debug for DatabricksSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabricksSettings")
            .field("host", &self.host)
            .field("warehouse_id", &self.warehouse_id)
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

/// Destination warehouse, tagged by `warehouse` in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "warehouse", rename_all = "lowercase")]
pub enum WarehouseSettings {
    Duckdb(DuckDbSettings),
    Snowflake(SnowflakeSettings),
    Databricks(DatabricksSettings),
}

impl WarehouseSettings {
    pub fn from_json_str(input: &str) -> Result<Self, StorageError> {
        serde_json::from_str(input)
            .map_err(|error| StorageError::Configuration(format!("invalid warehouse settings: {error}")))
    }

    pub fn dialect(&self) -> Arc<dyn Dialect> {
        match self {
            Self::Duckdb(_) => Arc::new(DuckDbDialect),
            Self::Snowflake(_) => Arc::new(SnowflakeDialect),
            Self::Databricks(_) => Arc::new(DatabricksDialect),
        }
    }

    pub const fn default_schema(&self) -> &'static str {
        match self {
            Self::Duckdb(_) => "main",
            Self::Snowflake(_) => "PUBLIC",
            Self::Databricks(_) => "default",
        }
    }

    /// Qualifies `name` with the warehouse's database or catalog and `schema`.
    pub fn table_ref(&self, name: &str, schema: Option<&str>) -> TableRef {
        let schema = schema
            .filter(|schema| !schema.is_empty())
            .unwrap_or(self.default_schema());
        let table = TableRef::new(name).in_schema(schema);
        match self {
            Self::Duckdb(_) => table,
            Self::Snowflake(settings) => table.in_catalog(settings.database.clone()),
            Self::Databricks(settings) => match &settings.catalog {
                Some(catalog) => table.in_catalog(catalog.clone()),
                None => table,
            },
        }
    }

    /// Opens the query channel. HTTP warehouses go through `http`.
    pub fn open_executor(&self, http: Arc<dyn HttpClient>) -> Result<Arc<dyn QueryExecutor>, StorageError> {
        match self {
            Self::Duckdb(settings) => {
                let path = settings
                    .path
                    .clone()
                    .unwrap_or_else(|| resolve_adsync_home().join("warehouse.duckdb"));
                let executor = DuckDbExecutor::open(path).map_err(|error| {
                    StorageError::Configuration(format!("cannot open duckdb: {error}"))
                })?;
                Ok(Arc::new(executor))
            }
            Self::Snowflake(settings) => Ok(Arc::new(StatementApiExecutor::new(
                http,
                StatementProtocol::Snowflake {
                    account: settings.account.clone(),
                    token: settings.token.clone(),
                    token_type: settings.token_type.clone(),
                    database: settings.database.clone(),
                    warehouse: settings.warehouse.clone(),
                    role: settings.role.clone(),
                },
            ))),
            Self::Databricks(settings) => Ok(Arc::new(StatementApiExecutor::new(
                http,
                StatementProtocol::Databricks {
                    host: settings.host.clone(),
                    token: settings.token.clone(),
                    warehouse_id: settings.warehouse_id.clone(),
                    catalog: settings.catalog.clone(),
                },
            ))),
        }
    }
}

/// Builds the storage for one node on the configured warehouse.
pub fn open_storage(
    settings: &WarehouseSettings,
    http: Arc<dyn HttpClient>,
    config: StorageConfig,
) -> Result<WarehouseStorage, StorageError> {
    let executor = settings.open_executor(http)?;
    WarehouseStorage::new(settings.dialect(), executor, config)
}

fn resolve_adsync_home() -> PathBuf {
    if let Some(path) = env::var_os("ADSYNC_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".adsync");
    }

    PathBuf::from(".adsync")
}
