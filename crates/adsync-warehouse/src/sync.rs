use adsync_core::{ConfigError, ConnectorConfig, DateWindow, FetchRequest, NodeSchema, Source, SourceError};
use thiserror::Error;
use time::Date;
use tracing::info;

use crate::error::StorageError;
use crate::storage::DataStorage;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// One node to copy for a set of accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub node: String,
    pub accounts: Vec<String>,
    pub fields: Vec<String>,
    pub window: Option<DateWindow>,
}

impl SyncRequest {
    pub fn new(node: impl Into<String>, accounts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            node: node.into(),
            accounts: accounts.into_iter().map(Into::into).collect(),
            fields: Vec::new(),
            window: None,
        }
    }

    pub fn with_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_window(mut self, window: DateWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// Request for `node` as configured, or `None` when a time-series node has no
    /// days left to fetch.
    ///
    /// # Errors
    ///
    /// [`SyncError::Config`] when a time-series node lacks `startDate` or the
    /// configured window is inverted.
    pub fn from_config(config: &ConnectorConfig, node: &NodeSchema, today: Date) -> Result<Option<Self>, SyncError> {
        let fields = config
            .fields
            .fields_for(&node.node_name)
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        let request = Self::new(node.node_name.clone(), config.account_ids.clone()).with_fields(fields);

        if !node.is_time_series {
            return Ok(Some(request));
        }
        Ok(config.fetch_window(today)?.map(|window| request.with_window(window)))
    }

    fn fetch_request(&self, account: &str) -> FetchRequest {
        let request = FetchRequest::new(self.node.clone(), account).with_fields(self.fields.iter().cloned());
        match self.window {
            Some(window) => request.with_window(window),
            None => request,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub node: String,
    pub accounts: usize,
    pub fetched: usize,
    pub written: usize,
}

/// Fetches `request.node` for every account into `storage`, then closes it.
///
/// On error the storage is left open with whatever is still buffered.
pub async fn sync_node(
    source: &dyn Source,
    storage: &mut dyn DataStorage,
    request: &SyncRequest,
) -> Result<SyncReport, SyncError> {
    storage.init().await?;

    let mut report = SyncReport {
        node: request.node.clone(),
        accounts: 0,
        fetched: 0,
        written: 0,
    };

    for account in &request.accounts {
        let records = source
            .fetch_data(request.fetch_request(account))
            .await
            .map_err(|error| error.in_context(&request.node, account))?;
        info!(
            provider = %source.id(),
            node = %request.node,
            account = %account,
            records = records.len(),
            "fetched node"
        );

        report.accounts += 1;
        report.fetched += records.len();
        report.written += storage.save_data(records).await?;
    }

    report.written += storage.close().await?;
    Ok(report)
}
