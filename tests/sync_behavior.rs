//! Behavior-driven tests for node synchronization
//!
//! These tests verify HOW a source's records flow into warehouse storage for a
//! set of accounts and what state the storage is left in when a fetch fails.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use adsync_core::{
    ConnectorConfig, DateWindow, FetchRequest, FieldDescriptor, FieldSchema, FieldValue, NodeSchema,
    ProviderId, SemanticType, Source, SourceError, SourceErrorKind, TypedRecord,
};
use adsync_warehouse::{
    sync_node, DataStorage, DuckDbDialect, QueryExecutor, StorageConfig, StorageState,
    SyncError, SyncRequest, TableRef, WarehouseStorage,
};
use adsync_tests::{open_warehouse, query_warehouse};
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use time::{Date, Month};

/// Source answering from per-account fixtures.
struct FixtureSource {
    schema: FieldSchema,
    accounts: HashMap<String, Result<Vec<TypedRecord>, SourceError>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl FixtureSource {
    fn new(accounts: impl IntoIterator<Item = (&'static str, Result<Vec<TypedRecord>, SourceError>)>) -> Self {
        Self {
            schema: FieldSchema::new([campaigns_node(), insights_node()]),
            accounts: accounts
                .into_iter()
                .map(|(account, outcome)| (account.to_owned(), outcome))
                .collect(),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().expect("request log poisoned").clone()
    }
}

impl Source for FixtureSource {
    fn id(&self) -> ProviderId {
        ProviderId::Tiktok
    }

    fn field_schema(&self) -> &FieldSchema {
        &self.schema
    }

    fn fetch_data<'a>(
        &'a self,
        request: FetchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<TypedRecord>, SourceError>> + Send + 'a>> {
        let outcome = self
            .accounts
            .get(&request.account_id)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()));
        self.requests.lock().expect("request log poisoned").push(request);
        Box::pin(async move { outcome })
    }
}

fn campaigns_node() -> NodeSchema {
    NodeSchema::new(
        "campaigns",
        [
            FieldDescriptor::new("campaign_id", SemanticType::String),
            FieldDescriptor::new("campaign_name", SemanticType::String),
            FieldDescriptor::new("budget", SemanticType::Number),
        ],
        ["campaign_id"],
    )
}

fn insights_node() -> NodeSchema {
    NodeSchema::new(
        "report/insights",
        [
            FieldDescriptor::new("ad_id", SemanticType::String),
            FieldDescriptor::new("stat_time_day", SemanticType::Date).time_partition(),
            FieldDescriptor::new("spend", SemanticType::Number),
        ],
        ["ad_id", "stat_time_day"],
    )
    .time_series()
}

fn campaign(id: &str, name: &str) -> TypedRecord {
    TypedRecord::new()
        .with("campaign_id", FieldValue::String(id.to_owned()))
        .with("campaign_name", FieldValue::String(name.to_owned()))
}

fn day(month: Month, day: u8) -> Date {
    Date::from_calendar_date(2024, month, day).expect("valid date")
}

fn campaign_storage(dir: &TempDir) -> WarehouseStorage {
    let executor: Arc<dyn QueryExecutor> = Arc::new(open_warehouse(dir));
    let config = StorageConfig::new(TableRef::new("tiktok_ads_campaigns").in_schema("main"), campaigns_node());
    WarehouseStorage::new(Arc::new(DuckDbDialect), executor, config).expect("valid storage config")
}

fn tiktok_config(extra: Value) -> ConnectorConfig {
    let mut document = json!({
        "source": {"provider": "tiktok", "accessToken": "tt"},
        "accountIds": ["7001", "7002"],
        "fields": "campaigns campaign_id, campaigns campaign_name"
    });
    if let (Some(target), Value::Object(extra)) = (document.as_object_mut(), extra) {
        target.extend(extra);
    }
    ConnectorConfig::from_json_str(&document.to_string()).expect("valid connector config")
}

// =============================================================================
// Sync: Happy Path
// =============================================================================

#[tokio::test]
async fn when_every_account_fetches_then_rows_land_and_storage_closes() {
    // Given: Two accounts with campaigns, one shared across both
    let dir = tempdir().expect("tempdir");
    let source = FixtureSource::new([
        ("7001", Ok(vec![campaign("c1", "Spring"), campaign("c2", "Summer")])),
        ("7002", Ok(vec![campaign("c2", "Summer v2"), campaign("c3", "Autumn")])),
    ]);
    let mut storage = campaign_storage(&dir);
    let request = SyncRequest::new("campaigns", ["7001", "7002"]).with_fields(["campaign_id", "campaign_name"]);

    // When: The node is synced
    let report = sync_node(&source, &mut storage, &request).await.expect("sync succeeds");

    // Then: Every fetched record is counted and the storage is closed
    assert_eq!(report.node, "campaigns");
    assert_eq!(report.accounts, 2);
    assert_eq!(report.fetched, 4);
    assert_eq!(report.written, 3);
    assert_eq!(storage.state(), StorageState::Closed);

    let requests = source.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].account_id, "7002");
    assert_eq!(requests[1].selected_fields, vec!["campaign_id", "campaign_name"]);

    let result = query_warehouse(
        &dir,
        r#"SELECT campaign_id, campaign_name FROM "main"."tiktok_ads_campaigns" ORDER BY campaign_id"#,
    )
    .await;
    assert_eq!(
        result.rows,
        vec![
            vec![json!("c1"), json!("Spring")],
            vec![json!("c2"), json!("Summer v2")],
            vec![json!("c3"), json!("Autumn")],
        ]
    );
}

#[tokio::test]
async fn when_accounts_return_nothing_then_the_empty_table_is_still_provisioned() {
    // Given: A source with no campaigns
    let dir = tempdir().expect("tempdir");
    let source = FixtureSource::new([]);
    let mut storage = campaign_storage(&dir);

    // When: The node is synced
    let report = sync_node(&source, &mut storage, &SyncRequest::new("campaigns", ["7001"]))
        .await
        .expect("sync succeeds");

    // Then: Nothing was written but the table exists
    assert_eq!((report.fetched, report.written), (0, 0));
    let result = query_warehouse(
        &dir,
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = 'tiktok_ads_campaigns'",
    )
    .await;
    assert_eq!(result.rows[0][0], Value::from(1));
}

// =============================================================================
// Sync: Failures
// =============================================================================

#[tokio::test]
async fn when_an_account_fails_then_error_names_it_and_storage_stays_open() {
    // Given: A second account whose fetch fails
    let dir = tempdir().expect("tempdir");
    let source = FixtureSource::new([
        ("7001", Ok(vec![campaign("c1", "Spring")])),
        ("7002", Err(SourceError::fetch("Rate limit reached"))),
    ]);
    let mut storage = campaign_storage(&dir);
    let request = SyncRequest::new("campaigns", ["7001", "7002"]);

    // When: The node is synced
    let error = sync_node(&source, &mut storage, &request).await.expect_err("second account fails");

    // Then: The source error carries node and account; buffered rows survive
    let SyncError::Source(error) = error else {
        panic!("expected a source error, got {error:?}");
    };
    assert_eq!(error.kind(), SourceErrorKind::Fetch);
    assert_eq!(error.node(), Some("campaigns"));
    assert_eq!(error.account_id(), Some("7002"));
    assert_eq!(storage.state(), StorageState::Ready);
    assert_eq!(storage.buffered(), 1);

    // When: The caller closes the storage itself
    let written = storage.close().await.expect("close flushes");

    // Then: The first account's rows are kept
    assert_eq!(written, 1);
}

// =============================================================================
// Sync: Requests From Configuration
// =============================================================================

#[test]
fn when_node_is_not_a_time_series_then_request_has_no_window() {
    // Given: A connector config with field selections
    let config = tiktok_config(json!({}));

    // When: A request is built for campaigns
    let request = SyncRequest::from_config(&config, &campaigns_node(), day(Month::March, 1))
        .expect("valid request")
        .expect("campaigns always sync");

    // Then: It covers every account with the configured fields
    assert_eq!(request.accounts, vec!["7001", "7002"]);
    assert_eq!(request.fields, vec!["campaign_id", "campaign_name"]);
    assert_eq!(request.window, None);
}

#[test]
fn when_time_series_node_has_a_pinned_window_then_request_uses_it() {
    // Given: A config with explicit start and end dates
    let config = tiktok_config(json!({"startDate": "2024-01-01", "endDate": "2024-01-03"}));

    // When: A request is built for insights
    let request = SyncRequest::from_config(&config, &insights_node(), day(Month::March, 1))
        .expect("valid request")
        .expect("window to fetch");

    // Then: The window is the configured one and no insights fields were selected
    let expected = DateWindow::new(day(Month::January, 1), day(Month::January, 3)).expect("valid window");
    assert_eq!(request.window, Some(expected));
    assert!(request.fields.is_empty());
}

#[test]
fn when_time_series_node_has_no_start_date_then_request_is_a_config_error() {
    // Given: A config without startDate
    let config = tiktok_config(json!({}));

    // When: A request is built for insights
    let error = SyncRequest::from_config(&config, &insights_node(), day(Month::March, 1))
        .expect_err("startDate is required");

    // Then: The missing setting is named
    assert!(matches!(error, SyncError::Config(_)));
    assert!(error.to_string().contains("startDate"), "{error}");
}
