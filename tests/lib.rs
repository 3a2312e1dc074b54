// Shared fixtures for the behavior tests
use std::path::PathBuf;

use adsync_warehouse::{DuckDbExecutor, QueryExecutor, QueryResult};
use tempfile::TempDir;

/// Warehouse file the suites open inside their temp directory.
pub fn warehouse_path(dir: &TempDir) -> PathBuf {
    dir.path().join("warehouse.duckdb")
}

pub fn open_warehouse(dir: &TempDir) -> DuckDbExecutor {
    DuckDbExecutor::open(warehouse_path(dir)).expect("duckdb should open")
}

/// Runs one query against the warehouse on a fresh connection.
pub async fn query_warehouse(dir: &TempDir, sql: &str) -> QueryResult {
    let executor = open_warehouse(dir);
    let result = executor.execute(sql).await.expect("query should run");
    executor.close().await.expect("close");
    result
}
