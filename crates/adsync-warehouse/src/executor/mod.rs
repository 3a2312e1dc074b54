//! Query channels: an embedded DuckDB connection and HTTP statement APIs.

mod duckdb;
mod statement_api;

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use serde_json::Value;

use crate::error::QueryError;

pub use self::duckdb::DuckDbExecutor;
pub use statement_api::{StatementApiExecutor, StatementProtocol};

pub type QueryFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueryError>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SqlColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub r#type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<SqlColumn>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
}

impl QueryResult {
    pub fn from_rows(columns: Vec<SqlColumn>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            row_count: rows.len(),
            rows,
        }
    }

    /// Cell rendered as text; numbers and booleans are stringified.
    pub fn text(&self, row: usize, column: usize) -> Option<String> {
        match self.rows.get(row)?.get(column)? {
            Value::Null => None,
            Value::String(value) => Some(value.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Executes SQL over a warehouse's native channel.
pub trait QueryExecutor: Send + Sync {
    fn execute<'a>(&'a self, sql: &'a str) -> QueryFuture<'a, QueryResult>;

    /// Runs `statements` atomically. Channels without transactions run them in
    /// order and stop at the first failure.
    fn execute_transaction<'a>(&'a self, statements: &'a [String]) -> QueryFuture<'a, ()> {
        Box::pin(async move {
            for statement in statements {
                self.execute(statement).await?;
            }
            Ok(())
        })
    }

    /// Releases the channel. Later calls fail with [`QueryError::Closed`].
    fn close<'a>(&'a self) -> QueryFuture<'a, ()>;
}
