//! Warehouses reached through an HTTP statement API: Snowflake SQL API v2 and
//! the Databricks SQL Statement Execution API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use adsync_core::{HttpAuth, HttpClient, HttpRequest, HttpResponse};
use serde_json::{json, Value};
use tracing::debug;

use super::{QueryExecutor, QueryFuture, QueryResult, SqlColumn};
use crate::error::QueryError;

const DEFAULT_MAX_POLLS: u32 = 300;
const STATEMENT_TIMEOUT_SECS: u64 = 3600;

/// Connection details for one statement API.
#[derive(Clone, PartialEq, Eq)]
pub enum StatementProtocol {
    Snowflake {
        account: String,
        token: String,
        token_type: String,
        database: String,
        warehouse: Option<String>,
        role: Option<String>,
    },
    Databricks {
        host: String,
        token: String,
        warehouse_id: String,
        catalog: Option<String>,
    },
}

impl std::fmt::Debug for StatementProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Snowflake {
                account, database, ..
            } => f
                .debug_struct("Snowflake")
                .field("account", account)
                .field("database", database)
                .field("token", &"<redacted>")
                .finish_non_exhaustive(),
            Self::Databricks {
                host, warehouse_id, ..
            } => f
                .debug_struct("Databricks")
                .field("host", host)
                .field("warehouse_id", warehouse_id)
                .field("token", &"<redacted>")
                .finish_non_exhaustive(),
        }
    }
}

enum StatementPoll {
    Done(QueryResult),
    Pending(String),
}

impl StatementProtocol {
    fn base_url(&self) -> String {
        match self {
            Self::Snowflake { account, .. } => {
                let account = account.trim_end_matches('/');
                if account.starts_with("https://") {
                    format!("{account}/api/v2/statements")
                } else {
                    format!("https://{account}.snowflakecomputing.com/api/v2/statements")
                }
            }
            Self::Databricks { host, .. } => {
                let host = host.trim_end_matches('/');
                if host.starts_with("https://") || host.starts_with("http://") {
                    format!("{host}/api/2.0/sql/statements")
                } else {
                    format!("https://{host}/api/2.0/sql/statements")
                }
            }
        }
    }

    fn authorize(&self, request: HttpRequest) -> HttpRequest {
        match self {
            Self::Snowflake {
                token, token_type, ..
            } => request
                .with_auth(&HttpAuth::BearerToken(token.clone()))
                .with_header("X-Snowflake-Authorization-Token-Type", token_type.clone())
                .with_header("Accept", "application/json"),
            Self::Databricks { token, .. } => {
                request.with_auth(&HttpAuth::BearerToken(token.clone()))
            }
        }
    }

    fn submit_request(&self, sql: &str) -> HttpRequest {
        let body = match self {
            Self::Snowflake {
                database,
                warehouse,
                role,
                ..
            } => {
                let mut body = json!({
                    "statement": sql,
                    "timeout": STATEMENT_TIMEOUT_SECS,
                    "database": database,
                });
                if let Some(warehouse) = warehouse {
                    body["warehouse"] = json!(warehouse);
                }
                if let Some(role) = role {
                    body["role"] = json!(role);
                }
                body
            }
            Self::Databricks {
                warehouse_id,
                catalog,
                ..
            } => {
                let mut body = json!({
                    "statement": sql,
                    "warehouse_id": warehouse_id,
                    "wait_timeout": "30s",
                    "on_wait_timeout": "CONTINUE",
                    "disposition": "INLINE",
                    "format": "JSON_ARRAY",
                });
                if let Some(catalog) = catalog {
                    body["catalog"] = json!(catalog);
                }
                body
            }
        };

        self.authorize(HttpRequest::post(self.base_url()).with_json(&body))
    }

    fn poll_request(&self, handle: &str) -> HttpRequest {
        self.authorize(HttpRequest::get(format!("{}/{handle}", self.base_url())))
    }

    fn read(&self, response: &HttpResponse) -> Result<StatementPoll, QueryError> {
        let body = response.json().unwrap_or(Value::Null);
        match self {
            Self::Snowflake { .. } => read_snowflake(response.status, &body),
            Self::Databricks { .. } => read_databricks(response.status, &body),
        }
    }
}

fn text(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(text) => Some(text.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn read_snowflake(status: u16, body: &Value) -> Result<StatementPoll, QueryError> {
    match status {
        200 => {
            let columns = body
                .pointer("/resultSetMetaData/rowType")
                .and_then(Value::as_array)
                .map(|columns| {
                    columns
                        .iter()
                        .map(|column| SqlColumn {
                            name: text(column, "name").unwrap_or_default(),
                            r#type: text(column, "type").unwrap_or_default(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(StatementPoll::Done(QueryResult::from_rows(columns, rows_of(body.get("data")))))
        }
        202 => text(body, "statementHandle")
            .map(StatementPoll::Pending)
            .ok_or_else(|| QueryError::Transport(String::from("snowflake accepted a statement without a handle"))),
        _ => Err(QueryError::statement(
            text(body, "code").unwrap_or_else(|| status.to_string()),
            text(body, "message").unwrap_or_else(|| format!("snowflake returned HTTP {status}")),
        )),
    }
}

fn read_databricks(status: u16, body: &Value) -> Result<StatementPoll, QueryError> {
    if !(200..300).contains(&status) {
        return Err(QueryError::statement(
            text(body, "error_code").unwrap_or_else(|| status.to_string()),
            text(body, "message").unwrap_or_else(|| format!("databricks returned HTTP {status}")),
        ));
    }

    let state = body
        .pointer("/status/state")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match state {
        "SUCCEEDED" => {
            let columns = body
                .pointer("/manifest/schema/columns")
                .and_then(Value::as_array)
                .map(|columns| {
                    columns
                        .iter()
                        .map(|column| SqlColumn {
                            name: text(column, "name").unwrap_or_default(),
                            r#type: text(column, "type_name").unwrap_or_default(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            let rows = rows_of(body.pointer("/result/data_array"));
            Ok(StatementPoll::Done(QueryResult::from_rows(columns, rows)))
        }
        "PENDING" | "RUNNING" => text(body, "statement_id")
            .map(StatementPoll::Pending)
            .ok_or_else(|| QueryError::Transport(String::from("databricks statement has no id"))),
        other => {
            let error = body.pointer("/status/error").cloned().unwrap_or(Value::Null);
            Err(QueryError::statement(
                text(&error, "error_code").unwrap_or_else(|| other.to_owned()),
                text(&error, "message").unwrap_or_else(|| format!("statement ended in state {other}")),
            ))
        }
    }
}

fn rows_of(data: Option<&Value>) -> Vec<Vec<Value>> {
    data.and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .map(|row| row.as_array().cloned().unwrap_or_default())
                .collect()
        })
        .unwrap_or_default()
}

/// Submits each statement and polls its handle until it settles.
pub struct StatementApiExecutor {
    http: Arc<dyn HttpClient>,
    protocol: StatementProtocol,
    poll_interval: Duration,
    max_polls: u32,
    closed: AtomicBool,
}

impl StatementApiExecutor {
    pub fn new(http: Arc<dyn HttpClient>, protocol: StatementProtocol) -> Self {
        Self {
            http,
            protocol,
            poll_interval: Duration::from_secs(1),
            max_polls: DEFAULT_MAX_POLLS,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls.max(1);
        self
    }

    async fn send(&self, request: HttpRequest) -> Result<StatementPoll, QueryError> {
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|error| QueryError::Transport(error.to_string()))?;
        self.protocol.read(&response)
    }

    async fn run(&self, sql: &str) -> Result<QueryResult, QueryError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueryError::Closed);
        }

        let mut poll = self.send(self.protocol.submit_request(sql)).await?;
        let mut polls = 0;
        loop {
            let handle = match poll {
                StatementPoll::Done(result) => return Ok(result),
                StatementPoll::Pending(handle) => handle,
            };
            if polls >= self.max_polls {
                return Err(QueryError::Transport(format!(
                    "statement {handle} did not finish after {polls} polls"
                )));
            }
            polls += 1;
            debug!(handle = %handle, polls, "statement still running");
            tokio::time::sleep(self.poll_interval).await;
            poll = self.send(self.protocol.poll_request(&handle)).await?;
        }
    }
}

impl QueryExecutor for StatementApiExecutor {
    fn execute<'a>(&'a self, sql: &'a str) -> QueryFuture<'a, QueryResult> {
        Box::pin(self.run(sql))
    }

    fn close<'a>(&'a self) -> QueryFuture<'a, ()> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Release);
            Ok(())
        })
    }
}
