//! Embedded `DuckDB` channel.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ::duckdb::types::Value as DuckValue;
use ::duckdb::{Connection, Statement, ToSql};
use serde_json::{Number, Value};

use super::{QueryExecutor, QueryFuture, QueryResult, SqlColumn};
use crate::error::QueryError;

/// Single connection shared by one storage. Statements run on the blocking pool.
#[derive(Clone)]
pub struct DuckDbExecutor {
    db_path: PathBuf,
    connection: Arc<Mutex<Option<Connection>>>,
}

impl DuckDbExecutor {
    /// Opens (creating if needed) the database file and its parent directory.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, QueryError> {
        let db_path = path.into();
        if let Some(parent) = db_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|error| {
                QueryError::Transport(format!("cannot create {}: {error}", parent.display()))
            })?;
        }

        let connection = Connection::open(&db_path)?;
        connection.execute_batch("PRAGMA disable_progress_bar;")?;
        Ok(Self {
            db_path,
            connection: Arc::new(Mutex::new(Some(connection))),
        })
    }

    pub fn in_memory() -> Result<Self, QueryError> {
        let connection = Connection::open_in_memory()?;
        Ok(Self {
            db_path: PathBuf::from(":memory:"),
            connection: Arc::new(Mutex::new(Some(connection))),
        })
    }

    pub fn db_path(&self) -> &Path {
        self.db_path.as_path()
    }

    async fn with_connection<T, F>(&self, work: F) -> Result<T, QueryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, QueryError> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let guard = connection.lock().expect("duckdb connection mutex poisoned");
            let connection = guard.as_ref().ok_or(QueryError::Closed)?;
            work(connection)
        })
        .await
        .map_err(|error| QueryError::Transport(format!("duckdb task failed: {error}")))?
    }
}

impl QueryExecutor for DuckDbExecutor {
    fn execute<'a>(&'a self, sql: &'a str) -> QueryFuture<'a, QueryResult> {
        let sql = sql.to_owned();
        Box::pin(self.with_connection(move |connection| run_statement(connection, &sql)))
    }

    fn execute_transaction<'a>(&'a self, statements: &'a [String]) -> QueryFuture<'a, ()> {
        let statements = statements.to_vec();
        Box::pin(self.with_connection(move |connection| {
            connection.execute_batch("BEGIN TRANSACTION")?;
            let result = statements
                .iter()
                .try_for_each(|statement| connection.execute_batch(statement).map_err(QueryError::from));
            finalize_transaction(connection, result)
        }))
    }

    fn close<'a>(&'a self) -> QueryFuture<'a, ()> {
        let connection = Arc::clone(&self.connection);
        Box::pin(async move {
            let taken = connection
                .lock()
                .expect("duckdb connection mutex poisoned")
                .take();
            match taken {
                Some(connection) => connection.close().map_err(|(_, error)| QueryError::from(error)),
                None => Ok(()),
            }
        })
    }
}

fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, QueryError>,
) -> Result<T, QueryError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn run_statement(connection: &Connection, sql: &str) -> Result<QueryResult, QueryError> {
    if !returns_rows(sql) {
        connection.execute_batch(sql)?;
        return Ok(QueryResult::default());
    }

    let mut statement = connection.prepare(sql)?;
    let mut cursor = statement.query([] as [&dyn ToSql; 0])?;
    let columns = cursor.as_ref().map(describe_columns).unwrap_or_default();

    let mut rows = Vec::new();
    while let Some(row) = cursor.next()? {
        let mut output = Vec::with_capacity(columns.len());
        for index in 0..columns.len() {
            let value: DuckValue = row.get(index)?;
            output.push(to_json_value(value));
        }
        rows.push(output);
    }

    Ok(QueryResult::from_rows(columns, rows))
}

fn describe_columns(statement: &Statement<'_>) -> Vec<SqlColumn> {
    (0..statement.column_count())
        .map(|index| SqlColumn {
            name: statement
                .column_name(index)
                .map_or_else(|_| format!("column_{index}"), ToString::to_string),
            r#type: statement.column_type(index).to_string(),
        })
        .collect()
}

fn returns_rows(sql: &str) -> bool {
    let first_keyword = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    matches!(
        first_keyword.as_str(),
        "SELECT" | "WITH" | "DESCRIBE" | "SHOW" | "PRAGMA"
    )
}

fn to_json_value(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(value) => Value::Bool(value),
        DuckValue::TinyInt(value) => Value::Number(Number::from(value)),
        DuckValue::SmallInt(value) => Value::Number(Number::from(value)),
        DuckValue::Int(value) => Value::Number(Number::from(value)),
        DuckValue::BigInt(value) => Value::Number(Number::from(value)),
        DuckValue::UTinyInt(value) => Value::Number(Number::from(value)),
        DuckValue::USmallInt(value) => Value::Number(Number::from(value)),
        DuckValue::UInt(value) => Value::Number(Number::from(value)),
        DuckValue::UBigInt(value) => Value::Number(Number::from(value)),
        DuckValue::Float(value) => number_from_f64(f64::from(value)),
        DuckValue::Double(value) => number_from_f64(value),
        DuckValue::Text(value) => Value::String(value),
        DuckValue::Blob(value) => Value::String(hex::encode(value)),
        other => Value::String(format!("{other:?}")),
    }
}

fn number_from_f64(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}
