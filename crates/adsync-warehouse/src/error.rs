use thiserror::Error;

use crate::storage::StorageState;

/// Failure of one statement on a warehouse channel.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error("statement failed [{code}]: {message}")]
    Statement { code: String, message: String },

    #[error("warehouse transport failed: {0}")]
    Transport(String),

    #[error("connection is closed")]
    Closed,
}

impl QueryError {
    pub fn statement(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Statement {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Storage-level failures.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Unmappable semantic type or failed DDL. The table keeps every change that
    /// committed before the failure.
    #[error("schema error on {table}: {message}")]
    Schema { table: String, message: String },

    /// Staging or merge failure. Buffered records are kept for a retry.
    #[error("write to {table} failed: {message}")]
    Write {
        table: String,
        staging: Option<String>,
        message: String,
    },

    #[error("storage is {state}, cannot {operation}")]
    Lifecycle {
        state: StorageState,
        operation: &'static str,
    },

    #[error("invalid storage configuration: {0}")]
    Configuration(String),
}

impl StorageError {
    pub fn schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn write(table: impl Into<String>, staging: Option<String>, message: impl Into<String>) -> Self {
        Self::Write {
            table: table.into(),
            staging,
            message: message.into(),
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::Schema { .. } => "storage.schema",
            Self::Write { .. } => "storage.write",
            Self::Lifecycle { .. } => "storage.lifecycle",
            Self::Configuration(_) => "storage.configuration",
        }
    }
}
