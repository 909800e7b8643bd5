//! Error types for the database manager.
//!
//! Every failure the manager can report is a [`DbError`] variant built with
//! `thiserror`. Errors are returned to the immediate caller; nothing in the
//! core logs and swallows them.

use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by query hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("connection: {connection} did not register yet")]
    UnregisteredConnection { connection: String },

    #[error("connection: {connection} {operation}() timeout after {timeout_ms}ms, pool may be empty")]
    PoolTimeout {
        connection: String,
        /// "checkout" for transient handles, "defer" for task leases.
        operation: String,
        timeout_ms: u64,
    },

    #[error("Execution failed: {message}")]
    Execution {
        message: String,
        /// e.g., "42S02" for an unknown table
        sql_state: Option<String>,
        suggestion: String,
    },

    /// The hook's own error is kept as the source.
    #[error("Query hook failed: {source}")]
    Hook {
        #[source]
        source: BoxError,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an unregistered connection error.
    pub fn unregistered(connection: impl Into<String>) -> Self {
        Self::UnregisteredConnection {
            connection: connection.into(),
        }
    }

    /// Create a pool timeout error for the given acquisition operation.
    pub fn pool_timeout(
        connection: impl Into<String>,
        operation: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self::PoolTimeout {
            connection: connection.into(),
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create an execution error with optional SQL state.
    pub fn execution(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Execution {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Wrap an error raised by a query hook.
    pub fn hook(err: BoxError) -> Self {
        Self::Hook { source: err }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a statement timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Execution { suggestion, .. } => Some(suggestion),
            Self::PoolTimeout { .. } => {
                Some("Retry with a longer timeout or raise max_connections for this connection")
            }
            _ => None,
        }
    }

    /// Check if the caller may retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PoolTimeout { .. } | Self::Connection { .. } | Self::Timeout { .. }
        )
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::execution(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::execution(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::PoolTimeout {
                connection: "unknown".to_string(),
                operation: "acquire".to_string(),
                timeout_ms: 0,
            },
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reset the pool and retry")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => DbError::execution(
                format!("Column not found: {}", col),
                None,
                "Check the selected column names",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
