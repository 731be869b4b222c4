//! Error types for the query gateway.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Each error variant provides actionable messages so an AI assistant can understand
//! and recover from the failure (rewrite the query, back off, retry later).

use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// The statement was rejected before any connection was touched.
    #[error("Query rejected: {reason}")]
    Validation { reason: String },

    #[error("Connection pool exhausted: no connection available after {waited_secs}s")]
    PoolExhausted { waited_secs: u64 },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    /// Engine-side failure; `message` is the engine's own text.
    #[error("Database error: {message}")]
    Database {
        message: String,
        /// SQLSTATE for sqlx backends, error number for SQL Server
        code: Option<String>,
        suggestion: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Schema introspection failed: {message}")]
    Introspection { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Never reaches a caller; the schema cache absorbs it.
    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a validation error carrying the rejection reason.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn pool_exhausted(waited: Duration) -> Self {
        Self::PoolExhausted {
            waited_secs: waited.as_secs(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with an optional engine code.
    pub fn database(
        message: impl Into<String>,
        code: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            code,
            suggestion: suggestion.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs: elapsed.as_secs(),
        }
    }

    pub fn introspection(message: impl Into<String>) -> Self {
        Self::Introspection {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
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
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::Validation { .. } => Some("Rewrite the statement as a single read-only query"),
            Self::PoolExhausted { .. } => Some("The server is busy; back off and retry later"),
            Self::Timeout { .. } => {
                Some("Consider narrowing the query or increasing the query timeout")
            }
            Self::Introspection { .. } => {
                Some("Check that the login can read the catalog metadata views")
            }
            _ => None,
        }
    }

    /// Check if this error is transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::PoolExhausted { .. }
        )
    }

    /// Whether a retry could ever change the outcome.
    ///
    /// Rejections and bad arguments are decided before the database is reached.
    pub fn is_deterministic(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::InvalidInput { .. })
    }

    /// Re-tag an engine failure raised while reading the catalog.
    pub fn into_introspection(self) -> Self {
        match self {
            Self::Database { message, code, .. } => Self::introspection(match code {
                Some(code) => format!("{} (code: {})", message, code),
                None => message,
            }),
            other => other,
        }
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
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            // Pool options carry the real wait; the error itself does not.
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted { waited_secs: 0 },
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Restart the gateway")
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
            sqlx::Error::ColumnNotFound(col) => {
                DbError::internal(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Convert SQL Server driver errors to DbError.
impl From<tiberius::error::Error> for DbError {
    fn from(err: tiberius::error::Error) -> Self {
        match err {
            tiberius::error::Error::Server(token) => DbError::database(
                token.message(),
                Some(token.code().to_string()),
                "Check the SQL syntax, object names and permissions",
            ),
            tiberius::error::Error::Io { .. } => DbError::connection(
                err.to_string(),
                "Check network connectivity and SQL Server status",
            ),
            tiberius::error::Error::Tls(msg) => DbError::connection(
                format!("TLS error: {}", msg),
                "Enable trust_server_cert or install the server certificate",
            ),
            tiberius::error::Error::Routing { host, port } => DbError::connection(
                format!("Server requested routing to {}:{}", host, port),
                "Connect to the routed host directly",
            ),
            _ => DbError::internal(format!("SQL Server driver error: {}", err)),
        }
    }
}

impl From<redis::RedisError> for DbError {
    fn from(err: redis::RedisError) -> Self {
        DbError::cache(err.to_string())
    }
}

/// Map a bb8 checkout failure, remembering how long the pool was allowed to wait.
pub fn pool_run_error<E>(err: bb8::RunError<E>, waited: Duration) -> DbError
where
    E: Display,
{
    match err {
        bb8::RunError::TimedOut => DbError::pool_exhausted(waited),
        bb8::RunError::User(e) => DbError::connection(
            format!("Failed to open SQL Server connection: {}", e),
            "Check host, port, credentials and encryption settings",
        ),
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Build suggestion data as JSON value.
fn suggestion_data(suggestion: Option<&str>) -> Option<serde_json::Value> {
    suggestion.map(|s| serde_json::json!({ "suggestion": s }))
}

/// Convert DbError to MCP ErrorData for semantic error categorization.
/// Includes the suggestion field in the `data` object when available.
impl From<DbError> for rmcp::ErrorData {
    fn from(err: DbError) -> Self {
        match &err {
            DbError::Validation { .. } | DbError::InvalidInput { .. } => {
                rmcp::ErrorData::invalid_params(err.to_string(), suggestion_data(err.suggestion()))
            }

            // Engine errors keep their native text; the code goes alongside it
            DbError::Database {
                message,
                code,
                suggestion,
            } => {
                let msg = match code {
                    Some(code) => format!("{} (code: {})", message, code),
                    None => message.clone(),
                };
                let mut data = serde_json::json!({ "suggestion": suggestion });
                if let Some(code) = code {
                    data["code"] = serde_json::Value::String(code.clone());
                }
                rmcp::ErrorData::invalid_params(msg, Some(data))
            }

            DbError::PoolExhausted { .. }
            | DbError::Connection { .. }
            | DbError::Timeout { .. }
            | DbError::Introspection { .. }
            | DbError::Cache { .. }
            | DbError::Internal { .. } => {
                rmcp::ErrorData::internal_error(err.to_string(), suggestion_data(err.suggestion()))
            }
        }
    }
}
