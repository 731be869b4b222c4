//! Data models for the query gateway.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{
    ConnectionSettings, ConnectionSettingsError, DatabaseType, SessionDirective, mask_url,
};
pub use query::{
    DEFAULT_MAX_ROWS, DEFAULT_QUERY_TIMEOUT_SECS, ExecutionPlan, NamedParams, PlanFormat,
    QueryParam, QueryParamInput, QueryResult, ValidationVerdict,
};
pub use schema::{
    ColumnInfo, ColumnRow, ForeignKeyInfo, ForeignKeyRow, SchemaSnapshot, SnapshotBuilder,
    TableInfo, table_key,
};
