//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection pool management (SQL Server via bb8, the rest via sqlx)
//! - Named parameter binding
//! - Bounded retry of transient failures
//! - Query execution and plan capture
//! - Schema introspection
//! - Type mappings

pub mod executor;
pub mod params;
pub mod pool;
pub mod retry;
pub mod schema;
pub mod types;

pub use executor::{ExecutionLimits, QueryExecutor};
pub use pool::{DbPool, PoolSettings};
pub use retry::RetryPolicy;
pub use schema::{SchemaInspector, SchemaSource};
