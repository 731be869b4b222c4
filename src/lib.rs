//! DB Gateway MCP Library
//!
//! A safety-gated SQL query gateway for AI assistants. Every statement passes a
//! validator (denylist, single statement, write gate, schema allow-list) before
//! it reaches a pooled connection; results are row-capped and time-bounded.
//! Schema metadata is served from a two-tier cache. Backends: SQL Server,
//! PostgreSQL, MySQL and SQLite.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use error::{DbError, DbResult};
pub use mcp::GatewayService;
