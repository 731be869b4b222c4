//! MCP tool implementations.
//!
//! This module contains all gateway tool handlers:
//! - `query`: ad-hoc and parameterized queries, table samples, related tables, dry-run validation
//! - `explain`: execution plan capture
//! - `schema`: cached schema lookup and refresh
//! - `sql_validator`: the statement safety gate every query passes through

pub mod explain;
pub mod query;
pub mod schema;
pub mod sql_validator;

pub use explain::{ExplainInput, ExplainToolHandler};
pub use query::{
    ExecuteQueryInput, ParameterizedQueryInput, QueryToolHandler, RelatedTablesInput,
    RelatedTablesOutput, TableSampleInput, ValidateQueryInput,
};
pub use schema::{DatabaseSchemaInput, DatabaseSchemaOutput, RefreshOutput, SchemaToolHandler};
pub use sql_validator::{QueryValidator, StatementKind};
