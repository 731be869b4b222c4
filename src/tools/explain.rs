//! Query execution plan tool.
//!
//! This module implements the `get_query_execution_plan` MCP tool. The plan is
//! captured without running the statement and returned as the engine produced
//! it: SHOWPLAN XML for SQL Server, JSON for the other backends.

use crate::db::QueryExecutor;
use crate::error::{DbError, DbResult};
use crate::models::ExecutionPlan;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;

/// Input for the get_query_execution_plan tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExplainInput {
    /// SQL statement to explain. It must pass the same validation as an executed query.
    pub query: String,
}

/// Handler for the explain tool.
pub struct ExplainToolHandler {
    executor: Arc<QueryExecutor>,
}

impl ExplainToolHandler {
    pub fn new(executor: Arc<QueryExecutor>) -> Self {
        Self { executor }
    }

    /// Handle the get_query_execution_plan tool call.
    pub async fn explain(&self, input: ExplainInput) -> DbResult<ExecutionPlan> {
        if input.query.trim().is_empty() {
            return Err(DbError::invalid_input("SQL statement is required"));
        }
        self.executor.get_execution_plan(&input.query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explain_input_deserialization() {
        let input: ExplainInput =
            serde_json::from_str(r#"{"query": "SELECT * FROM Orders"}"#).unwrap();
        assert_eq!(input.query, "SELECT * FROM Orders");
    }

    #[test]
    fn test_explain_input_requires_query() {
        assert!(serde_json::from_str::<ExplainInput>("{}").is_err());
    }
}
