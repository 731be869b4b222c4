//! Query-related data models.
//!
//! This module defines the values passed into the executor and the
//! results it hands back.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Default cap on rows returned by a single statement.
pub const DEFAULT_MAX_ROWS: u32 = 10000;

/// Default execution timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 120;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }
}

/// Named parameters, keyed without the leading colon.
pub type NamedParams = BTreeMap<String, QueryParam>;

/// Input parameter that can be various JSON types.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum QueryParamInput {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Float value
    Float(f64),
    /// String value
    String(String),
}

impl From<QueryParamInput> for QueryParam {
    fn from(input: QueryParamInput) -> Self {
        match input {
            QueryParamInput::Null => QueryParam::Null,
            QueryParamInput::Bool(v) => QueryParam::Bool(v),
            QueryParamInput::Int(v) => QueryParam::Int(v),
            QueryParamInput::Float(v) => QueryParam::Float(v),
            QueryParamInput::String(v) => QueryParam::String(v),
        }
    }
}

/// Outcome of the statement safety check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct ValidationVerdict {
    /// True if the statement may run
    pub allowed: bool,
    /// "OK" when allowed, otherwise why it was rejected
    pub reason: String,
}

impl ValidationVerdict {
    pub fn ok() -> Self {
        Self {
            allowed: true,
            reason: "OK".to_string(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Result of executing a statement.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct QueryResult {
    /// Column names in result order
    pub columns: Vec<String>,
    /// Result rows as column-name to value maps
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    /// Number of rows returned
    pub row_count: usize,
    /// Wall-clock time of the statement itself, in milliseconds (two decimals)
    pub execution_time_ms: f64,
    /// True when the row count reached the configured cap, so more rows may exist
    pub truncated: bool,
}

impl QueryResult {
    /// Assemble a result, deriving the count and truncation flag from the rows.
    pub fn new(
        columns: Vec<String>,
        rows: Vec<serde_json::Map<String, JsonValue>>,
        elapsed: std::time::Duration,
        row_cap: u32,
    ) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
            execution_time_ms: round_ms(elapsed),
            truncated: row_count == row_cap as usize,
        }
    }
}

fn round_ms(elapsed: std::time::Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

/// Encoding of a captured execution plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PlanFormat {
    Xml,
    Json,
}

/// Engine-native execution plan, passed through untouched.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ExecutionPlan {
    /// Raw plan document as produced by the engine
    pub plan_document: String,
    /// Encoding of `plan_document`
    pub format: PlanFormat,
}
