//! Schema tools.
//!
//! This module implements the `get_database_schema` and `refresh_schema_cache`
//! MCP tools. Both read through the [`SchemaCache`]; only a refresh forces a
//! new introspection pass.

use crate::cache::SchemaCache;
use crate::error::DbResult;
use crate::models::{ColumnInfo, ForeignKeyInfo, SchemaSnapshot};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

fn default_true() -> bool {
    true
}

/// Input for the get_database_schema tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DatabaseSchemaInput {
    /// Case-insensitive substring matched against "schema.table"
    #[serde(default)]
    pub table_filter: Option<String>,
    /// Include foreign keys. Default: true
    #[serde(default = "default_true")]
    pub include_relationships: bool,
}

/// One table as returned to the caller.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct TableView {
    pub columns: Vec<ColumnInfo>,
    /// Absent when relationships were not requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreign_keys: Option<Vec<ForeignKeyInfo>>,
}

/// Output from the get_database_schema tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct DatabaseSchemaOutput {
    /// Tables keyed by "schema.table"
    pub tables: BTreeMap<String, TableView>,
    /// Number of tables returned
    pub table_count: usize,
}

/// Output from the refresh_schema_cache tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RefreshOutput {
    pub status: String,
    /// Number of tables in the rebuilt snapshot
    pub tables: usize,
}

/// Project a snapshot through the caller's filter.
pub fn filter_snapshot(
    snapshot: &SchemaSnapshot,
    table_filter: Option<&str>,
    include_relationships: bool,
) -> DatabaseSchemaOutput {
    let needle = table_filter
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_lowercase);

    let tables: BTreeMap<String, TableView> = snapshot
        .tables
        .iter()
        .filter(|(key, _)| match &needle {
            Some(needle) => key.to_lowercase().contains(needle.as_str()),
            None => true,
        })
        .map(|(key, table)| {
            let view = TableView {
                columns: table.columns.clone(),
                foreign_keys: include_relationships.then(|| table.foreign_keys.clone()),
            };
            (key.clone(), view)
        })
        .collect();

    DatabaseSchemaOutput {
        table_count: tables.len(),
        tables,
    }
}

/// Handler for the schema tools.
pub struct SchemaToolHandler {
    schema_cache: Arc<SchemaCache>,
}

impl SchemaToolHandler {
    /// Create a new schema tool handler.
    pub fn new(schema_cache: Arc<SchemaCache>) -> Self {
        Self { schema_cache }
    }

    /// Handle the get_database_schema tool call.
    pub async fn get_database_schema(
        &self,
        input: DatabaseSchemaInput,
    ) -> DbResult<DatabaseSchemaOutput> {
        let snapshot = self.schema_cache.get_full_schema().await?;
        Ok(filter_snapshot(
            &snapshot,
            input.table_filter.as_deref(),
            input.include_relationships,
        ))
    }

    /// Handle the refresh_schema_cache tool call.
    pub async fn refresh_schema_cache(&self) -> DbResult<RefreshOutput> {
        self.schema_cache.invalidate().await;
        let snapshot = self.schema_cache.get_full_schema().await?;
        info!(tables = snapshot.len(), "Schema cache refreshed");
        Ok(RefreshOutput {
            status: "refreshed".to_string(),
            tables: snapshot.len(),
        })
    }
}
