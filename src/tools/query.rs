//! Query execution tools.
//!
//! This module implements the tools that run statements through the
//! [`QueryExecutor`]: free-form SQL, named-parameter templates, table sampling,
//! foreign-key lookups and the dry-run validator. Every statement, including
//! the ones generated here, passes the same validation gate.

use crate::db::QueryExecutor;
use crate::error::{DbError, DbResult};
use crate::models::{
    DatabaseType, NamedParams, QueryParam, QueryParamInput, QueryResult, ValidationVerdict,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Default number of rows returned by `get_table_sample`.
pub const DEFAULT_SAMPLE_SIZE: i64 = 10;

/// Upper bound for `get_table_sample`, whatever the caller asks for.
pub const MAX_SAMPLE_SIZE: i64 = 100;

fn default_sample_size() -> i64 {
    DEFAULT_SAMPLE_SIZE
}

/// Input for the execute_sql_query tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExecuteQueryInput {
    /// A single SQL statement. Write statements are rejected unless the gateway allows writes.
    pub query: String,
    /// Optional note on what the query is for; only logged
    #[serde(default)]
    pub description: Option<String>,
}

/// Input for the execute_parameterized_query tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ParameterizedQueryInput {
    /// SQL with `:name` placeholders, e.g. `SELECT * FROM Orders WHERE CustomerId = :id`
    pub query_template: String,
    /// Values keyed by placeholder name (without the colon)
    #[serde(default)]
    pub parameters: BTreeMap<String, QueryParamInput>,
}

/// Input for the get_table_sample tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TableSampleInput {
    /// Table to sample
    pub table_name: String,
    /// Schema of the table. Defaults to the backend's default schema (dbo, public, main).
    #[serde(default)]
    pub schema_name: Option<String>,
    /// Number of rows. Default: 10, clamped to 1..=100
    #[serde(default = "default_sample_size")]
    pub sample_size: i64,
}

/// Input for the find_related_tables tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RelatedTablesInput {
    /// Table whose foreign-key neighbours to list
    pub table_name: String,
}

/// Input for the validate_sql_query tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ValidateQueryInput {
    /// SQL statement to check. Nothing is executed.
    pub query: String,
}

/// Output from the find_related_tables tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RelatedTablesOutput {
    /// The table that was looked up
    pub table_name: String,
    /// One entry per foreign-key column, in either direction
    pub relationships: Vec<serde_json::Map<String, JsonValue>>,
    /// Number of relationships
    pub count: usize,
}

/// Foreign keys leaving or entering `:table_name`, one row per column pair.
///
/// Every variant returns the same seven columns: `fk_name`, `from_schema`,
/// `from_table`, `from_column`, `to_schema`, `to_table`, `to_column`.
fn related_tables_sql(db_type: DatabaseType) -> &'static str {
    match db_type {
        DatabaseType::MsSql => {
            r#"
            SELECT
                fk.name AS fk_name,
                OBJECT_SCHEMA_NAME(fk.parent_object_id) AS from_schema,
                OBJECT_NAME(fk.parent_object_id) AS from_table,
                COL_NAME(fkc.parent_object_id, fkc.parent_column_id) AS from_column,
                OBJECT_SCHEMA_NAME(fk.referenced_object_id) AS to_schema,
                OBJECT_NAME(fk.referenced_object_id) AS to_table,
                COL_NAME(fkc.referenced_object_id, fkc.referenced_column_id) AS to_column
            FROM sys.foreign_keys AS fk
            INNER JOIN sys.foreign_key_columns AS fkc
                ON fk.object_id = fkc.constraint_object_id
            WHERE OBJECT_NAME(fk.parent_object_id) = :table_name
               OR OBJECT_NAME(fk.referenced_object_id) = :table_name
            ORDER BY fk.name, fkc.constraint_column_id
            "#
        }
        DatabaseType::PostgreSQL => {
            r#"
            SELECT
                tc.constraint_name AS fk_name,
                tc.table_schema AS from_schema,
                tc.table_name AS from_table,
                kcu.column_name AS from_column,
                ccu.table_schema AS to_schema,
                ccu.table_name AS to_table,
                ccu.column_name AS to_column
            FROM information_schema.table_constraints AS tc
            INNER JOIN information_schema.key_column_usage AS kcu
                ON tc.constraint_name = kcu.constraint_name
               AND tc.table_schema = kcu.table_schema
            INNER JOIN information_schema.constraint_column_usage AS ccu
                ON tc.constraint_name = ccu.constraint_name
               AND tc.table_schema = ccu.constraint_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
              AND (tc.table_name = :table_name OR ccu.table_name = :table_name)
            ORDER BY tc.constraint_name, kcu.ordinal_position
            "#
        }
        DatabaseType::MySQL => {
            r#"
            SELECT
                CONSTRAINT_NAME AS fk_name,
                TABLE_SCHEMA AS from_schema,
                TABLE_NAME AS from_table,
                COLUMN_NAME AS from_column,
                REFERENCED_TABLE_SCHEMA AS to_schema,
                REFERENCED_TABLE_NAME AS to_table,
                REFERENCED_COLUMN_NAME AS to_column
            FROM information_schema.KEY_COLUMN_USAGE
            WHERE REFERENCED_TABLE_NAME IS NOT NULL
              AND TABLE_SCHEMA = DATABASE()
              AND (TABLE_NAME = :table_name OR REFERENCED_TABLE_NAME = :table_name)
            ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION
            "#
        }
        DatabaseType::SQLite => {
            r#"
            SELECT
                'fk_' || m.name || '_' || p.id AS fk_name,
                'main' AS from_schema,
                m.name AS from_table,
                p."from" AS from_column,
                'main' AS to_schema,
                p."table" AS to_table,
                COALESCE(p."to", '') AS to_column
            FROM sqlite_master AS m, pragma_foreign_key_list(m.name) AS p
            WHERE m.type = 'table'
              AND (m.name = :table_name OR p."table" = :table_name)
            ORDER BY m.name, p.id, p.seq
            "#
        }
    }
}

/// Build the sampling statement for one table.
///
/// Identifiers are quoted for the backend; SQL Server reads without taking
/// shared locks.
pub fn sample_sql(
    db_type: DatabaseType,
    schema_name: Option<&str>,
    table_name: &str,
    sample_size: i64,
) -> String {
    let size = sample_size.clamp(1, MAX_SAMPLE_SIZE);
    let table = match schema_name.or(db_type.default_schema()) {
        Some(schema) => format!(
            "{}.{}",
            db_type.quote_identifier(schema),
            db_type.quote_identifier(table_name)
        ),
        None => db_type.quote_identifier(table_name),
    };

    match db_type {
        DatabaseType::MsSql => format!("SELECT TOP {} * FROM {} WITH (NOLOCK)", size, table),
        _ => format!("SELECT * FROM {} LIMIT {}", table, size),
    }
}

/// Handler for the query tools.
pub struct QueryToolHandler {
    executor: Arc<QueryExecutor>,
}

impl QueryToolHandler {
    /// Create a new query tool handler.
    pub fn new(executor: Arc<QueryExecutor>) -> Self {
        Self { executor }
    }

    /// Handle the execute_sql_query tool call.
    pub async fn execute_sql_query(&self, input: ExecuteQueryInput) -> DbResult<QueryResult> {
        if let Some(description) = input.description.as_deref() {
            info!(description = %description, "Executing ad-hoc query");
        }
        self.executor.execute(&input.query, None).await
    }

    /// Handle the execute_parameterized_query tool call.
    pub async fn execute_parameterized_query(
        &self,
        input: ParameterizedQueryInput,
    ) -> DbResult<QueryResult> {
        let params: NamedParams = input
            .parameters
            .into_iter()
            .map(|(name, value)| (name, QueryParam::from(value)))
            .collect();
        self.executor
            .execute(&input.query_template, Some(&params))
            .await
    }

    /// Handle the get_table_sample tool call.
    pub async fn get_table_sample(&self, input: TableSampleInput) -> DbResult<QueryResult> {
        let table_name = input.table_name.trim();
        if table_name.is_empty() {
            return Err(DbError::invalid_input("table_name is required"));
        }
        let schema_name = input
            .schema_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let sql = sample_sql(
            self.executor.db_type(),
            schema_name,
            table_name,
            input.sample_size,
        );
        self.executor.execute(&sql, None).await
    }

    /// Handle the find_related_tables tool call.
    pub async fn find_related_tables(
        &self,
        input: RelatedTablesInput,
    ) -> DbResult<RelatedTablesOutput> {
        let table_name = input.table_name.trim().to_string();
        if table_name.is_empty() {
            return Err(DbError::invalid_input("table_name is required"));
        }

        let mut params = NamedParams::new();
        params.insert(
            "table_name".to_string(),
            QueryParam::String(table_name.clone()),
        );
        let result = self
            .executor
            .execute(related_tables_sql(self.executor.db_type()), Some(&params))
            .await?;

        Ok(RelatedTablesOutput {
            table_name,
            count: result.row_count,
            relationships: result.rows,
        })
    }

    /// Handle the validate_sql_query tool call. Never touches the database.
    pub fn validate_sql_query(&self, input: ValidateQueryInput) -> ValidationVerdict {
        self.executor.validate(&input.query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::sql_validator::QueryValidator;

    #[test]
    fn test_execute_input_deserialization() {
        let json = r#"{"query": "SELECT 1"}"#;
        let input: ExecuteQueryInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.query, "SELECT 1");
        assert!(input.description.is_none());
    }

    #[test]
    fn test_parameterized_input_deserialization() {
        let json = r#"{
            "query_template": "SELECT * FROM Orders WHERE Id = :id AND Status = :status",
            "parameters": {"id": 42, "status": "open", "note": null}
        }"#;
        let input: ParameterizedQueryInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.parameters.len(), 3);
        assert!(matches!(input.parameters["id"], QueryParamInput::Int(42)));
        assert!(matches!(input.parameters["note"], QueryParamInput::Null));
    }

    #[test]
    fn test_sample_input_defaults() {
        let input: TableSampleInput = serde_json::from_str(r#"{"table_name": "Orders"}"#).unwrap();
        assert_eq!(input.sample_size, DEFAULT_SAMPLE_SIZE);
        assert!(input.schema_name.is_none());
    }

    #[test]
    fn test_sample_sql_per_backend() {
        assert_eq!(
            sample_sql(DatabaseType::MsSql, None, "Orders", 10),
            "SELECT TOP 10 * FROM [dbo].[Orders] WITH (NOLOCK)"
        );
        assert_eq!(
            sample_sql(DatabaseType::PostgreSQL, Some("sales"), "orders", 5),
            r#"SELECT * FROM "sales"."orders" LIMIT 5"#
        );
        assert_eq!(
            sample_sql(DatabaseType::MySQL, None, "orders", 5),
            "SELECT * FROM `orders` LIMIT 5"
        );
        assert_eq!(
            sample_sql(DatabaseType::SQLite, None, "orders", 5),
            r#"SELECT * FROM "main"."orders" LIMIT 5"#
        );
    }

    #[test]
    fn test_sample_size_is_clamped() {
        assert_eq!(
            sample_sql(DatabaseType::MsSql, None, "Orders", 500),
            "SELECT TOP 100 * FROM [dbo].[Orders] WITH (NOLOCK)"
        );
        assert_eq!(
            sample_sql(DatabaseType::SQLite, None, "orders", 0),
            r#"SELECT * FROM "main"."orders" LIMIT 1"#
        );
        assert_eq!(
            sample_sql(DatabaseType::SQLite, None, "orders", -3),
            r#"SELECT * FROM "main"."orders" LIMIT 1"#
        );
    }

    #[test]
    fn test_sample_identifiers_cannot_break_out() {
        let sql = sample_sql(DatabaseType::MsSql, None, "Orders]; DROP TABLE x; --", 10);
        assert_eq!(
            sql,
            "SELECT TOP 10 * FROM [dbo].[Orders]]; DROP TABLE x; --] WITH (NOLOCK)"
        );

        let sql = sample_sql(DatabaseType::SQLite, None, "a\"b", 10);
        assert_eq!(sql, r#"SELECT * FROM "main"."a""b" LIMIT 10"#);
    }

    #[test]
    fn test_generated_statements_pass_validation() {
        for db_type in [
            DatabaseType::MsSql,
            DatabaseType::PostgreSQL,
            DatabaseType::MySQL,
            DatabaseType::SQLite,
        ] {
            let validator = QueryValidator::new(db_type, false);
            let verdict = validator.validate(related_tables_sql(db_type));
            assert!(verdict.allowed, "{}: {}", db_type, verdict.reason);

            let verdict = validator.validate(&sample_sql(db_type, None, "Orders", 10));
            assert!(verdict.allowed, "{}: {}", db_type, verdict.reason);
        }
    }

    #[test]
    fn test_related_tables_output_serialization() {
        let mut row = serde_json::Map::new();
        row.insert("fk_name".to_string(), JsonValue::from("FK_Orders_Customers"));
        let output = RelatedTablesOutput {
            table_name: "Orders".to_string(),
            relationships: vec![row],
            count: 1,
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["count"], 1);
        assert_eq!(json["relationships"][0]["fk_name"], "FK_Orders_Customers");
    }
}
