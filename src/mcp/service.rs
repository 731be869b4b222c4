//! MCP service implementation using rmcp.
//!
//! This module defines the GatewayService struct with all gateway tools
//! exposed via the MCP protocol using the rmcp framework's macros. The tool
//! registry is generated once per service instance by `#[tool_router]`.

use crate::cache::SchemaCache;
use crate::db::QueryExecutor;
use crate::models::{ExecutionPlan, QueryResult, ValidationVerdict};
use crate::tools::explain::{ExplainInput, ExplainToolHandler};
use crate::tools::query::{
    ExecuteQueryInput, ParameterizedQueryInput, QueryToolHandler, RelatedTablesInput,
    RelatedTablesOutput, TableSampleInput, ValidateQueryInput,
};
use crate::tools::schema::{
    DatabaseSchemaInput, DatabaseSchemaOutput, RefreshOutput, SchemaToolHandler,
};
use rmcp::Json;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct GatewayService {
    /// Validating executor shared by every session
    executor: Arc<QueryExecutor>,
    /// Process-wide schema cache
    schema_cache: Arc<SchemaCache>,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl GatewayService {
    /// Create a new GatewayService instance.
    ///
    /// # Arguments
    ///
    /// * `executor` - Shared executor for every statement the tools run
    /// * `schema_cache` - Shared schema cache
    pub fn new(executor: Arc<QueryExecutor>, schema_cache: Arc<SchemaCache>) -> Self {
        Self {
            executor,
            schema_cache,
            tool_router: Self::tool_router(),
        }
    }

    fn query_handler(&self) -> QueryToolHandler {
        QueryToolHandler::new(self.executor.clone())
    }

    fn instructions(&self) -> String {
        let write_mode = if self.executor.validator().allows_writes() {
            "enabled"
        } else {
            "disabled (read-only)"
        };
        format!(
            "SQL query gateway for a {} database.\n\
            \n\
            ## Workflow\n\
            1. Call `get_database_schema` to discover tables, columns and foreign keys\n\
            2. Use `validate_sql_query` to check a statement without running it\n\
            3. Run statements with `execute_sql_query`, or `execute_parameterized_query` \
            with `:name` placeholders for any user-supplied value\n\
            4. Use `get_query_execution_plan` to inspect a slow query\n\
            \n\
            ## Rules\n\
            - One statement per call; batches are rejected\n\
            - Block comments, extended procedures, OPENROWSET, OPENDATASOURCE, BULK INSERT \
            and dynamic EXEC are rejected\n\
            - Write operations: {}\n\
            - At most {} rows are returned; `truncated: true` means more rows may exist\n\
            - Call `refresh_schema_cache` after the schema changes",
            self.executor.db_type(),
            write_mode,
            self.executor.limits().max_rows
        )
    }
}

#[tool_router]
impl GatewayService {
    #[tool(
        description = "Get the database schema: tables, columns (type, nullability, primary key) and foreign keys.\nServed from cache. Filter tables with a case-insensitive substring of \"schema.table\"."
    )]
    async fn get_database_schema(
        &self,
        Parameters(input): Parameters<DatabaseSchemaInput>,
    ) -> Result<Json<DatabaseSchemaOutput>, McpError> {
        let handler = SchemaToolHandler::new(self.schema_cache.clone());
        handler
            .get_database_schema(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Execute a single SQL statement and return the rows.\nRows are capped at the configured maximum; `truncated` reports when the cap was reached.\nWrite statements are rejected unless the gateway allows them."
    )]
    async fn execute_sql_query(
        &self,
        Parameters(input): Parameters<ExecuteQueryInput>,
    ) -> Result<Json<QueryResult>, McpError> {
        self.query_handler()
            .execute_sql_query(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Execute a SQL template with named parameters.\nWrite `:name` in the SQL and pass {\"name\": value} in `parameters`. Values are bound by the driver, never spliced into the SQL text."
    )]
    async fn execute_parameterized_query(
        &self,
        Parameters(input): Parameters<ParameterizedQueryInput>,
    ) -> Result<Json<QueryResult>, McpError> {
        self.query_handler()
            .execute_parameterized_query(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Return the first rows of a table.\n`sample_size` defaults to 10 and is clamped to 1..100. `schema_name` defaults to the backend's default schema."
    )]
    async fn get_table_sample(
        &self,
        Parameters(input): Parameters<TableSampleInput>,
    ) -> Result<Json<QueryResult>, McpError> {
        self.query_handler()
            .get_table_sample(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "List foreign keys that reference the table or that the table references."
    )]
    async fn find_related_tables(
        &self,
        Parameters(input): Parameters<RelatedTablesInput>,
    ) -> Result<Json<RelatedTablesOutput>, McpError> {
        self.query_handler()
            .find_related_tables(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Show the engine's estimated execution plan without running the query.\nSQL Server returns SHOWPLAN XML; the other backends return JSON."
    )]
    async fn get_query_execution_plan(
        &self,
        Parameters(input): Parameters<ExplainInput>,
    ) -> Result<Json<ExecutionPlan>, McpError> {
        let handler = ExplainToolHandler::new(self.executor.clone());
        handler
            .explain(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(description = "Drop the cached schema and introspect the database again.")]
    async fn refresh_schema_cache(&self) -> Result<Json<RefreshOutput>, McpError> {
        let handler = SchemaToolHandler::new(self.schema_cache.clone());
        handler
            .refresh_schema_cache()
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Check whether a SQL statement would be accepted, without executing it.\nReturns `allowed` and the rejection `reason`."
    )]
    async fn validate_sql_query(
        &self,
        Parameters(input): Parameters<ValidateQueryInput>,
    ) -> Json<ValidationVerdict> {
        Json(self.query_handler().validate_sql_query(input))
    }
}

#[tool_handler]
impl ServerHandler for GatewayService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "db-gateway-mcp".to_owned(),
                title: Some("DB Gateway MCP".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(self.instructions()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::cache_key;
    use crate::db::{DbPool, ExecutionLimits, PoolSettings, SchemaInspector};
    use crate::models::{ConnectionSettings, DatabaseType};
    use crate::tools::sql_validator::QueryValidator;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    async fn create_test_service(allow_writes: bool) -> GatewayService {
        let path = NamedTempFile::new().unwrap().into_temp_path().keep().unwrap();
        let settings = ConnectionSettings::sqlite(path.to_string_lossy(), false);
        let pool = DbPool::connect(&settings, &PoolSettings::default())
            .await
            .unwrap();

        let validator = QueryValidator::new(DatabaseType::SQLite, allow_writes);
        let limits = ExecutionLimits {
            max_rows: 500,
            query_timeout: Duration::from_secs(5),
        };
        let executor = Arc::new(QueryExecutor::new(pool.clone(), validator, limits));
        let cache = SchemaCache::new(
            Arc::new(SchemaInspector::new(pool)),
            cache_key(DatabaseType::SQLite, &settings.target_label()),
            Duration::from_secs(60),
        );
        GatewayService::new(executor, Arc::new(cache))
    }

    #[tokio::test]
    async fn test_registers_all_tools() {
        let service = create_test_service(false).await;
        let mut names: Vec<String> = service
            .tool_router
            .list_all()
            .into_iter()
            .map(|tool| tool.name.to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "execute_parameterized_query",
                "execute_sql_query",
                "find_related_tables",
                "get_database_schema",
                "get_query_execution_plan",
                "get_table_sample",
                "refresh_schema_cache",
                "validate_sql_query",
            ]
        );
    }

    #[tokio::test]
    async fn test_server_info() {
        let service = create_test_service(false).await;
        let info = service.get_info();
        assert_eq!(info.server_info.name, "db-gateway-mcp");
        assert!(info.capabilities.tools.is_some());

        let instructions = info.instructions.unwrap();
        assert!(instructions.contains("SQLite"));
        assert!(instructions.contains("disabled (read-only)"));
        assert!(instructions.contains("At most 500 rows"));
    }

    #[tokio::test]
    async fn test_instructions_report_write_mode() {
        let service = create_test_service(true).await;
        let instructions = service.get_info().instructions.unwrap();
        assert!(instructions.contains("Write operations: enabled"));
    }
}
