//! Query execution engine.
//!
//! Every statement is validated first, then run on a single pooled connection
//! under three limits:
//! - a server-side row cap where the engine has one (`SET ROWCOUNT`,
//!   `sql_select_limit`), undone before the connection goes back to the pool
//! - a client-side cap: only the first `max_rows` rows are ever pulled off the wire
//! - a wall-clock timeout around the fetch
//!
//! Transient failures are retried with exponential backoff; rejections and
//! bad arguments never are.
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mssql`: SQL Server via tiberius
//! - `mysql`, `postgres`, `sqlite`: sqlx
//!
//! Each submodule provides identical functionality adapted to the database's driver.

use crate::db::params::{BoundStatement, rewrite_named};
use crate::db::pool::{DbPool, acquire};
use crate::db::retry::{RetryPolicy, retry_with_backoff};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{
    DEFAULT_MAX_ROWS, DEFAULT_QUERY_TIMEOUT_SECS, DatabaseType, ExecutionPlan, NamedParams,
    PlanFormat, QueryResult, SessionDirective, ValidationVerdict,
};
use crate::tools::sql_validator::QueryValidator;
use futures_util::StreamExt;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Row cap and timeout applied to every statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub max_rows: u32,
    pub query_timeout: Duration,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }
}

/// Rows pulled for one attempt and how long the statement itself took.
struct Fetched<R> {
    rows: Vec<R>,
    /// Result-set column names from metadata; used when no rows came back.
    columns: Vec<String>,
    elapsed: Duration,
}

/// Validates, then runs statements against the gateway's pool.
pub struct QueryExecutor {
    pool: DbPool,
    validator: QueryValidator,
    limits: ExecutionLimits,
    retry: RetryPolicy,
}

impl QueryExecutor {
    pub fn new(pool: DbPool, validator: QueryValidator, limits: ExecutionLimits) -> Self {
        Self {
            pool,
            validator,
            limits,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn db_type(&self) -> DatabaseType {
        self.pool.db_type()
    }

    pub fn limits(&self) -> ExecutionLimits {
        self.limits
    }

    pub fn validator(&self) -> &QueryValidator {
        &self.validator
    }

    /// Run the validator without touching the database.
    pub fn validate(&self, sql: &str) -> ValidationVerdict {
        self.validator.validate(sql)
    }

    /// Validate and execute one statement.
    ///
    /// With `params`, `:name` placeholders are rewritten and bound; without,
    /// the text runs as written.
    pub async fn execute(&self, sql: &str, params: Option<&NamedParams>) -> DbResult<QueryResult> {
        self.validator.ensure_allowed(sql)?;

        let bound = match params {
            Some(params) => rewrite_named(sql, self.db_type(), params)?,
            None => BoundStatement::plain(sql),
        };

        debug!(
            db_type = %self.db_type(),
            sql = %bound.sql,
            params = bound.values.len(),
            max_rows = self.limits.max_rows,
            timeout_secs = self.limits.query_timeout.as_secs(),
            "Executing query"
        );

        let result = retry_with_backoff(&self.retry, "query", || self.run_once(&bound)).await?;

        info!(
            db_type = %self.db_type(),
            row_count = result.row_count,
            execution_time_ms = result.execution_time_ms,
            truncated = result.truncated,
            "Query executed"
        );
        if result.truncated {
            warn!(limit = self.limits.max_rows, "Query result reached the row cap");
        }
        Ok(result)
    }

    async fn run_once(&self, bound: &BoundStatement<'_>) -> DbResult<QueryResult> {
        let directive = self.db_type().row_limit_directive(self.limits.max_rows);
        let directive = directive.as_ref();
        let limits = self.limits;

        match &self.pool {
            DbPool::MsSql(p) => {
                let fetched = mssql::fetch_rows(p, bound, directive, limits).await?;
                Ok(process_rows(fetched, limits.max_rows))
            }
            DbPool::MySql(p) => {
                let fetched = mysql::fetch_rows(p, bound, directive, limits).await?;
                Ok(process_rows(fetched, limits.max_rows))
            }
            DbPool::Postgres(p) => {
                let fetched = postgres::fetch_rows(p, bound, limits).await?;
                Ok(process_rows(fetched, limits.max_rows))
            }
            DbPool::SQLite(p) => {
                let fetched = sqlite::fetch_rows(p, bound, limits).await?;
                Ok(process_rows(fetched, limits.max_rows))
            }
        }
    }

    /// Validate the statement and capture the engine's plan without running it.
    ///
    /// Plan capture is not retried.
    pub async fn get_execution_plan(&self, sql: &str) -> DbResult<ExecutionPlan> {
        self.validator.ensure_allowed(sql)?;
        debug!(db_type = %self.db_type(), sql = %sql, "Capturing execution plan");

        let query_timeout = self.limits.query_timeout;
        let plan = match &self.pool {
            DbPool::MsSql(p) => mssql::capture_plan(p, sql, query_timeout).await?,
            DbPool::MySql(p) => mysql::capture_plan(p, sql, query_timeout).await?,
            DbPool::Postgres(p) => postgres::capture_plan(p, sql, query_timeout).await?,
            DbPool::SQLite(p) => sqlite::capture_plan(p, sql, query_timeout).await?,
        };

        info!(
            db_type = %self.db_type(),
            plan_bytes = plan.plan_document.len(),
            "Execution plan captured"
        );
        Ok(plan)
    }
}

/// Turn fetched rows from any database type into a QueryResult.
fn process_rows<R: RowToJson>(fetched: Fetched<R>, row_cap: u32) -> QueryResult {
    let columns = match fetched.rows.first() {
        Some(row) => row.column_names(),
        None => fetched.columns,
    };
    let rows = fetched.rows.iter().map(|r| r.to_json_map()).collect();
    QueryResult::new(columns, rows, fetched.elapsed, row_cap)
}

// =============================================================================
// Common Helper Functions
// =============================================================================

fn collect_rows<R, E>(results: Vec<Result<R, E>>) -> DbResult<Vec<R>>
where
    DbError: From<E>,
{
    let mut rows = Vec::with_capacity(results.len());
    for result in results {
        rows.push(result.map_err(DbError::from)?);
    }
    Ok(rows)
}

/// Column names the engine reports for `sql`, without running it.
///
/// Statements that return no result set describe to no columns.
fn described_columns<'c, E>(
    conn: E,
    sql: &'c str,
) -> impl std::future::Future<Output = Vec<String>> + Send + 'c
where
    E: sqlx::Executor<'c>,
{
    let describe = conn.describe(sql);
    async move {
        match describe.await {
            Ok(described) => described
                .columns()
                .iter()
                .map(|c| sqlx::Column::name(c).to_string())
                .collect(),
            Err(e) => {
                debug!(error = %e, "Could not describe result columns");
                Vec::new()
            }
        }
    }
}

fn timeout_error(operation: &str, timeout: Duration) -> DbError {
    DbError::timeout(operation, timeout)
}

fn single_plan(document: Option<String>) -> DbResult<String> {
    document.ok_or_else(|| DbError::internal("The engine returned no execution plan"))
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

mod mssql {
    use super::*;
    use crate::db::params::bind_mssql_param;
    use crate::db::pool::MsSqlPool;

    pub async fn fetch_rows(
        pool: &MsSqlPool,
        bound: &BoundStatement<'_>,
        directive: Option<&SessionDirective>,
        limits: ExecutionLimits,
    ) -> DbResult<Fetched<tiberius::Row>> {
        let mut conn = pool.checkout().await?;

        if let Some(directive) = directive {
            conn.simple_query(directive.apply.as_str())
                .await?
                .into_results()
                .await?;
        }

        let start = Instant::now();
        let outcome = timeout(limits.query_timeout, async {
            let mut stream = if bound.values.is_empty() {
                conn.simple_query(bound.sql.as_str()).await?
            } else {
                let mut query = tiberius::Query::new(bound.sql.as_str());
                for value in &bound.values {
                    bind_mssql_param(&mut query, value);
                }
                query.query(&mut *conn).await?
            };
            // Metadata arrives ahead of the rows, even for an empty result set
            let columns: Vec<String> = stream
                .columns()
                .await?
                .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
                .unwrap_or_default();
            let results = stream
                .into_row_stream()
                .take(limits.max_rows as usize)
                .collect::<Vec<_>>()
                .await;
            Ok::<_, DbError>((columns, collect_rows(results)?))
        })
        .await;
        let elapsed = start.elapsed();

        // The reset drains whatever the capped stream left unread
        if let Some(directive) = directive {
            let reset = timeout(limits.query_timeout, async {
                conn.simple_query(directive.reset).await?.into_results().await
            })
            .await;
            match reset {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "Failed to reset row cap on connection"),
                Err(_) => warn!("Timed out resetting row cap on connection"),
            }
        }

        match outcome {
            Ok(fetched) => {
                let (columns, rows) = fetched?;
                Ok(Fetched {
                    rows,
                    columns,
                    elapsed,
                })
            }
            Err(_) => Err(timeout_error("query execution", limits.query_timeout)),
        }
    }

    pub async fn capture_plan(
        pool: &MsSqlPool,
        sql: &str,
        query_timeout: Duration,
    ) -> DbResult<ExecutionPlan> {
        let mut conn = pool.checkout().await?;

        conn.simple_query("SET SHOWPLAN_XML ON")
            .await?
            .into_results()
            .await?;

        let outcome = timeout(query_timeout, async {
            let row = conn.simple_query(sql).await?.into_row().await?;
            let document = match row {
                Some(r) => r.try_get::<&str, _>(0)?.map(str::to_string),
                None => None,
            };
            Ok::<_, DbError>(document)
        })
        .await;

        // Always switch plan mode off, whatever happened above
        match conn.simple_query("SET SHOWPLAN_XML OFF").await {
            Ok(stream) => {
                if let Err(e) = stream.into_results().await {
                    warn!(error = %e, "Failed to switch SHOWPLAN_XML off");
                }
            }
            Err(e) => warn!(error = %e, "Failed to switch SHOWPLAN_XML off"),
        }

        let document = match outcome {
            Ok(document) => document?,
            Err(_) => return Err(timeout_error("execution plan", query_timeout)),
        };
        Ok(ExecutionPlan {
            plan_document: single_plan(document)?,
            format: PlanFormat::Xml,
        })
    }
}

mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_param;
    use sqlx::mysql::MySqlRow;
    use sqlx::{Executor, MySqlPool, Row};

    pub async fn fetch_rows(
        pool: &MySqlPool,
        bound: &BoundStatement<'_>,
        directive: Option<&SessionDirective>,
        limits: ExecutionLimits,
    ) -> DbResult<Fetched<MySqlRow>> {
        let mut conn = acquire(pool).await?;

        if let Some(directive) = directive {
            (&mut *conn).execute(directive.apply.as_str()).await?;
        }

        let start = Instant::now();
        let rows_future = if bound.values.is_empty() {
            let stream = (&mut *conn).fetch(bound.sql.as_str());
            stream.take(limits.max_rows as usize).collect::<Vec<_>>()
        } else {
            let mut query = sqlx::query(&bound.sql);
            for value in &bound.values {
                query = bind_mysql_param(query, value);
            }
            let stream = query.fetch(&mut *conn);
            stream.take(limits.max_rows as usize).collect::<Vec<_>>()
        };
        let outcome = timeout(limits.query_timeout, rows_future).await;
        let elapsed = start.elapsed();

        let results = match outcome {
            Ok(results) => results,
            Err(_) => {
                // Mid-statement connection; never hand it back to the pool
                drop(conn.detach());
                return Err(timeout_error("query execution", limits.query_timeout));
            }
        };

        let rows = collect_rows(results);
        let columns = match &rows {
            Ok(rows) if rows.is_empty() => described_columns(&mut *conn, &bound.sql).await,
            _ => Vec::new(),
        };

        if let Some(directive) = directive {
            if let Err(e) = (&mut *conn).execute(directive.reset).await {
                warn!(error = %e, "Failed to reset row cap, discarding connection");
                drop(conn.detach());
            }
        }

        Ok(Fetched {
            rows: rows?,
            columns,
            elapsed,
        })
    }

    pub async fn capture_plan(
        pool: &MySqlPool,
        sql: &str,
        query_timeout: Duration,
    ) -> DbResult<ExecutionPlan> {
        let explain_sql = format!("EXPLAIN FORMAT=JSON {}", sql);
        let mut conn = acquire(pool).await?;
        let row = match timeout(query_timeout, (&mut *conn).fetch_optional(explain_sql.as_str())).await {
            Ok(row) => row?,
            Err(_) => return Err(timeout_error("execution plan", query_timeout)),
        };
        let document = row.and_then(|r| r.try_get::<String, _>(0).ok());
        Ok(ExecutionPlan {
            plan_document: single_plan(document)?,
            format: PlanFormat::Json,
        })
    }
}

mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_param;
    use sqlx::postgres::PgRow;
    use sqlx::{Executor, PgPool, Row};

    pub async fn fetch_rows(
        pool: &PgPool,
        bound: &BoundStatement<'_>,
        limits: ExecutionLimits,
    ) -> DbResult<Fetched<PgRow>> {
        let mut conn = acquire(pool).await?;

        let start = Instant::now();
        let rows_future = if bound.values.is_empty() {
            let stream = (&mut *conn).fetch(bound.sql.as_str());
            stream.take(limits.max_rows as usize).collect::<Vec<_>>()
        } else {
            let mut query = sqlx::query(&bound.sql);
            for value in &bound.values {
                query = bind_postgres_param(query, value);
            }
            let stream = query.fetch(&mut *conn);
            stream.take(limits.max_rows as usize).collect::<Vec<_>>()
        };
        let outcome = timeout(limits.query_timeout, rows_future).await;
        let elapsed = start.elapsed();

        match outcome {
            Ok(results) => {
                let rows = collect_rows(results)?;
                let columns = if rows.is_empty() {
                    described_columns(&mut *conn, &bound.sql).await
                } else {
                    Vec::new()
                };
                Ok(Fetched {
                    rows,
                    columns,
                    elapsed,
                })
            }
            Err(_) => {
                drop(conn.detach());
                Err(timeout_error("query execution", limits.query_timeout))
            }
        }
    }

    pub async fn capture_plan(
        pool: &PgPool,
        sql: &str,
        query_timeout: Duration,
    ) -> DbResult<ExecutionPlan> {
        let explain_sql = format!("EXPLAIN (FORMAT JSON) {}", sql);
        let mut conn = acquire(pool).await?;
        let row = match timeout(query_timeout, (&mut *conn).fetch_optional(explain_sql.as_str())).await {
            Ok(row) => row?,
            Err(_) => return Err(timeout_error("execution plan", query_timeout)),
        };
        let document = row.and_then(|r| {
            r.try_get::<serde_json::Value, _>(0)
                .map(|v| v.to_string())
                .or_else(|_| r.try_get::<String, _>(0))
                .ok()
        });
        Ok(ExecutionPlan {
            plan_document: single_plan(document)?,
            format: PlanFormat::Json,
        })
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use sqlx::sqlite::SqliteRow;
    use sqlx::{Executor, SqlitePool};

    pub async fn fetch_rows(
        pool: &SqlitePool,
        bound: &BoundStatement<'_>,
        limits: ExecutionLimits,
    ) -> DbResult<Fetched<SqliteRow>> {
        let mut conn = acquire(pool).await?;

        let start = Instant::now();
        let rows_future = if bound.values.is_empty() {
            let stream = (&mut *conn).fetch(bound.sql.as_str());
            stream.take(limits.max_rows as usize).collect::<Vec<_>>()
        } else {
            let mut query = sqlx::query(&bound.sql);
            for value in &bound.values {
                query = bind_sqlite_param(query, value);
            }
            let stream = query.fetch(&mut *conn);
            stream.take(limits.max_rows as usize).collect::<Vec<_>>()
        };
        let outcome = timeout(limits.query_timeout, rows_future).await;
        let elapsed = start.elapsed();

        match outcome {
            Ok(results) => {
                let rows = collect_rows(results)?;
                let columns = if rows.is_empty() {
                    described_columns(&mut *conn, &bound.sql).await
                } else {
                    Vec::new()
                };
                Ok(Fetched {
                    rows,
                    columns,
                    elapsed,
                })
            }
            Err(_) => {
                drop(conn.detach());
                Err(timeout_error("query execution", limits.query_timeout))
            }
        }
    }

    /// SQLite has no structured plan output; the `EXPLAIN QUERY PLAN` rows
    /// are returned as a JSON array.
    pub async fn capture_plan(
        pool: &SqlitePool,
        sql: &str,
        query_timeout: Duration,
    ) -> DbResult<ExecutionPlan> {
        let explain_sql = format!("EXPLAIN QUERY PLAN {}", sql);
        let mut conn = acquire(pool).await?;
        let rows = match timeout(query_timeout, (&mut *conn).fetch_all(explain_sql.as_str())).await {
            Ok(rows) => rows?,
            Err(_) => return Err(timeout_error("execution plan", query_timeout)),
        };
        let steps: Vec<serde_json::Value> = rows
            .iter()
            .map(|r| serde_json::Value::Object(r.to_json_map()))
            .collect();
        let document = serde_json::to_string(&steps)
            .map_err(|e| DbError::internal(format!("Failed to encode plan: {}", e)))?;
        Ok(ExecutionPlan {
            plan_document: document,
            format: PlanFormat::Json,
        })
    }
}
