//! SQL statement validation.
//!
//! Every statement passes through [`QueryValidator`] before it may touch a
//! connection. The checks run cheapest first and stop at the first failure:
//!
//! 1. pattern denylist over the raw text (applies even when writes are allowed)
//! 2. parse with the backend's dialect
//! 3. exactly one statement
//! 4. write gate on the statement kind (skipped when writes are allowed)
//! 5. allowed-schema list on every schema-qualified relation (skipped when empty)
//!
//! Uses [sqlparser](https://docs.rs/sqlparser/) so classification follows the
//! parsed statement structure rather than keywords in the text.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, ValidationVerdict};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::ast::{Query, SetExpr, Statement, visit_relations};
use sqlparser::dialect::{Dialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use std::fmt;
use std::ops::ControlFlow;
use tracing::debug;

/// Top-level kind of a parsed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Drop,
    Create,
    Alter,
    Truncate,
    Merge,
    Other,
}

impl StatementKind {
    /// Kinds refused while write operations are disabled.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Insert
                | Self::Update
                | Self::Delete
                | Self::Drop
                | Self::Create
                | Self::Alter
                | Self::Truncate
                | Self::Merge
        )
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Select => "Select",
            Self::Insert => "Insert",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Drop => "Drop",
            Self::Create => "Create",
            Self::Alter => "Alter",
            Self::Truncate => "Truncate",
            Self::Merge => "Merge",
            Self::Other => "Other",
        };
        f.write_str(name)
    }
}

/// A dangerous construct recognized on the raw text.
struct DeniedPattern {
    name: &'static str,
    regex: Regex,
}

fn denied(name: &'static str, pattern: &str) -> DeniedPattern {
    DeniedPattern {
        name,
        regex: Regex::new(pattern).expect("Invalid regex: denylist pattern"),
    }
}

/// Case-insensitive, `.` spans newlines.
static DENYLIST: Lazy<Vec<DeniedPattern>> = Lazy::new(|| {
    vec![
        denied("extended stored procedure (xp_*)", r"(?is)\bxp_\w+\b"),
        denied("OPENROWSET", r"(?is)\bOPENROWSET\b"),
        denied("OPENDATASOURCE", r"(?is)\bOPENDATASOURCE\b"),
        denied("BULK INSERT", r"(?is)\bBULK\s+INSERT\b"),
        denied("dynamic EXEC(...)", r"(?is)\bEXEC(?:UTE)?\s*\("),
        denied("sp_executesql", r"(?is)\bsp_executesql\b"),
        denied("block comment /* */", r"(?is)/\*.*?\*/"),
    ]
});

/// Catalog schemas that stay reachable whatever the allowed-schema list says.
const CATALOG_SCHEMAS: &[&str] = &["information_schema", "sys", "pg_catalog"];

/// Get the appropriate SQL dialect for the given database type.
fn get_dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::MsSql => Box::new(MsSqlDialect {}),
        DatabaseType::PostgreSQL => Box::new(PostgreSqlDialect {}),
        DatabaseType::MySQL => Box::new(MySqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

/// Stateless statement gate. Cheap to clone and safe to share across tasks.
#[derive(Debug, Clone)]
pub struct QueryValidator {
    db_type: DatabaseType,
    allow_writes: bool,
    /// Lowercased; empty means unrestricted
    allowed_schemas: Vec<String>,
}

impl QueryValidator {
    pub fn new(db_type: DatabaseType, allow_writes: bool) -> Self {
        Self {
            db_type,
            allow_writes,
            allowed_schemas: Vec::new(),
        }
    }

    /// Restrict schema-qualified relations to the given schemas.
    pub fn with_allowed_schemas<I, S>(mut self, schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_schemas = schemas
            .into_iter()
            .map(|s| s.as_ref().trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    pub fn allows_writes(&self) -> bool {
        self.allow_writes
    }

    /// Decide whether `sql` may run.
    ///
    /// # Examples
    ///
    /// ```
    /// use db_gateway_mcp::models::DatabaseType;
    /// use db_gateway_mcp::tools::sql_validator::QueryValidator;
    ///
    /// let validator = QueryValidator::new(DatabaseType::MsSql, false);
    /// assert!(validator.validate("SELECT * FROM Users WHERE Id = 1").allowed);
    /// assert!(!validator.validate("DROP TABLE Users").allowed);
    /// ```
    pub fn validate(&self, sql: &str) -> ValidationVerdict {
        match self.check(sql) {
            Ok(_) => ValidationVerdict::ok(),
            Err(reason) => {
                debug!(db_type = %self.db_type, reason = %reason, "Statement rejected");
                ValidationVerdict::rejected(reason)
            }
        }
    }

    /// Like [`validate`](Self::validate), but as a `DbResult` carrying the statement kind.
    pub fn ensure_allowed(&self, sql: &str) -> DbResult<StatementKind> {
        self.check(sql).map_err(DbError::validation)
    }

    fn check(&self, sql: &str) -> Result<StatementKind, String> {
        if let Some(pattern) = DENYLIST.iter().find(|p| p.regex.is_match(sql)) {
            return Err(format!("Blocked pattern: {}", pattern.name));
        }

        let dialect = get_dialect(self.db_type);
        let statements = Parser::parse_sql(dialect.as_ref(), sql)
            .map_err(|e| format!("Parse error: {}", e))?;

        let statement = match statements.as_slice() {
            [] => return Err("Parse error: empty statement".to_string()),
            [single] => single,
            _ => return Err("Multiple statements not allowed".to_string()),
        };

        let kind = classify_statement(statement);
        if !self.allow_writes && kind.is_write() {
            return Err(format!("Write operation '{}' is disabled", kind));
        }

        if !self.allowed_schemas.is_empty() {
            if let Some(schema) = self.first_disallowed_schema(statement) {
                return Err(format!(
                    "Schema '{}' is not in the allowed schema list",
                    schema
                ));
            }
        }

        Ok(kind)
    }

    fn first_disallowed_schema(&self, statement: &Statement) -> Option<String> {
        let flow = visit_relations(statement, |relation| {
            let parts: Vec<String> = relation
                .0
                .iter()
                .map(|part| unquote(&part.to_string()))
                .collect();
            if parts.len() < 2 {
                return ControlFlow::Continue(());
            }
            let schema = &parts[parts.len() - 2];
            let lower = schema.to_lowercase();
            if CATALOG_SCHEMAS.contains(&lower.as_str()) || self.allowed_schemas.contains(&lower) {
                ControlFlow::Continue(())
            } else {
                ControlFlow::Break(schema.clone())
            }
        });
        match flow {
            ControlFlow::Break(schema) => Some(schema),
            ControlFlow::Continue(()) => None,
        }
    }
}

/// Strip one layer of identifier quoting: `[x]`, `"x"` or `` `x` ``.
fn unquote(ident: &str) -> String {
    let bytes = ident.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if matches!((first, last), (b'[', b']') | (b'"', b'"') | (b'`', b'`')) {
            return ident[1..ident.len() - 1].to_string();
        }
    }
    ident.to_string()
}

/// Classify a parsed statement by its structural kind.
pub fn classify_statement(stmt: &Statement) -> StatementKind {
    match stmt {
        Statement::Query(query) => classify_query(query),

        // EXPLAIN ANALYZE runs its statement, so judge what is inside
        Statement::Explain { statement, .. } => classify_statement(statement),

        Statement::Insert(_) | Statement::Copy { .. } => StatementKind::Insert,
        Statement::Update { .. } => StatementKind::Update,
        Statement::Delete(_) => StatementKind::Delete,
        Statement::Merge { .. } => StatementKind::Merge,

        Statement::Drop { .. }
        | Statement::DropFunction { .. }
        | Statement::DropProcedure { .. }
        | Statement::DropTrigger { .. }
        | Statement::DropSecret { .. }
        | Statement::DropPolicy { .. }
        | Statement::DropConnector { .. } => StatementKind::Drop,

        Statement::CreateTable { .. }
        | Statement::CreateView { .. }
        | Statement::CreateIndex(_)
        | Statement::CreateSchema { .. }
        | Statement::CreateDatabase { .. }
        | Statement::CreateSequence { .. }
        | Statement::CreateType { .. }
        | Statement::CreateFunction { .. }
        | Statement::CreateProcedure { .. }
        | Statement::CreateTrigger { .. }
        | Statement::CreateRole { .. }
        | Statement::CreateSecret { .. }
        | Statement::CreateStage { .. }
        | Statement::CreateVirtualTable { .. }
        | Statement::CreateExtension { .. }
        | Statement::CreatePolicy { .. }
        | Statement::CreateConnector { .. } => StatementKind::Create,

        Statement::AlterTable { .. }
        | Statement::AlterView { .. }
        | Statement::AlterIndex { .. }
        | Statement::AlterSchema { .. }
        | Statement::AlterRole { .. }
        | Statement::AlterPolicy { .. }
        | Statement::AlterType { .. }
        | Statement::AlterConnector { .. } => StatementKind::Alter,

        Statement::Truncate { .. } => StatementKind::Truncate,

        _ => StatementKind::Other,
    }
}

/// A write in any CTE or set-operation branch makes the whole query a write.
fn classify_query(query: &Query) -> StatementKind {
    let ctes = query.with.iter().flat_map(|with| with.cte_tables.iter());
    for cte in ctes {
        let kind = classify_query(&cte.query);
        if kind.is_write() {
            return kind;
        }
    }
    classify_set_expr(&query.body)
}

fn classify_set_expr(body: &SetExpr) -> StatementKind {
    match body {
        // SELECT ... INTO creates a table
        SetExpr::Select(select) if select.into.is_some() => StatementKind::Create,
        SetExpr::Query(inner) => classify_query(inner),
        SetExpr::SetOperation { left, right, .. } => {
            let left = classify_set_expr(left);
            if left.is_write() {
                left
            } else {
                classify_set_expr(right)
            }
        }
        SetExpr::Insert(stmt)
        | SetExpr::Update(stmt)
        | SetExpr::Delete(stmt)
        | SetExpr::Merge(stmt) => classify_statement(stmt),
        SetExpr::Select(_) | SetExpr::Values(_) | SetExpr::Table(_) => StatementKind::Select,
    }
}
