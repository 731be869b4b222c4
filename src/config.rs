//! Configuration handling for the DB Gateway MCP server.
//!
//! This module provides configuration management via CLI arguments and environment variables.
//! The target database is given either as one `--database-url` or as discrete `--db-*` fields.

use crate::db::{ExecutionLimits, PoolSettings, RetryPolicy};
use crate::models::{ConnectionSettings, DEFAULT_MAX_ROWS, DEFAULT_QUERY_TIMEOUT_SECS, DatabaseType};
use clap::{ArgAction, Parser, ValueEnum};
use std::time::Duration;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_MCP_ENDPOINT: &str = "/mcp";

// Pool configuration defaults
pub const DEFAULT_POOL_SIZE: u32 = 10;
pub const DEFAULT_POOL_MAX_OVERFLOW: u32 = 20;
pub const DEFAULT_POOL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_POOL_RECYCLE_SECS: u64 = 3600;

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_SCHEMA_CACHE_TTL_SECS: u64 = 3600;

/// Transport mode for the MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TransportMode {
    /// Standard input/output (for CLI integration)
    #[default]
    Stdio,
    /// Streamable HTTP (for web clients)
    Http,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Backend selected with `--db-type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DbKind {
    /// Microsoft SQL Server
    #[default]
    Mssql,
    Postgres,
    Mysql,
    /// SQLite; `--db-name` is the file path
    Sqlite,
}

impl From<DbKind> for DatabaseType {
    fn from(kind: DbKind) -> Self {
        match kind {
            DbKind::Mssql => DatabaseType::MsSql,
            DbKind::Postgres => DatabaseType::PostgreSQL,
            DbKind::Mysql => DatabaseType::MySQL,
            DbKind::Sqlite => DatabaseType::SQLite,
        }
    }
}

/// Configuration for the DB Gateway MCP server.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-gateway-mcp",
    about = "Safety-gated SQL query gateway for AI assistants, served over MCP",
    version,
    author
)]
pub struct Config {
    /// Full connection URL (mssql://, postgres://, mysql://, sqlite:). Overrides the --db-* fields.
    #[arg(long, value_name = "URL", env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Database backend
    #[arg(long, value_enum, default_value = "mssql", env = "DB_TYPE")]
    pub db_type: DbKind,

    /// Database host
    #[arg(long, default_value = "localhost", env = "DB_HOST")]
    pub db_host: String,

    /// Database port. Defaults to the backend's standard port.
    #[arg(long, env = "DB_PORT")]
    pub db_port: Option<u16>,

    /// Database name (file path for SQLite)
    #[arg(long, default_value = "master", env = "DB_NAME")]
    pub db_name: String,

    /// Database user
    #[arg(long, default_value = "sa", env = "DB_USER")]
    pub db_user: String,

    /// Database password
    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    /// Encrypt the connection
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "DB_ENCRYPT")]
    pub db_encrypt: bool,

    /// Accept the server certificate without validation
    #[arg(long, env = "DB_TRUST_SERVER_CERT")]
    pub db_trust_server_cert: bool,

    /// Steady-state pool size
    #[arg(long, default_value_t = DEFAULT_POOL_SIZE, env = "POOL_SIZE")]
    pub pool_size: u32,

    /// Extra connections allowed above the pool size
    #[arg(long, default_value_t = DEFAULT_POOL_MAX_OVERFLOW, env = "POOL_MAX_OVERFLOW")]
    pub pool_max_overflow: u32,

    /// Seconds to wait for a free connection
    #[arg(long, default_value_t = DEFAULT_POOL_TIMEOUT_SECS, env = "POOL_TIMEOUT")]
    pub pool_timeout: u64,

    /// Seconds after which connections are replaced
    #[arg(long, default_value_t = DEFAULT_POOL_RECYCLE_SECS, env = "POOL_RECYCLE")]
    pub pool_recycle: u64,

    /// Maximum rows returned by any statement
    #[arg(long, default_value_t = DEFAULT_MAX_ROWS, env = "MAX_ROWS")]
    pub max_rows: u32,

    /// Statement timeout in seconds
    #[arg(long, default_value_t = DEFAULT_QUERY_TIMEOUT_SECS, env = "QUERY_TIMEOUT")]
    pub query_timeout: u64,

    /// Allow INSERT, UPDATE, DELETE and DDL statements
    #[arg(long, env = "ALLOW_WRITE_OPERATIONS")]
    pub allow_write_operations: bool,

    /// Schemas statements may reference (comma-separated). Empty means no restriction.
    #[arg(long, value_delimiter = ',', env = "ALLOWED_SCHEMAS")]
    pub allowed_schemas: Vec<String>,

    /// Retry only connection, timeout and pool-exhaustion failures
    #[arg(long, env = "RETRY_TRANSIENT_ONLY")]
    pub retry_transient_only: bool,

    /// Redis URL for the shared schema cache
    #[arg(long, default_value = DEFAULT_REDIS_URL, env = "REDIS_URL", hide_env_values = true)]
    pub redis_url: String,

    /// Use Redis as the schema cache's external tier
    #[arg(long, env = "REDIS_ENABLED")]
    pub redis_enabled: bool,

    /// Schema cache time-to-live in seconds
    #[arg(long, default_value_t = DEFAULT_SCHEMA_CACHE_TTL_SECS, env = "SCHEMA_CACHE_TTL")]
    pub schema_cache_ttl: u64,

    /// Transport mode (stdio or http)
    #[arg(
        short,
        long,
        value_enum,
        default_value = "stdio",
        env = "MCP_TRANSPORT"
    )]
    pub transport: TransportMode,

    /// HTTP host to bind to (only used with http transport)
    #[arg(
        long,
        default_value = DEFAULT_HTTP_HOST,
        env = "MCP_HTTP_HOST"
    )]
    pub http_host: String,

    /// HTTP port to bind to (only used with http transport)
    #[arg(
        long,
        default_value_t = DEFAULT_HTTP_PORT,
        env = "MCP_HTTP_PORT"
    )]
    pub http_port: u16,

    /// MCP endpoint path (only used with http transport)
    #[arg(
        long,
        default_value = DEFAULT_MCP_ENDPOINT,
        env = "MCP_ENDPOINT"
    )]
    pub mcp_endpoint: String,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            database_url: None,
            db_type: DbKind::Mssql,
            db_host: "localhost".to_string(),
            db_port: None,
            db_name: "master".to_string(),
            db_user: "sa".to_string(),
            db_password: None,
            db_encrypt: true,
            db_trust_server_cert: false,
            pool_size: DEFAULT_POOL_SIZE,
            pool_max_overflow: DEFAULT_POOL_MAX_OVERFLOW,
            pool_timeout: DEFAULT_POOL_TIMEOUT_SECS,
            pool_recycle: DEFAULT_POOL_RECYCLE_SECS,
            max_rows: DEFAULT_MAX_ROWS,
            query_timeout: DEFAULT_QUERY_TIMEOUT_SECS,
            allow_write_operations: false,
            allowed_schemas: Vec::new(),
            retry_transient_only: false,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            redis_enabled: false,
            schema_cache_ttl: DEFAULT_SCHEMA_CACHE_TTL_SECS,
            transport: TransportMode::Stdio,
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            mcp_endpoint: DEFAULT_MCP_ENDPOINT.to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Reject settings the gateway cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_rows == 0 {
            return Err("max_rows must be greater than 0".to_string());
        }
        if self.pool_size == 0 {
            return Err("pool_size must be greater than 0".to_string());
        }
        if self.query_timeout == 0 {
            return Err("query_timeout must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Resolve the target database.
    ///
    /// SQLite opens read-only unless write operations are allowed.
    pub fn connection_settings(&self) -> Result<ConnectionSettings, String> {
        let mut settings = match &self.database_url {
            Some(url) => ConnectionSettings::from_url(url).map_err(|e| e.to_string())?,
            None => self.settings_from_fields()?,
        };
        settings.read_only = !self.allow_write_operations;
        Ok(settings)
    }

    fn settings_from_fields(&self) -> Result<ConnectionSettings, String> {
        let db_type = DatabaseType::from(self.db_type);
        if self.db_name.trim().is_empty() {
            return Err("db_name is required".to_string());
        }
        if db_type == DatabaseType::SQLite {
            return Ok(ConnectionSettings::sqlite(self.db_name.clone(), true));
        }
        Ok(ConnectionSettings {
            db_type,
            host: self.db_host.clone(),
            port: self
                .db_port
                .or_else(|| db_type.default_port())
                .unwrap_or_default(),
            database: self.db_name.clone(),
            username: self.db_user.clone(),
            password: self.db_password.clone().unwrap_or_default(),
            encrypt: self.db_encrypt,
            trust_server_cert: self.db_trust_server_cert,
            read_only: true,
        })
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            size: self.pool_size,
            max_overflow: self.pool_max_overflow,
            acquire_timeout: Duration::from_secs(self.pool_timeout),
            recycle: Duration::from_secs(self.pool_recycle),
        }
    }

    pub fn execution_limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            max_rows: self.max_rows,
            query_timeout: self.query_timeout_duration(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            transient_only: self.retry_transient_only,
            ..RetryPolicy::default()
        }
    }

    /// Allowed schemas with blanks removed.
    pub fn allowed_schema_list(&self) -> Vec<String> {
        self.allowed_schemas
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// Get the query timeout as a Duration.
    pub fn query_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    pub fn schema_cache_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.schema_cache_ttl)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport, TransportMode::Stdio);
        assert_eq!(config.http_host, DEFAULT_HTTP_HOST);
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(config.max_rows, 10000);
        assert_eq!(config.query_timeout, 120);
        assert!(!config.allow_write_operations);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_defaults_match_default_config() {
        let parsed = Config::try_parse_from(["db-gateway-mcp"]).unwrap();
        let defaults = Config::default();
        assert_eq!(parsed.db_type, defaults.db_type);
        assert_eq!(parsed.db_name, defaults.db_name);
        assert_eq!(parsed.db_encrypt, defaults.db_encrypt);
        assert_eq!(parsed.pool_size, defaults.pool_size);
        assert_eq!(parsed.pool_max_overflow, defaults.pool_max_overflow);
        assert_eq!(parsed.max_rows, defaults.max_rows);
        assert_eq!(parsed.schema_cache_ttl, defaults.schema_cache_ttl);
        assert_eq!(parsed.mcp_endpoint, defaults.mcp_endpoint);
    }

    #[test]
    fn test_cli_flags() {
        let parsed = Config::try_parse_from([
            "db-gateway-mcp",
            "--db-type",
            "postgres",
            "--db-encrypt",
            "false",
            "--allow-write-operations",
            "--allowed-schemas",
            "sales,hr",
            "--max-rows",
            "50",
        ])
        .unwrap();
        assert_eq!(parsed.db_type, DbKind::Postgres);
        assert!(!parsed.db_encrypt);
        assert!(parsed.allow_write_operations);
        assert_eq!(parsed.allowed_schemas, vec!["sales", "hr"]);
        assert_eq!(parsed.max_rows, 50);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = Config {
            max_rows: 0,
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().contains("max_rows"));

        let config = Config {
            pool_size: 0,
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().contains("pool_size"));
    }

    #[test]
    fn test_connection_settings_from_fields() {
        let config = Config {
            db_host: "sql.internal".to_string(),
            db_name: "Sales".to_string(),
            db_password: Some("secret".to_string()),
            ..Config::default()
        };
        let settings = config.connection_settings().unwrap();
        assert_eq!(settings.db_type, DatabaseType::MsSql);
        assert_eq!(settings.host, "sql.internal");
        assert_eq!(settings.port, 1433);
        assert_eq!(settings.database, "Sales");
        assert_eq!(settings.password, "secret");
        assert!(settings.encrypt);
        assert!(settings.read_only);
    }

    #[test]
    fn test_connection_settings_url_overrides_fields() {
        let config = Config {
            database_url: Some("postgres://app:pw@db:6543/shop".to_string()),
            allow_write_operations: true,
            ..Config::default()
        };
        let settings = config.connection_settings().unwrap();
        assert_eq!(settings.db_type, DatabaseType::PostgreSQL);
        assert_eq!(settings.host, "db");
        assert_eq!(settings.port, 6543);
        assert_eq!(settings.database, "shop");
        assert!(!settings.read_only);
    }

    #[test]
    fn test_sqlite_read_only_follows_write_flag() {
        let config = Config {
            db_type: DbKind::Sqlite,
            db_name: "/tmp/app.db".to_string(),
            ..Config::default()
        };
        let settings = config.connection_settings().unwrap();
        assert_eq!(settings.db_type, DatabaseType::SQLite);
        assert_eq!(settings.database, "/tmp/app.db");
        assert!(settings.read_only);

        let config = Config {
            allow_write_operations: true,
            ..config
        };
        assert!(!config.connection_settings().unwrap().read_only);
    }

    #[test]
    fn test_invalid_url_is_reported() {
        let config = Config {
            database_url: Some("oracle://db/x".to_string()),
            ..Config::default()
        };
        assert!(config.connection_settings().is_err());
    }

    #[test]
    fn test_derived_settings() {
        let config = Config {
            pool_size: 4,
            pool_max_overflow: 2,
            pool_timeout: 5,
            retry_transient_only: true,
            allowed_schemas: vec![" sales ".to_string(), String::new()],
            ..Config::default()
        };
        let pool = config.pool_settings();
        assert_eq!(pool.max_connections(), 6);
        assert_eq!(pool.acquire_timeout, Duration::from_secs(5));
        assert!(config.retry_policy().transient_only);
        assert_eq!(config.allowed_schema_list(), vec!["sales"]);
        assert_eq!(config.execution_limits().max_rows, 10000);
        assert_eq!(config.http_bind_addr(), "127.0.0.1:8080");
    }
}
