//! DB Gateway MCP - Main entry point.
//!
//! Connects to one target database, builds the validating executor and the
//! schema cache, then serves the gateway tools over the chosen transport.

use clap::Parser;
use db_gateway_mcp::cache::{RedisCache, SchemaCache, cache_key};
use db_gateway_mcp::config::{Config, TransportMode};
use db_gateway_mcp::db::{DbPool, QueryExecutor, SchemaInspector};
use db_gateway_mcp::models::mask_url;
use db_gateway_mcp::tools::QueryValidator;
use db_gateway_mcp::transport::{HttpTransport, StdioTransport, Transport};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr; stdout belongs to the stdio transport.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    init_tracing(&config);

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    info!(
        transport = %config.transport,
        "Starting DB Gateway MCP v{}",
        env!("CARGO_PKG_VERSION")
    );

    let settings = config.connection_settings().map_err(|e| {
        let target = config.database_url.as_deref().map(mask_url);
        error!(error = %e, target = ?target, "Invalid database settings");
        e
    })?;

    let pool_settings = config.pool_settings();
    let pool = DbPool::connect(&settings, &pool_settings).await?;

    let allowed_schemas = config.allowed_schema_list();
    let validator = QueryValidator::new(settings.db_type, config.allow_write_operations)
        .with_allowed_schemas(&allowed_schemas);
    info!(
        db_type = %settings.db_type,
        allow_writes = config.allow_write_operations,
        allowed_schemas = ?allowed_schemas,
        max_rows = config.max_rows,
        query_timeout_secs = config.query_timeout,
        "Query validator ready"
    );

    let executor = Arc::new(
        QueryExecutor::new(pool.clone(), validator, config.execution_limits())
            .with_retry(config.retry_policy()),
    );

    let inspector = SchemaInspector::new(pool).with_timeout(config.query_timeout_duration());
    let mut schema_cache = SchemaCache::new(
        Arc::new(inspector),
        cache_key(settings.db_type, &settings.target_label()),
        config.schema_cache_ttl_duration(),
    );
    if config.redis_enabled {
        match RedisCache::connect(&config.redis_url, REDIS_CONNECT_TIMEOUT).await {
            Ok(redis) => {
                info!(ttl_secs = config.schema_cache_ttl, "Schema cache: Redis with local fallback");
                schema_cache = schema_cache.with_remote(Arc::new(redis));
            }
            Err(e) => {
                warn!(error = %e, "Redis unavailable, schema cache is local only");
            }
        }
    } else {
        info!("Schema cache: local only");
    }
    let schema_cache = Arc::new(schema_cache);

    // Run the appropriate transport
    let result = match config.transport {
        TransportMode::Stdio => {
            let transport = StdioTransport::new(executor, schema_cache);
            info!(transport = transport.name(), "Using stdio transport");
            transport.run().await
        }
        TransportMode::Http => {
            info!(
                host = %config.http_host,
                port = config.http_port,
                endpoint = %config.mcp_endpoint,
                "Using HTTP transport"
            );
            let transport = HttpTransport::new(
                executor,
                schema_cache,
                &config.http_host,
                config.http_port,
                &config.mcp_endpoint,
            );
            transport.run().await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
