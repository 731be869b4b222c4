//! Stdio transport: one MCP session over stdin/stdout.
//!
//! Logs go to stderr, so stdout carries nothing but JSON-RPC frames.

use crate::cache::SchemaCache;
use crate::db::QueryExecutor;
use crate::error::{DbError, DbResult};
use crate::mcp::GatewayService;
use crate::transport::{Transport, shutdown_signal};
use rmcp::{ServiceExt, transport::stdio};
use std::sync::Arc;
use tracing::{info, warn};

pub struct StdioTransport {
    executor: Arc<QueryExecutor>,
    schema_cache: Arc<SchemaCache>,
}

impl StdioTransport {
    /// Create a new stdio transport serving one gateway session.
    pub fn new(executor: Arc<QueryExecutor>, schema_cache: Arc<SchemaCache>) -> Self {
        Self {
            executor,
            schema_cache,
        }
    }
}

impl Transport for StdioTransport {
    async fn run(&self) -> DbResult<()> {
        info!(
            backend = self.executor.db_type().display_name(),
            "Starting gateway with stdio transport"
        );

        let running = GatewayService::new(self.executor.clone(), self.schema_cache.clone())
            .serve(stdio())
            .await
            .map_err(|e| DbError::internal(format!("Failed to start stdio transport: {}", e)))?;

        let interrupted = tokio::select! {
            result = running.waiting() => {
                if let Err(e) = result {
                    warn!(error = %e, "Stdio session ended with an error");
                    return Err(DbError::internal(format!("Stdio transport error: {}", e)));
                }
                info!("Client closed the stdio session");
                false
            }
            _ = shutdown_signal() => {
                info!("Shutdown signal received (signal again to force exit)");
                tokio::spawn(async {
                    shutdown_signal().await;
                    warn!("Second signal received, forcing exit");
                    std::process::exit(1);
                });
                true
            }
        };

        info!("Closing database pool");
        self.executor.pool().close().await;

        if interrupted {
            // A pending stdin read cannot be cancelled
            std::process::exit(0);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}
