//! Streamable HTTP transport.
//!
//! The MCP endpoint is served by rmcp's `StreamableHttpService` on axum, with
//! one `GatewayService` per session. A `/health` route reports whether the
//! database answers, for load balancers and container health checks.

use crate::cache::SchemaCache;
use crate::db::QueryExecutor;
use crate::error::{DbError, DbResult};
use crate::mcp::GatewayService;
use crate::transport::{Transport, shutdown_signal};
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// How long open SSE streams get to finish after the first shutdown signal.
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on the health check round trip.
const HEALTH_PING_TIMEOUT: Duration = Duration::from_secs(5);

/// MCP over streamable HTTP, bound to `host:port` at `endpoint`.
pub struct HttpTransport {
    executor: Arc<QueryExecutor>,
    schema_cache: Arc<SchemaCache>,
    host: String,
    port: u16,
    endpoint: String,
}

/// Body of the `/health` response.
#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    backend: &'static str,
    database_reachable: bool,
    write_operations: bool,
    version: &'static str,
}

impl HttpTransport {
    /// Create a new HTTP transport over the shared executor and schema cache.
    ///
    /// `endpoint` is the MCP path, e.g. `/mcp`; `/` mounts MCP as the fallback.
    pub fn new(
        executor: Arc<QueryExecutor>,
        schema_cache: Arc<SchemaCache>,
        host: impl Into<String>,
        port: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            schema_cache,
            host: host.into(),
            port,
            endpoint: endpoint.into(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Axum router with the health route and the MCP service.
    pub fn router(&self) -> Router {
        let executor = self.executor.clone();
        let schema_cache = self.schema_cache.clone();
        let service = StreamableHttpService::new(
            move || Ok(GatewayService::new(executor.clone(), schema_cache.clone())),
            LocalSessionManager::default().into(),
            Default::default(),
        );

        let app = Router::new()
            .route("/health", get(health))
            .with_state(self.executor.clone());

        // nest_service rejects "/"
        if self.endpoint == "/" {
            app.fallback_service(service)
        } else {
            app.nest_service(&self.endpoint, service)
        }
    }
}

async fn health(State(executor): State<Arc<QueryExecutor>>) -> impl IntoResponse {
    let reachable = matches!(
        tokio::time::timeout(HEALTH_PING_TIMEOUT, executor.pool().ping()).await,
        Ok(Ok(()))
    );
    if !reachable {
        warn!(
            backend = executor.db_type().display_name(),
            "Health check could not reach the database"
        );
    }

    let report = HealthReport {
        status: if reachable { "ok" } else { "degraded" },
        backend: executor.db_type().display_name(),
        database_reachable: reachable,
        write_operations: executor.validator().allows_writes(),
        version: env!("CARGO_PKG_VERSION"),
    };
    let code = if reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

impl Transport for HttpTransport {
    async fn run(&self) -> DbResult<()> {
        let bind_addr = self.bind_addr();
        info!(
            addr = %bind_addr,
            backend = self.executor.db_type().display_name(),
            "Starting gateway with HTTP transport"
        );

        let app = self.router();
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            DbError::connection(
                format!("Failed to bind to {}: {}", bind_addr, e),
                "Check that the port is available",
            )
        })?;
        info!(endpoint = %self.endpoint, "MCP endpoint ready");

        // Open SSE streams can hold the server past the first signal
        let shutdown_started = Arc::new(tokio::sync::Notify::new());
        let notify = shutdown_started.clone();
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            shutdown_signal().await;
            notify.notify_one();
        });

        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    error!(error = %e, "HTTP server error");
                    return Err(DbError::internal(format!("HTTP server error: {}", e)));
                }
                info!("HTTP server stopped");
            }
            _ = async {
                shutdown_started.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for sessions to close (signal again to force exit)"
                );
                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timed out, forcing exit");
                    }
                    _ = shutdown_signal() => {
                        warn!("Second signal received, forcing exit");
                    }
                }
            } => {}
        }

        info!("Closing database pool");
        self.executor.pool().close().await;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::cache_key;
    use crate::db::{DbPool, ExecutionLimits, PoolSettings, SchemaInspector};
    use crate::models::{ConnectionSettings, DatabaseType};
    use crate::tools::QueryValidator;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::NamedTempFile;
    use tower::ServiceExt;

    async fn shared_state() -> (Arc<QueryExecutor>, Arc<SchemaCache>) {
        let path = NamedTempFile::new().unwrap().into_temp_path().keep().unwrap();
        let settings = ConnectionSettings::sqlite(path.to_string_lossy(), false);
        let pool = DbPool::connect(&settings, &PoolSettings::default())
            .await
            .unwrap();
        let executor = Arc::new(QueryExecutor::new(
            pool.clone(),
            QueryValidator::new(DatabaseType::SQLite, false),
            ExecutionLimits::default(),
        ));
        let cache = Arc::new(SchemaCache::new(
            Arc::new(SchemaInspector::new(pool)),
            cache_key(DatabaseType::SQLite, &settings.target_label()),
            Duration::from_secs(60),
        ));
        (executor, cache)
    }

    #[tokio::test]
    async fn test_http_transport_creation() {
        let (executor, cache) = shared_state().await;
        let transport = HttpTransport::new(executor, cache, "127.0.0.1", 8080, "/mcp");
        assert_eq!(transport.name(), "http");
        assert_eq!(transport.bind_addr(), "127.0.0.1:8080");
        assert_eq!(transport.endpoint(), "/mcp");
    }

    #[tokio::test]
    async fn test_health_reports_backend() {
        let (executor, cache) = shared_state().await;
        let app = HttpTransport::new(executor, cache, "127.0.0.1", 8080, "/mcp").router();

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["status"], "ok");
        assert_eq!(report["backend"], "SQLite");
        assert_eq!(report["database_reachable"], true);
        assert_eq!(report["write_operations"], false);
    }

    #[tokio::test]
    async fn test_health_survives_root_endpoint() {
        let (executor, cache) = shared_state().await;
        let app = HttpTransport::new(executor, cache, "0.0.0.0", 3000, "/").router();

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
