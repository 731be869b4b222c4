//! Shared fixtures: a throw-away SQLite database with a small sales schema.

#![allow(dead_code)]

use db_gateway_mcp::cache::{SchemaCache, cache_key};
use db_gateway_mcp::db::{
    DbPool, ExecutionLimits, PoolSettings, QueryExecutor, RetryPolicy, SchemaInspector,
};
use db_gateway_mcp::models::{ConnectionSettings, DatabaseType};
use db_gateway_mcp::tools::QueryValidator;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{NamedTempFile, TempPath};

/// Number of rows seeded into `orders`.
pub const ORDER_COUNT: usize = 25;

pub struct TestDb {
    pub pool: DbPool,
    pub settings: ConnectionSettings,
    _path: TempPath,
}

/// Create a database with `customers`, `orders` (FK to customers) and a view.
///
/// Order `n` has total `n * 10.0`.
pub async fn seeded_db() -> TestDb {
    let path = NamedTempFile::new()
        .expect("Failed to create temp file")
        .into_temp_path();
    let settings = ConnectionSettings::sqlite(path.to_string_lossy(), false);
    let pool = DbPool::connect(&settings, &PoolSettings::default())
        .await
        .expect("Failed to open test database");

    let DbPool::SQLite(p) = &pool else {
        panic!("expected a SQLite pool");
    };
    sqlx::raw_sql(
        "CREATE TABLE customers (
             id INTEGER PRIMARY KEY,
             name TEXT NOT NULL,
             email TEXT
         );
         CREATE TABLE orders (
             id INTEGER PRIMARY KEY,
             customer_id INTEGER NOT NULL REFERENCES customers(id),
             total REAL
         );
         CREATE VIEW big_orders AS SELECT * FROM orders WHERE total > 100;
         INSERT INTO customers (id, name, email) VALUES
             (1, 'Ada', 'ada@example.com'),
             (2, 'Grace', NULL),
             (3, 'Linus', 'linus@example.com');",
    )
    .execute(p)
    .await
    .expect("Failed to create schema");

    for n in 1..=ORDER_COUNT as i64 {
        sqlx::query("INSERT INTO orders (id, customer_id, total) VALUES (?, ?, ?)")
            .bind(n)
            .bind(n % 3 + 1)
            .bind(n as f64 * 10.0)
            .execute(p)
            .await
            .expect("Failed to seed orders");
    }

    TestDb {
        pool,
        settings,
        _path: path,
    }
}

/// Executor over the test database; retries are off so failures surface at once.
pub fn executor(db: &TestDb, allow_writes: bool, max_rows: u32) -> Arc<QueryExecutor> {
    let validator = QueryValidator::new(DatabaseType::SQLite, allow_writes);
    let limits = ExecutionLimits {
        max_rows,
        query_timeout: Duration::from_secs(10),
    };
    Arc::new(
        QueryExecutor::new(db.pool.clone(), validator, limits).with_retry(RetryPolicy::no_retry()),
    )
}

/// Local-only schema cache over the test database.
pub fn schema_cache(db: &TestDb) -> Arc<SchemaCache> {
    Arc::new(SchemaCache::new(
        Arc::new(SchemaInspector::new(db.pool.clone())),
        cache_key(DatabaseType::SQLite, &db.settings.target_label()),
        Duration::from_secs(60),
    ))
}
