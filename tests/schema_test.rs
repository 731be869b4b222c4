//! Integration tests for schema introspection and the schema cache against SQLite.

mod common;

use common::{executor, schema_cache, seeded_db};
use db_gateway_mcp::db::{SchemaInspector, SchemaSource};
use std::sync::Arc;

#[tokio::test]
async fn test_introspection_builds_snapshot() {
    let db = seeded_db().await;
    let snapshot = SchemaInspector::new(db.pool.clone())
        .introspect()
        .await
        .unwrap();

    // The view is not a base table
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.get("main", "big_orders").is_none());

    let customers = snapshot.get("main", "customers").unwrap();
    let names: Vec<_> = customers.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "name", "email"]);
    assert!(customers.columns[0].primary_key);
    assert!(!customers.columns[1].nullable);
    assert!(customers.columns[2].nullable);
    assert!(customers.foreign_keys.is_empty());

    let orders = snapshot.get("main", "orders").unwrap();
    assert_eq!(orders.foreign_keys.len(), 1);
    let fk = &orders.foreign_keys[0];
    assert_eq!(fk.column, "customer_id");
    assert_eq!(fk.references_table, "customers");
    assert_eq!(fk.references_column, "id");
    assert_eq!(fk.references_schema, "main");
}

#[tokio::test]
async fn test_cache_serves_until_invalidated() {
    let db = seeded_db().await;
    let cache = schema_cache(&db);
    let exec = executor(&db, true, 100);

    let first = cache.get_full_schema().await.unwrap();
    assert_eq!(first.len(), 2);

    exec.execute("CREATE TABLE shipments (id INTEGER PRIMARY KEY)", None)
        .await
        .unwrap();

    // Still the cached snapshot
    let cached = cache.get_full_schema().await.unwrap();
    assert!(Arc::ptr_eq(&first, &cached));
    assert_eq!(cached.len(), 2);

    cache.invalidate().await;
    let rebuilt = cache.get_full_schema().await.unwrap();
    assert_eq!(rebuilt.len(), 3);
    assert!(rebuilt.get("main", "shipments").is_some());
}
