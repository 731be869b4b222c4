//! Integration tests for the tool handlers against SQLite.

mod common;

use common::{ORDER_COUNT, executor, schema_cache, seeded_db};
use db_gateway_mcp::error::DbError;
use db_gateway_mcp::models::PlanFormat;
use db_gateway_mcp::tools::{
    DatabaseSchemaInput, ExecuteQueryInput, ExplainInput, ExplainToolHandler,
    ParameterizedQueryInput, QueryToolHandler, RelatedTablesInput, SchemaToolHandler,
    TableSampleInput, ValidateQueryInput,
};
use serde_json::json;

fn sample(table: &str, size: i64) -> TableSampleInput {
    TableSampleInput {
        table_name: table.to_string(),
        schema_name: None,
        sample_size: size,
    }
}

#[tokio::test]
async fn test_execute_sql_query() {
    let db = seeded_db().await;
    let handler = QueryToolHandler::new(executor(&db, false, 100));

    let result = handler
        .execute_sql_query(ExecuteQueryInput {
            query: "SELECT name FROM customers ORDER BY id".to_string(),
            description: Some("customer names".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(result.row_count, 3);
    assert_eq!(result.rows[2]["name"], json!("Linus"));
}

#[tokio::test]
async fn test_execute_parameterized_query_from_json() {
    let db = seeded_db().await;
    let handler = QueryToolHandler::new(executor(&db, false, 100));

    let input: ParameterizedQueryInput = serde_json::from_value(json!({
        "query_template": "SELECT id, name FROM customers WHERE name = :name OR id = :id",
        "parameters": {"name": "Grace", "id": 3}
    }))
    .unwrap();
    let result = handler.execute_parameterized_query(input).await.unwrap();

    let ids: Vec<_> = result.rows.iter().map(|r| r["id"].clone()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&json!(2)));
    assert!(ids.contains(&json!(3)));
}

#[tokio::test]
async fn test_table_sample_is_clamped() {
    let db = seeded_db().await;
    let handler = QueryToolHandler::new(executor(&db, false, 1000));

    let result = handler.get_table_sample(sample("orders", 5)).await.unwrap();
    assert_eq!(result.row_count, 5);

    // 500 is clamped to 100; the table only has 25 rows
    let result = handler.get_table_sample(sample("orders", 500)).await.unwrap();
    assert_eq!(result.row_count, ORDER_COUNT);
    assert!(!result.truncated);

    let result = handler.get_table_sample(sample("orders", 0)).await.unwrap();
    assert_eq!(result.row_count, 1);
}

#[tokio::test]
async fn test_table_sample_respects_row_cap() {
    let db = seeded_db().await;
    let handler = QueryToolHandler::new(executor(&db, false, 4));

    let result = handler.get_table_sample(sample("orders", 50)).await.unwrap();
    assert_eq!(result.row_count, 4);
    assert!(result.truncated);
}

#[tokio::test]
async fn test_table_sample_rejects_blank_name() {
    let db = seeded_db().await;
    let handler = QueryToolHandler::new(executor(&db, false, 100));

    let err = handler.get_table_sample(sample("  ", 5)).await.unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));
}

#[tokio::test]
async fn test_find_related_tables_both_directions() {
    let db = seeded_db().await;
    let handler = QueryToolHandler::new(executor(&db, false, 100));

    for table in ["customers", "orders"] {
        let output = handler
            .find_related_tables(RelatedTablesInput {
                table_name: table.to_string(),
            })
            .await
            .unwrap();
        assert_eq!(output.table_name, table);
        assert_eq!(output.count, 1);

        let rel = &output.relationships[0];
        assert_eq!(rel["from_table"], json!("orders"));
        assert_eq!(rel["from_column"], json!("customer_id"));
        assert_eq!(rel["to_table"], json!("customers"));
        assert_eq!(rel["to_column"], json!("id"));
    }
}

#[tokio::test]
async fn test_validate_sql_query_never_executes() {
    let db = seeded_db().await;
    let exec = executor(&db, false, 100);
    let handler = QueryToolHandler::new(exec.clone());

    let verdict = handler.validate_sql_query(ValidateQueryInput {
        query: "SELECT * FROM orders".to_string(),
    });
    assert!(verdict.allowed);
    assert_eq!(verdict.reason, "OK");

    let verdict = handler.validate_sql_query(ValidateQueryInput {
        query: "DELETE FROM orders".to_string(),
    });
    assert!(!verdict.allowed);

    // Even an allowed write is only checked
    let writer = QueryToolHandler::new(executor(&db, true, 100));
    let verdict = writer.validate_sql_query(ValidateQueryInput {
        query: "DELETE FROM orders".to_string(),
    });
    assert!(verdict.allowed);
    let count = exec
        .execute("SELECT COUNT(*) AS n FROM orders", None)
        .await
        .unwrap();
    assert_eq!(count.rows[0]["n"], json!(ORDER_COUNT));
}

#[tokio::test]
async fn test_explain_tool() {
    let db = seeded_db().await;
    let handler = ExplainToolHandler::new(executor(&db, false, 100));

    let plan = handler
        .explain(ExplainInput {
            query: "SELECT * FROM orders WHERE customer_id = 2".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(plan.format, PlanFormat::Json);

    let err = handler
        .explain(ExplainInput {
            query: "   ".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));
}

#[tokio::test]
async fn test_get_database_schema_filters() {
    let db = seeded_db().await;
    let handler = SchemaToolHandler::new(schema_cache(&db));

    let all = handler
        .get_database_schema(DatabaseSchemaInput {
            table_filter: None,
            include_relationships: true,
        })
        .await
        .unwrap();
    assert_eq!(all.table_count, 2);
    let fks = all.tables["main.orders"].foreign_keys.as_ref().unwrap();
    assert_eq!(fks[0].references_table, "customers");

    let filtered = handler
        .get_database_schema(DatabaseSchemaInput {
            table_filter: Some("CUST".to_string()),
            include_relationships: false,
        })
        .await
        .unwrap();
    assert_eq!(filtered.table_count, 1);
    assert!(filtered.tables["main.customers"].foreign_keys.is_none());
}

#[tokio::test]
async fn test_refresh_schema_cache_picks_up_changes() {
    let db = seeded_db().await;
    let handler = SchemaToolHandler::new(schema_cache(&db));
    let writer = QueryToolHandler::new(executor(&db, true, 100));

    let before = handler
        .get_database_schema(DatabaseSchemaInput {
            table_filter: None,
            include_relationships: true,
        })
        .await
        .unwrap();
    assert_eq!(before.table_count, 2);

    writer
        .execute_sql_query(ExecuteQueryInput {
            query: "CREATE TABLE refunds (id INTEGER PRIMARY KEY, order_id INTEGER)".to_string(),
            description: None,
        })
        .await
        .unwrap();

    let refreshed = handler.refresh_schema_cache().await.unwrap();
    assert_eq!(refreshed.status, "refreshed");
    assert_eq!(refreshed.tables, 3);
}
