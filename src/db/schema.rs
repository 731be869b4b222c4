//! Schema introspection module.
//!
//! Builds a [`SchemaSnapshot`] of every visible base table from two catalog
//! queries (columns, then foreign keys) run on the same pooled connection.
//!
//! # Architecture
//!
//! SQL queries are organized in the `queries` submodule with constants for each
//! database type. Database-specific implementations are in their respective
//! submodules (mssql, postgres, mysql, sqlite), each providing the same interface.

use crate::db::pool::{DbPool, acquire};
use crate::error::{DbError, DbResult};
use crate::models::{ColumnRow, ForeignKeyRow, SchemaSnapshot, SnapshotBuilder};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Anything that can produce a fresh schema snapshot.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn introspect(&self) -> DbResult<SchemaSnapshot>;
}

/// Schema inspector for database introspection.
pub struct SchemaInspector {
    pool: DbPool,
    timeout: Duration,
}

impl SchemaInspector {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn build(&self) -> DbResult<SnapshotBuilder> {
        match &self.pool {
            DbPool::MsSql(p) => mssql::build(p).await,
            DbPool::Postgres(p) => postgres::build(p).await,
            DbPool::MySql(p) => mysql::build(p).await,
            DbPool::SQLite(p) => sqlite::build(p).await,
        }
    }
}

#[async_trait]
impl SchemaSource for SchemaInspector {
    async fn introspect(&self) -> DbResult<SchemaSnapshot> {
        let start = Instant::now();
        let builder = match tokio::time::timeout(self.timeout, self.build()).await {
            Ok(built) => built.map_err(DbError::into_introspection)?,
            Err(_) => return Err(DbError::timeout("schema introspection", self.timeout)),
        };

        if builder.dropped_foreign_keys() > 0 {
            debug!(
                dropped = builder.dropped_foreign_keys(),
                "Foreign keys skipped: parent table not in snapshot"
            );
        }
        let snapshot = builder.finish();
        info!(
            db_type = %self.pool.db_type(),
            tables = snapshot.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Schema introspected"
        );
        Ok(snapshot)
    }
}

// =============================================================================
// SQL Query Templates
// =============================================================================
//
// Centralized SQL queries for schema introspection. Each database has its own
// submodule with queries adapted to its specific system catalogs. Every column
// query returns (schema, table, column, type, nullable, primary_key) and every
// foreign-key query returns (name, parent schema/table/column, referenced
// schema/table/column), one row per column pair.

mod queries {
    pub mod mssql {
        pub const COLUMNS: &str = r#"
            SELECT
                c.TABLE_SCHEMA,
                c.TABLE_NAME,
                c.COLUMN_NAME,
                c.DATA_TYPE,
                CASE WHEN c.IS_NULLABLE = 'YES' THEN 1 ELSE 0 END AS IS_NULLABLE,
                CASE WHEN pk.COLUMN_NAME IS NOT NULL THEN 1 ELSE 0 END AS IS_PRIMARY_KEY
            FROM INFORMATION_SCHEMA.COLUMNS c
            JOIN INFORMATION_SCHEMA.TABLES t
                ON t.TABLE_SCHEMA = c.TABLE_SCHEMA
                AND t.TABLE_NAME = c.TABLE_NAME
                AND t.TABLE_TYPE = 'BASE TABLE'
            LEFT JOIN (
                SELECT ku.TABLE_SCHEMA, ku.TABLE_NAME, ku.COLUMN_NAME
                FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
                JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE ku
                    ON tc.CONSTRAINT_NAME = ku.CONSTRAINT_NAME
                    AND tc.CONSTRAINT_SCHEMA = ku.CONSTRAINT_SCHEMA
                WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
            ) pk
                ON pk.TABLE_SCHEMA = c.TABLE_SCHEMA
                AND pk.TABLE_NAME = c.TABLE_NAME
                AND pk.COLUMN_NAME = c.COLUMN_NAME
            ORDER BY c.TABLE_SCHEMA, c.TABLE_NAME, c.ORDINAL_POSITION
            "#;

        pub const FOREIGN_KEYS: &str = r#"
            SELECT
                fk.name AS FK_NAME,
                SCHEMA_NAME(tp.schema_id) AS PARENT_SCHEMA,
                tp.name AS PARENT_TABLE,
                cp.name AS PARENT_COLUMN,
                SCHEMA_NAME(tr.schema_id) AS REFERENCED_SCHEMA,
                tr.name AS REFERENCED_TABLE,
                cr.name AS REFERENCED_COLUMN
            FROM sys.foreign_keys fk
            JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id
            JOIN sys.tables tp ON tp.object_id = fkc.parent_object_id
            JOIN sys.columns cp
                ON cp.object_id = fkc.parent_object_id
                AND cp.column_id = fkc.parent_column_id
            JOIN sys.tables tr ON tr.object_id = fkc.referenced_object_id
            JOIN sys.columns cr
                ON cr.object_id = fkc.referenced_object_id
                AND cr.column_id = fkc.referenced_column_id
            ORDER BY PARENT_SCHEMA, PARENT_TABLE, fk.name, fkc.constraint_column_id
            "#;
    }

    pub mod postgres {
        pub const COLUMNS: &str = r#"
            SELECT
                c.table_schema::text,
                c.table_name::text,
                c.column_name::text,
                c.data_type::text,
                (c.is_nullable = 'YES') AS is_nullable,
                EXISTS (
                    SELECT 1
                    FROM information_schema.table_constraints tc
                    JOIN information_schema.key_column_usage ku
                        ON tc.constraint_name = ku.constraint_name
                        AND tc.constraint_schema = ku.constraint_schema
                    WHERE tc.constraint_type = 'PRIMARY KEY'
                    AND ku.table_schema = c.table_schema
                    AND ku.table_name = c.table_name
                    AND ku.column_name = c.column_name
                ) AS is_primary_key
            FROM information_schema.columns c
            JOIN information_schema.tables t
                ON t.table_schema = c.table_schema
                AND t.table_name = c.table_name
                AND t.table_type = 'BASE TABLE'
            WHERE c.table_schema NOT IN ('pg_catalog', 'information_schema')
            ORDER BY c.table_schema, c.table_name, c.ordinal_position
            "#;

        pub const FOREIGN_KEYS: &str = r#"
            SELECT
                con.conname::text AS fk_name,
                pn.nspname::text AS parent_schema,
                pc.relname::text AS parent_table,
                pa.attname::text AS parent_column,
                rn.nspname::text AS referenced_schema,
                rc.relname::text AS referenced_table,
                ra.attname::text AS referenced_column
            FROM pg_constraint con
            CROSS JOIN LATERAL unnest(con.conkey, con.confkey)
                WITH ORDINALITY AS k(parent_attnum, referenced_attnum, ord)
            JOIN pg_class pc ON pc.oid = con.conrelid
            JOIN pg_namespace pn ON pn.oid = pc.relnamespace
            JOIN pg_attribute pa ON pa.attrelid = con.conrelid AND pa.attnum = k.parent_attnum
            JOIN pg_class rc ON rc.oid = con.confrelid
            JOIN pg_namespace rn ON rn.oid = rc.relnamespace
            JOIN pg_attribute ra ON ra.attrelid = con.confrelid AND ra.attnum = k.referenced_attnum
            WHERE con.contype = 'f'
            ORDER BY pn.nspname, pc.relname, con.conname, k.ord
            "#;
    }

    pub mod mysql {
        // Use CONVERT to ensure proper UTF8 string types (MySQL 8 returns
        // information_schema text as VARBINARY in some configurations)
        pub const COLUMNS: &str = r#"
            SELECT
                CONVERT(c.TABLE_SCHEMA USING utf8mb4) AS table_schema,
                CONVERT(c.TABLE_NAME USING utf8mb4) AS table_name,
                CONVERT(c.COLUMN_NAME USING utf8mb4) AS column_name,
                CONVERT(c.DATA_TYPE USING utf8mb4) AS data_type,
                IF(c.IS_NULLABLE = 'YES', 1, 0) AS is_nullable,
                IF(c.COLUMN_KEY = 'PRI', 1, 0) AS is_primary_key
            FROM information_schema.COLUMNS c
            JOIN information_schema.TABLES t
                ON t.TABLE_SCHEMA = c.TABLE_SCHEMA
                AND t.TABLE_NAME = c.TABLE_NAME
                AND t.TABLE_TYPE = 'BASE TABLE'
            WHERE c.TABLE_SCHEMA = DATABASE()
            ORDER BY c.TABLE_NAME, c.ORDINAL_POSITION
            "#;

        pub const FOREIGN_KEYS: &str = r#"
            SELECT
                CONVERT(k.CONSTRAINT_NAME USING utf8mb4) AS fk_name,
                CONVERT(k.TABLE_SCHEMA USING utf8mb4) AS parent_schema,
                CONVERT(k.TABLE_NAME USING utf8mb4) AS parent_table,
                CONVERT(k.COLUMN_NAME USING utf8mb4) AS parent_column,
                CONVERT(k.REFERENCED_TABLE_SCHEMA USING utf8mb4) AS referenced_schema,
                CONVERT(k.REFERENCED_TABLE_NAME USING utf8mb4) AS referenced_table,
                CONVERT(k.REFERENCED_COLUMN_NAME USING utf8mb4) AS referenced_column
            FROM information_schema.KEY_COLUMN_USAGE k
            WHERE k.TABLE_SCHEMA = DATABASE()
            AND k.REFERENCED_TABLE_NAME IS NOT NULL
            ORDER BY k.TABLE_NAME, k.CONSTRAINT_NAME, k.ORDINAL_POSITION
            "#;
    }

    pub mod sqlite {
        pub const COLUMNS: &str = r#"
            SELECT
                'main' AS table_schema,
                m.name AS table_name,
                p.name AS column_name,
                p.type AS data_type,
                CASE WHEN p."notnull" = 0 AND p.pk = 0 THEN 1 ELSE 0 END AS is_nullable,
                CASE WHEN p.pk > 0 THEN 1 ELSE 0 END AS is_primary_key
            FROM sqlite_master m
            JOIN pragma_table_info(m.name) p
            WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%'
            ORDER BY m.name, p.cid
            "#;

        // An implicit reference to the parent's primary key has a NULL "to"
        pub const FOREIGN_KEYS: &str = r#"
            SELECT
                'fk_' || m.name || '_' || f.id AS fk_name,
                'main' AS parent_schema,
                m.name AS parent_table,
                f."from" AS parent_column,
                'main' AS referenced_schema,
                f."table" AS referenced_table,
                COALESCE(f."to", '') AS referenced_column
            FROM sqlite_master m
            JOIN pragma_foreign_key_list(m.name) f
            WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%'
            ORDER BY m.name, f.id, f.seq
            "#;
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod mssql {
    use super::*;
    use crate::db::pool::MsSqlPool;
    use futures_util::TryStreamExt;

    fn text(row: &tiberius::Row, idx: usize) -> DbResult<String> {
        Ok(row
            .try_get::<&str, _>(idx)?
            .map(str::to_string)
            .unwrap_or_default())
    }

    fn flag(row: &tiberius::Row, idx: usize) -> DbResult<bool> {
        Ok(row.try_get::<i32, _>(idx)?.unwrap_or(0) != 0)
    }

    pub async fn build(pool: &MsSqlPool) -> DbResult<SnapshotBuilder> {
        let mut conn = pool.checkout().await?;
        let mut builder = SnapshotBuilder::new();

        // A connection may come back from a timed-out query still capped
        conn.simple_query("SET ROWCOUNT 0")
            .await?
            .into_results()
            .await?;

        {
            let mut rows = conn
                .simple_query(queries::mssql::COLUMNS)
                .await?
                .into_row_stream();
            while let Some(row) = rows.try_next().await? {
                builder.push_column(ColumnRow {
                    table_schema: text(&row, 0)?,
                    table_name: text(&row, 1)?,
                    column_name: text(&row, 2)?,
                    data_type: text(&row, 3)?,
                    nullable: flag(&row, 4)?,
                    primary_key: flag(&row, 5)?,
                });
            }
        }

        let mut rows = conn
            .simple_query(queries::mssql::FOREIGN_KEYS)
            .await?
            .into_row_stream();
        while let Some(row) = rows.try_next().await? {
            builder.push_foreign_key(ForeignKeyRow {
                fk_name: text(&row, 0)?,
                parent_schema: text(&row, 1)?,
                parent_table: text(&row, 2)?,
                parent_column: text(&row, 3)?,
                referenced_schema: text(&row, 4)?,
                referenced_table: text(&row, 5)?,
                referenced_column: text(&row, 6)?,
            });
        }

        Ok(builder)
    }
}

mod postgres {
    use super::*;
    use futures_util::TryStreamExt;
    use sqlx::postgres::PgRow;
    use sqlx::{PgPool, Row};

    fn text(row: &PgRow, idx: usize) -> DbResult<String> {
        Ok(row.try_get::<Option<String>, _>(idx)?.unwrap_or_default())
    }

    pub async fn build(pool: &PgPool) -> DbResult<SnapshotBuilder> {
        let mut conn = acquire(pool).await?;
        let mut builder = SnapshotBuilder::new();

        {
            let mut rows = sqlx::query(queries::postgres::COLUMNS).fetch(&mut *conn);
            while let Some(row) = rows.try_next().await? {
                builder.push_column(ColumnRow {
                    table_schema: text(&row, 0)?,
                    table_name: text(&row, 1)?,
                    column_name: text(&row, 2)?,
                    data_type: text(&row, 3)?,
                    nullable: row.try_get::<bool, _>(4)?,
                    primary_key: row.try_get::<bool, _>(5)?,
                });
            }
        }

        let mut rows = sqlx::query(queries::postgres::FOREIGN_KEYS).fetch(&mut *conn);
        while let Some(row) = rows.try_next().await? {
            builder.push_foreign_key(ForeignKeyRow {
                fk_name: text(&row, 0)?,
                parent_schema: text(&row, 1)?,
                parent_table: text(&row, 2)?,
                parent_column: text(&row, 3)?,
                referenced_schema: text(&row, 4)?,
                referenced_table: text(&row, 5)?,
                referenced_column: text(&row, 6)?,
            });
        }

        Ok(builder)
    }
}

mod mysql {
    use super::*;
    use futures_util::TryStreamExt;
    use sqlx::mysql::MySqlRow;
    use sqlx::{MySqlPool, Row};

    /// Get a string column, falling back to raw bytes for VARBINARY results.
    fn text(row: &MySqlRow, idx: usize) -> String {
        if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
            return v;
        }
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }

    fn flag(row: &MySqlRow, idx: usize) -> bool {
        row.try_get::<i64, _>(idx)
            .map(|v| v != 0)
            .or_else(|_| row.try_get::<bool, _>(idx))
            .unwrap_or(false)
    }

    pub async fn build(pool: &MySqlPool) -> DbResult<SnapshotBuilder> {
        let mut conn = acquire(pool).await?;
        let mut builder = SnapshotBuilder::new();

        {
            let mut rows = sqlx::query(queries::mysql::COLUMNS).fetch(&mut *conn);
            while let Some(row) = rows.try_next().await? {
                builder.push_column(ColumnRow {
                    table_schema: text(&row, 0),
                    table_name: text(&row, 1),
                    column_name: text(&row, 2),
                    data_type: text(&row, 3),
                    nullable: flag(&row, 4),
                    primary_key: flag(&row, 5),
                });
            }
        }

        let mut rows = sqlx::query(queries::mysql::FOREIGN_KEYS).fetch(&mut *conn);
        while let Some(row) = rows.try_next().await? {
            builder.push_foreign_key(ForeignKeyRow {
                fk_name: text(&row, 0),
                parent_schema: text(&row, 1),
                parent_table: text(&row, 2),
                parent_column: text(&row, 3),
                referenced_schema: text(&row, 4),
                referenced_table: text(&row, 5),
                referenced_column: text(&row, 6),
            });
        }

        Ok(builder)
    }
}

mod sqlite {
    use super::*;
    use futures_util::TryStreamExt;
    use sqlx::sqlite::SqliteRow;
    use sqlx::{Row, SqlitePool};

    fn text(row: &SqliteRow, idx: usize) -> DbResult<String> {
        Ok(row.try_get::<Option<String>, _>(idx)?.unwrap_or_default())
    }

    pub async fn build(pool: &SqlitePool) -> DbResult<SnapshotBuilder> {
        let mut conn = acquire(pool).await?;
        let mut builder = SnapshotBuilder::new();

        {
            let mut rows = sqlx::query(queries::sqlite::COLUMNS).fetch(&mut *conn);
            while let Some(row) = rows.try_next().await? {
                builder.push_column(ColumnRow {
                    table_schema: text(&row, 0)?,
                    table_name: text(&row, 1)?,
                    column_name: text(&row, 2)?,
                    data_type: text(&row, 3)?,
                    nullable: row.try_get::<i64, _>(4)? != 0,
                    primary_key: row.try_get::<i64, _>(5)? != 0,
                });
            }
        }

        let mut rows = sqlx::query(queries::sqlite::FOREIGN_KEYS).fetch(&mut *conn);
        while let Some(row) = rows.try_next().await? {
            builder.push_foreign_key(ForeignKeyRow {
                fk_name: text(&row, 0)?,
                parent_schema: text(&row, 1)?,
                parent_table: text(&row, 2)?,
                parent_column: text(&row, 3)?,
                referenced_schema: text(&row, 4)?,
                referenced_table: text(&row, 5)?,
                referenced_column: text(&row, 6)?,
            });
        }

        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::PoolSettings;
    use crate::models::ConnectionSettings;
    use tempfile::NamedTempFile;

    async fn sqlite_pool() -> DbPool {
        let path = NamedTempFile::new().unwrap().into_temp_path().keep().unwrap();
        let settings = ConnectionSettings::sqlite(path.to_string_lossy(), false);
        let pool = DbPool::connect(&settings, &PoolSettings::default())
            .await
            .unwrap();
        if let DbPool::SQLite(p) = &pool {
            sqlx::raw_sql(
                "CREATE TABLE Customers (Id INTEGER PRIMARY KEY, Name TEXT NOT NULL);
                 CREATE TABLE Orders (
                     Id INTEGER PRIMARY KEY,
                     CustomerId INTEGER REFERENCES Customers(Id),
                     Note TEXT
                 );
                 CREATE VIEW OrderView AS SELECT * FROM Orders;",
            )
            .execute(p)
            .await
            .unwrap();
        }
        pool
    }

    #[tokio::test]
    async fn test_sqlite_snapshot_tables_and_keys() {
        let inspector = SchemaInspector::new(sqlite_pool().await);
        let snapshot = inspector.introspect().await.unwrap();

        // Views are not base tables
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.get("main", "OrderView").is_none());

        let orders = snapshot.get("main", "Orders").unwrap();
        let names: Vec<_> = orders.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Id", "CustomerId", "Note"]);
        assert!(orders.columns[0].primary_key);
        assert!(orders.columns[2].nullable);

        let customers = snapshot.get("main", "Customers").unwrap();
        assert!(!customers.columns[1].nullable);

        assert_eq!(orders.foreign_keys.len(), 1);
        let edge = &orders.foreign_keys[0];
        assert_eq!(edge.column, "CustomerId");
        assert_eq!(edge.references_table, "Customers");
        assert_eq!(edge.references_column, "Id");
        assert_eq!(edge.references_schema, "main");
    }

    #[tokio::test]
    async fn test_empty_database_gives_empty_snapshot() {
        let path = NamedTempFile::new().unwrap().into_temp_path().keep().unwrap();
        let settings = ConnectionSettings::sqlite(path.to_string_lossy(), false);
        let pool = DbPool::connect(&settings, &PoolSettings::default())
            .await
            .unwrap();
        let snapshot = SchemaInspector::new(pool).introspect().await.unwrap();
        assert!(snapshot.is_empty());
    }
}
