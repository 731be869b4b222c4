//! Schema snapshot data models.
//!
//! A [`SchemaSnapshot`] is the immutable, point-in-time picture of every base
//! table the gateway's login can see, keyed by `"<schema>.<table>"`. It is built
//! in one pass by [`SnapshotBuilder`] from the two catalog queries and is never
//! edited afterwards.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column information within a table, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnInfo {
    pub name: String,
    /// Engine type name, verbatim (e.g., "nvarchar", "int4")
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

/// A foreign-key edge leaving a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ForeignKeyInfo {
    /// Constraint name
    pub fk_name: String,
    /// Local column
    pub column: String,
    /// Referenced table (may be absent from the snapshot, e.g. a view)
    pub references_table: String,
    pub references_column: String,
    /// Schema of the referenced table
    #[serde(default)]
    pub references_schema: String,
}

/// One table in the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TableInfo {
    pub columns: Vec<ColumnInfo>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
}

/// Every visible base table, keyed by `"<schema>.<table>"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SchemaSnapshot {
    pub tables: BTreeMap<String, TableInfo>,
}

impl SchemaSnapshot {
    /// Number of tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn get(&self, schema: &str, table: &str) -> Option<&TableInfo> {
        self.tables.get(&table_key(schema, table))
    }
}

/// Snapshot key for a table.
pub fn table_key(schema: &str, table: &str) -> String {
    format!("{}.{}", schema, table)
}

/// One row of the column catalog query.
#[derive(Debug, Clone)]
pub struct ColumnRow {
    pub table_schema: String,
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

/// One row of the foreign-key catalog query (one per column pair).
#[derive(Debug, Clone)]
pub struct ForeignKeyRow {
    pub fk_name: String,
    pub parent_schema: String,
    pub parent_table: String,
    pub parent_column: String,
    pub referenced_schema: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// Folds catalog rows into a snapshot as they stream in.
///
/// Column rows must all be pushed before foreign-key rows; a foreign key is only
/// kept when its parent table was seen among the column rows.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    tables: BTreeMap<String, TableInfo>,
    dropped_foreign_keys: usize,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_column(&mut self, row: ColumnRow) {
        self.tables
            .entry(table_key(&row.table_schema, &row.table_name))
            .or_default()
            .columns
            .push(ColumnInfo {
                name: row.column_name,
                data_type: row.data_type,
                nullable: row.nullable,
                primary_key: row.primary_key,
            });
    }

    /// Attach a foreign key to its parent table. Returns false when the parent is unknown.
    pub fn push_foreign_key(&mut self, row: ForeignKeyRow) -> bool {
        match self
            .tables
            .get_mut(&table_key(&row.parent_schema, &row.parent_table))
        {
            Some(table) => {
                table.foreign_keys.push(ForeignKeyInfo {
                    fk_name: row.fk_name,
                    column: row.parent_column,
                    references_table: row.referenced_table,
                    references_column: row.referenced_column,
                    references_schema: row.referenced_schema,
                });
                true
            }
            None => {
                self.dropped_foreign_keys += 1;
                false
            }
        }
    }

    /// Foreign-key rows whose parent table was not in the snapshot.
    pub fn dropped_foreign_keys(&self) -> usize {
        self.dropped_foreign_keys
    }

    pub fn finish(self) -> SchemaSnapshot {
        SchemaSnapshot {
            tables: self.tables,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(schema: &str, table: &str, name: &str, data_type: &str, pk: bool) -> ColumnRow {
        ColumnRow {
            table_schema: schema.to_string(),
            table_name: table.to_string(),
            column_name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: !pk,
            primary_key: pk,
        }
    }

    fn fk(parent: &str, column: &str, referenced: &str, referenced_column: &str) -> ForeignKeyRow {
        ForeignKeyRow {
            fk_name: format!("FK_{}_{}", parent, referenced),
            parent_schema: "dbo".to_string(),
            parent_table: parent.to_string(),
            parent_column: column.to_string(),
            referenced_schema: "dbo".to_string(),
            referenced_table: referenced.to_string(),
            referenced_column: referenced_column.to_string(),
        }
    }

    #[test]
    fn test_orders_snapshot_with_foreign_key() {
        let mut builder = SnapshotBuilder::new();
        builder.push_column(column("dbo", "Orders", "Id", "int", true));
        builder.push_column(column("dbo", "Orders", "CustomerId", "int", false));
        assert!(builder.push_foreign_key(fk("Orders", "CustomerId", "Customers", "Id")));

        let snapshot = builder.finish();
        let orders = snapshot.get("dbo", "Orders").unwrap();
        assert_eq!(
            orders.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["Id", "CustomerId"]
        );
        assert!(orders.columns[0].primary_key);
        assert!(!orders.columns[1].primary_key);

        assert_eq!(orders.foreign_keys.len(), 1);
        let edge = &orders.foreign_keys[0];
        assert_eq!(edge.column, "CustomerId");
        assert_eq!(edge.references_table, "Customers");
        assert_eq!(edge.references_column, "Id");
        // Customers was never introspected; the edge still stands
        assert!(snapshot.get("dbo", "Customers").is_none());
    }

    #[test]
    fn test_foreign_key_for_unknown_parent_is_dropped() {
        let mut builder = SnapshotBuilder::new();
        builder.push_column(column("dbo", "Orders", "Id", "int", true));
        assert!(!builder.push_foreign_key(fk("AuditLog", "OrderId", "Orders", "Id")));
        assert_eq!(builder.dropped_foreign_keys(), 1);

        let snapshot = builder.finish();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get("dbo", "Orders").unwrap().foreign_keys.is_empty());
    }

    #[test]
    fn test_foreign_key_parent_is_matched_by_schema() {
        let mut builder = SnapshotBuilder::new();
        builder.push_column(column("sales", "Orders", "Id", "int", true));
        // Same table name under a different schema must not match
        assert!(!builder.push_foreign_key(fk("Orders", "CustomerId", "Customers", "Id")));
    }

    #[test]
    fn test_same_table_name_in_two_schemas() {
        let mut builder = SnapshotBuilder::new();
        builder.push_column(column("dbo", "Orders", "Id", "int", true));
        builder.push_column(column("archive", "Orders", "Id", "bigint", true));
        let snapshot = builder.finish();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("archive", "Orders").unwrap().columns[0].data_type, "bigint");
    }

    #[test]
    fn test_snapshot_serializes_as_plain_mapping() {
        let mut builder = SnapshotBuilder::new();
        builder.push_column(column("dbo", "Orders", "Id", "int", true));
        let snapshot = builder.finish();

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["dbo.Orders"]["columns"][0]["type"], "int");
        assert_eq!(json["dbo.Orders"]["columns"][0]["primary_key"], true);

        let back: SchemaSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }
}
