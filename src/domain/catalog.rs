//! Catalog of registered databases, their tables and ordered columns.
//!
//! Databases and tables iterate in name order; columns keep the order the
//! schema source reported them in.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Table name → ordered column names for one database.
pub type TableColumns = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    databases: BTreeMap<String, TableColumns>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_databases(databases: BTreeMap<String, TableColumns>) -> Self {
        Self { databases }
    }

    pub fn databases(&self) -> &BTreeMap<String, TableColumns> {
        &self.databases
    }

    pub fn database(&self, name: &str) -> Option<&TableColumns> {
        self.databases.get(name)
    }

    pub fn contains_database(&self, name: &str) -> bool {
        self.databases.contains_key(name)
    }

    pub fn database_names(&self) -> Vec<String> {
        self.databases.keys().cloned().collect()
    }

    /// Replace every table of `name` with `tables`.
    pub fn upsert_database(&mut self, name: impl Into<String>, tables: TableColumns) {
        self.databases.insert(name.into(), tables);
    }

    pub fn remove_database(&mut self, name: &str) -> Option<TableColumns> {
        self.databases.remove(name)
    }

    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }

    pub fn table_count(&self) -> usize {
        self.databases.values().map(|tables| tables.len()).sum()
    }

    pub fn column_count(&self) -> usize {
        self.databases
            .values()
            .flat_map(|tables| tables.values())
            .map(|columns| columns.len())
            .sum()
    }

    /// Iterate `(database, table, columns)` in catalog order.
    pub fn tables(&self) -> impl Iterator<Item = (&str, &str, &[String])> {
        self.databases.iter().flat_map(|(db, tables)| {
            tables
                .iter()
                .map(move |(table, columns)| (db.as_str(), table.as_str(), columns.as_slice()))
        })
    }
}

/// Structural difference between the last-known and the live schema of one database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDrift {
    pub new_tables: Vec<String>,
    pub removed_tables: Vec<String>,
    /// `(table, column)` pairs present live but unknown to the catalog.
    pub new_columns: Vec<(String, String)>,
    pub removed_columns: Vec<(String, String)>,
}

impl SchemaDrift {
    pub fn between(known: &TableColumns, live: &TableColumns) -> Self {
        let mut drift = SchemaDrift::default();

        for (table, live_columns) in live {
            match known.get(table) {
                None => drift.new_tables.push(table.clone()),
                Some(known_columns) => {
                    for column in live_columns {
                        if !known_columns.contains(column) {
                            drift.new_columns.push((table.clone(), column.clone()));
                        }
                    }
                    for column in known_columns {
                        if !live_columns.contains(column) {
                            drift.removed_columns.push((table.clone(), column.clone()));
                        }
                    }
                }
            }
        }

        for table in known.keys() {
            if !live.contains_key(table) {
                drift.removed_tables.push(table.clone());
            }
        }

        drift
    }

    pub fn is_empty(&self) -> bool {
        self.new_tables.is_empty()
            && self.removed_tables.is_empty()
            && self.new_columns.is_empty()
            && self.removed_columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(entries: &[(&str, &[&str])]) -> TableColumns {
        entries
            .iter()
            .map(|(t, cols)| (t.to_string(), cols.iter().map(|c| c.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_counts_and_iteration_order() {
        let mut catalog = Catalog::new();
        catalog.upsert_database("sales_db", tables(&[("orders", &["order_id", "customer_id"])]));
        catalog.upsert_database(
            "crm_db",
            tables(&[("customers", &["customer_id", "first_name", "email"])]),
        );

        assert_eq!(catalog.table_count(), 2);
        assert_eq!(catalog.column_count(), 5);

        let order: Vec<(&str, &str)> = catalog.tables().map(|(d, t, _)| (d, t)).collect();
        assert_eq!(order, vec![("crm_db", "customers"), ("sales_db", "orders")]);
    }

    #[test]
    fn test_column_order_survives_json() {
        let mut catalog = Catalog::new();
        catalog.upsert_database("shop", tables(&[("items", &["zeta", "alpha", "mid"])]));

        let json = serde_json::to_string(&catalog).unwrap();
        assert_eq!(json, r#"{"shop":{"items":["zeta","alpha","mid"]}}"#);

        let back: Catalog = serde_json::from_str(&json).unwrap();
        assert_eq!(back, catalog);
        assert_eq!(back.database("shop").unwrap()["items"], vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_drift_detects_additions_and_removals() {
        let known = tables(&[("users", &["id", "name"]), ("legacy", &["id"])]);
        let live = tables(&[("users", &["id", "email"]), ("orders", &["id"])]);

        let drift = SchemaDrift::between(&known, &live);
        assert_eq!(drift.new_tables, vec!["orders"]);
        assert_eq!(drift.removed_tables, vec!["legacy"]);
        assert_eq!(drift.new_columns, vec![("users".to_string(), "email".to_string())]);
        assert_eq!(drift.removed_columns, vec![("users".to_string(), "name".to_string())]);
        assert!(!drift.is_empty());
    }

    #[test]
    fn test_no_drift_for_identical_schema() {
        let schema = tables(&[("users", &["id", "name"])]);
        assert!(SchemaDrift::between(&schema, &schema).is_empty());
    }
}
