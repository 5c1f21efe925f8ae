//! Persistent schema catalog
//!
//! Holds the table/column listing of every registered database, persists it
//! after each mutation and keeps a derived `table -> database` index.
//!
//! Readers take an `Arc` snapshot; writers build the next state off to the
//! side and swap it in, so a reader sees either the old or the new catalog,
//! never a half-applied update.

use crate::domain::catalog::{Catalog, SchemaDrift, TableColumns};
use crate::domain::error::Result;
use crate::infrastructure::storage::{read_json, write_json};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{error, info};

#[derive(Debug, Default)]
struct CatalogState {
    catalog: Arc<Catalog>,
    table_to_db: HashMap<String, String>,
}

impl CatalogState {
    fn new(catalog: Catalog) -> Self {
        let table_to_db = build_table_map(&catalog);
        Self {
            catalog: Arc::new(catalog),
            table_to_db,
        }
    }
}

/// Map each table name to its owning database.
///
/// When two databases share a table name the one iterated last (name order)
/// wins. The ambiguity is kept as-is; resolution of duplicates happens at
/// query time through the resolver, not here.
fn build_table_map(catalog: &Catalog) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (db, table, _) in catalog.tables() {
        map.insert(table.to_string(), db.to_string());
    }
    map
}

pub struct SchemaCatalog {
    path: Option<PathBuf>,
    state: RwLock<CatalogState>,
}

impl SchemaCatalog {
    /// Load the catalog persisted at `path`. Missing or unreadable files yield an empty catalog.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let catalog = match read_json::<Catalog>(&path) {
            Ok(Some(catalog)) => {
                info!(
                    path = %path.display(),
                    databases = catalog.databases().len(),
                    "Loaded schema catalog"
                );
                catalog
            }
            Ok(None) => {
                info!(path = %path.display(), "No schema catalog file found");
                Catalog::new()
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to load schema catalog");
                Catalog::new()
            }
        };

        Self {
            path: Some(path),
            state: RwLock::new(CatalogState::new(catalog)),
        }
    }

    /// Catalog that is never written to disk.
    pub fn in_memory(catalog: Catalog) -> Self {
        Self {
            path: None,
            state: RwLock::new(CatalogState::new(catalog)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> Arc<Catalog> {
        self.read_state().catalog.clone()
    }

    pub fn database(&self, name: &str) -> Option<TableColumns> {
        self.read_state().catalog.database(name).cloned()
    }

    pub fn database_for_table(&self, table: &str) -> Option<String> {
        self.read_state().table_to_db.get(table).cloned()
    }

    /// Every table name across all databases, sorted and de-duplicated.
    pub fn all_tables(&self) -> Vec<String> {
        let state = self.read_state();
        let tables: BTreeSet<&str> = state.catalog.tables().map(|(_, t, _)| t).collect();
        tables.into_iter().map(str::to_string).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.read_state().catalog.is_empty()
    }

    /// Compare the stored schema of `name` with `live`. Unknown databases report every table as new.
    pub fn detect_drift(&self, name: &str, live: &TableColumns) -> SchemaDrift {
        let state = self.read_state();
        let empty = TableColumns::new();
        let known = state.catalog.database(name).unwrap_or(&empty);
        SchemaDrift::between(known, live)
    }

    /// Replace one database's tables and persist.
    ///
    /// The in-memory catalog is updated even when persisting fails; the error
    /// is logged and returned.
    pub fn update_database(&self, name: &str, tables: TableColumns) -> Result<()> {
        let snapshot = self.mutate(|catalog| catalog.upsert_database(name, tables));
        info!(database = name, "Updated schema catalog");
        self.persist(&snapshot)
    }

    pub fn remove_database(&self, name: &str) -> Result<bool> {
        if !self.read_state().catalog.contains_database(name) {
            return Ok(false);
        }
        let snapshot = self.mutate(|catalog| {
            catalog.remove_database(name);
        });
        info!(database = name, "Removed database from schema catalog");
        self.persist(&snapshot)?;
        Ok(true)
    }

    fn mutate(&self, apply: impl FnOnce(&mut Catalog)) -> Arc<Catalog> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let mut next = (*state.catalog).clone();
        apply(&mut next);
        *state = CatalogState::new(next);
        state.catalog.clone()
    }

    fn persist(&self, catalog: &Catalog) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_json(path, catalog).map_err(|e| {
            error!(path = %path.display(), error = %e, "Failed to save schema catalog");
            e
        })
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, CatalogState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
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

    fn scratch_file() -> PathBuf {
        std::env::temp_dir()
            .join(format!("sqlroute-catalog-{}", uuid::Uuid::new_v4()))
            .join("db_metadata.json")
    }

    #[test]
    fn test_persist_and_reload_round_trip() {
        let path = scratch_file();
        let catalog = SchemaCatalog::open(&path);
        assert!(catalog.is_empty());

        catalog
            .update_database(
                "crm_db",
                tables(&[("customers", &["customer_id", "first_name", "email"])]),
            )
            .unwrap();
        catalog
            .update_database("sales_db", tables(&[("orders", &["order_id", "customer_id"])]))
            .unwrap();

        let reloaded = SchemaCatalog::open(&path);
        assert_eq!(*reloaded.snapshot(), *catalog.snapshot());
        assert_eq!(
            reloaded.database("crm_db").unwrap()["customers"],
            vec!["customer_id", "first_name", "email"]
        );

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let path = scratch_file();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[1, 2").unwrap();

        let catalog = SchemaCatalog::open(&path);
        assert!(catalog.is_empty());

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_table_map_last_database_wins_on_collision() {
        let catalog = SchemaCatalog::in_memory(Catalog::new());
        catalog
            .update_database("alpha_db", tables(&[("users", &["id"])]))
            .unwrap();
        catalog
            .update_database("beta_db", tables(&[("users", &["id", "name"])]))
            .unwrap();

        // Both databases keep their own table; the derived index points at one of them.
        assert_eq!(catalog.database_for_table("users").as_deref(), Some("beta_db"));
        assert_eq!(catalog.all_tables(), vec!["users"]);
        assert!(catalog.database("alpha_db").is_some());
    }

    #[test]
    fn test_table_map_rebuilt_after_removal() {
        let catalog = SchemaCatalog::in_memory(Catalog::new());
        catalog
            .update_database("alpha_db", tables(&[("users", &["id"])]))
            .unwrap();
        catalog
            .update_database("beta_db", tables(&[("users", &["id"])]))
            .unwrap();

        assert!(catalog.remove_database("beta_db").unwrap());
        assert_eq!(catalog.database_for_table("users").as_deref(), Some("alpha_db"));
        assert!(!catalog.remove_database("beta_db").unwrap());
    }

    #[test]
    fn test_detect_drift_for_unknown_database() {
        let catalog = SchemaCatalog::in_memory(Catalog::new());
        let live = tables(&[("orders", &["id"])]);
        let drift = catalog.detect_drift("sales_db", &live);
        assert_eq!(drift.new_tables, vec!["orders"]);
    }

    #[test]
    fn test_snapshot_is_stable_across_updates() {
        let catalog = SchemaCatalog::in_memory(Catalog::new());
        catalog
            .update_database("a_db", tables(&[("t1", &["c"])]))
            .unwrap();
        let before = catalog.snapshot();
        catalog
            .update_database("b_db", tables(&[("t2", &["c"])]))
            .unwrap();

        assert_eq!(before.databases().len(), 1);
        assert_eq!(catalog.snapshot().databases().len(), 2);
    }
}
