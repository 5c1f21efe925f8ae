//! Keeps the catalog and semantic index in step with the live databases
//!
//! One sync pass:
//! 1. describe every registered database (failures are skipped and logged)
//! 2. write the catalog entry when the database is new or has drifted
//! 3. drop catalog entries whose database is no longer registered
//! 4. rebuild the semantic index once if anything changed, or if the index
//!    is behind the catalog (a previous rebuild did not complete)

use super::schema_catalog::SchemaCatalog;
use super::semantic_index::{RebuildStatus, SemanticIndex};
use crate::domain::catalog::SchemaDrift;
use crate::infrastructure::db::connectors::ConnectorRegistry;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SyncReport {
    pub checked: usize,
    pub changed: Vec<String>,
    pub unchanged: Vec<String>,
    pub removed: Vec<String>,
    /// Database name → error message.
    pub failed: BTreeMap<String, String>,
    pub drift: BTreeMap<String, SchemaDrift>,
    pub discovered: Vec<String>,
    pub index: Option<RebuildStatus>,
}

impl SyncReport {
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty() || !self.removed.is_empty()
    }
}

pub struct SchemaSync {
    catalog: Arc<SchemaCatalog>,
    index: Arc<SemanticIndex>,
    connectors: Arc<ConnectorRegistry>,
    databases_dir: Option<PathBuf>,
    running: Mutex<()>,
    /// Set while the last rebuild did not produce an index for the current catalog.
    needs_reindex: AtomicBool,
}

impl SchemaSync {
    pub fn new(
        catalog: Arc<SchemaCatalog>,
        index: Arc<SemanticIndex>,
        connectors: Arc<ConnectorRegistry>,
        databases_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            index,
            connectors,
            databases_dir,
            running: Mutex::new(()),
            needs_reindex: AtomicBool::new(false),
        }
    }

    /// Register new SQLite files from the databases directory, then sync.
    pub async fn discover_and_sync(&self) -> SyncReport {
        let _guard = self.running.lock().await;

        let mut discovered = Vec::new();
        if let Some(dir) = &self.databases_dir {
            match self.connectors.discover_sqlite(dir).await {
                Ok(added) => discovered = added,
                Err(e) => error!(dir = %dir.display(), error = %e, "Failed to scan databases directory"),
            }
        }

        let mut report = self.sync_locked().await;
        report.discovered = discovered;
        report
    }

    /// A failed earlier rebuild, or an index whose record counts disagree with the catalog.
    fn index_is_stale(&self) -> bool {
        if self.needs_reindex.load(Ordering::SeqCst) {
            return true;
        }
        let catalog = self.catalog.snapshot();
        let stale = self.index.record_counts() != (catalog.table_count(), catalog.column_count());
        if stale {
            info!("Semantic index is behind the catalog, rebuilding");
        }
        stale
    }

    pub async fn sync_all(&self) -> SyncReport {
        let _guard = self.running.lock().await;
        self.sync_locked().await
    }

    async fn sync_locked(&self) -> SyncReport {
        let mut report = SyncReport::default();
        let names = self.connectors.names().await;

        for name in &names {
            let Some(connector) = self.connectors.get(name).await else {
                continue;
            };
            report.checked += 1;

            let live = match connector.describe_schema().await {
                Ok(live) => live,
                Err(e) => {
                    warn!(database = %name, error = %e, "Skipping database, schema unavailable");
                    report.failed.insert(name.clone(), e.to_string());
                    continue;
                }
            };

            let known = self.catalog.database(name).is_some();
            let drift = self.catalog.detect_drift(name, &live);
            if known && drift.is_empty() {
                report.unchanged.push(name.clone());
                continue;
            }

            if known {
                info!(
                    database = %name,
                    new_tables = ?drift.new_tables,
                    removed_tables = ?drift.removed_tables,
                    new_columns = drift.new_columns.len(),
                    removed_columns = drift.removed_columns.len(),
                    "Schema change detected"
                );
            }
            if let Err(e) = self.catalog.update_database(name, live) {
                // In-memory state is updated regardless; only persistence failed.
                error!(database = %name, error = %e, "Failed to persist catalog");
            }
            report.changed.push(name.clone());
            report.drift.insert(name.clone(), drift);
        }

        for stale in self.catalog.snapshot().database_names() {
            if names.contains(&stale) {
                continue;
            }
            match self.catalog.remove_database(&stale) {
                Ok(_) => info!(database = %stale, "Dropped database no longer registered"),
                Err(e) => error!(database = %stale, error = %e, "Failed to persist catalog"),
            }
            report.removed.push(stale);
        }

        if report.has_changes() || self.index_is_stale() {
            let catalog = self.catalog.snapshot();
            let index = self.index.clone();
            let status = match tokio::task::spawn_blocking(move || index.rebuild(&catalog)).await {
                Ok(status) => status,
                Err(e) => RebuildStatus::Failed {
                    reason: format!("Index rebuild task failed: {}", e),
                },
            };
            let rebuilt = matches!(status, RebuildStatus::Rebuilt { .. });
            if !rebuilt {
                warn!(status = ?status, "Semantic index not rebuilt, retrying next sync");
            }
            self.needs_reindex.store(!rebuilt, Ordering::SeqCst);
            report.index = Some(status);
        }

        info!(
            checked = report.checked,
            changed = report.changed.len(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            "Schema sync finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::super::embedding_service::test_support::VocabularyEncoder;
    use super::super::embedding_service::{LazyEncoder, TextEncoder};
    use super::*;
    use crate::domain::catalog::{Catalog, TableColumns};
    use crate::domain::error::AppError;
    use crate::infrastructure::db::connectors::test_support::FakeConnector;

    fn tables(entries: &[(&str, &[&str])]) -> TableColumns {
        entries
            .iter()
            .map(|(t, cols)| (t.to_string(), cols.iter().map(|c| c.to_string()).collect()))
            .collect()
    }

    fn build(catalog: Catalog) -> (SchemaSync, Arc<SchemaCatalog>, Arc<SemanticIndex>, Arc<ConnectorRegistry>) {
        let catalog = Arc::new(SchemaCatalog::in_memory(catalog));
        let encoder: Arc<dyn TextEncoder> = Arc::new(VocabularyEncoder::new(512));
        let index = Arc::new(SemanticIndex::new(LazyEncoder::ready(encoder), None));
        let registry = Arc::new(ConnectorRegistry::default());
        let sync = SchemaSync::new(catalog.clone(), index.clone(), registry.clone(), None);
        (sync, catalog, index, registry)
    }

    #[tokio::test]
    async fn test_first_sync_adds_databases_and_builds_index() {
        let (sync, catalog, index, registry) = build(Catalog::new());
        registry
            .register(Arc::new(FakeConnector::new(
                "crm_db",
                tables(&[("customers", &["customer_id", "email"])]),
            )))
            .await;

        let report = sync.sync_all().await;
        assert_eq!(report.checked, 1);
        assert_eq!(report.changed, vec!["crm_db"]);
        assert_eq!(report.index, Some(RebuildStatus::Rebuilt { tables: 1, columns: 2 }));
        assert_eq!(catalog.database_for_table("customers").as_deref(), Some("crm_db"));
        assert_eq!(index.record_counts(), (1, 2));
    }

    #[tokio::test]
    async fn test_unchanged_schema_skips_rebuild() {
        let (sync, _catalog, index, registry) = build(Catalog::new());
        registry
            .register(Arc::new(FakeConnector::new(
                "crm_db",
                tables(&[("customers", &["customer_id"])]),
            )))
            .await;

        assert!(sync.sync_all().await.index.is_some());
        let report = sync.sync_all().await;
        assert_eq!(report.unchanged, vec!["crm_db"]);
        assert!(report.index.is_none());
        assert_eq!(index.record_counts(), (1, 1));
    }

    #[tokio::test]
    async fn test_empty_index_is_rebuilt_without_drift() {
        let schema = tables(&[("customers", &["customer_id", "email"])]);
        let mut known = Catalog::new();
        known.upsert_database("crm_db", schema.clone());
        let (sync, _catalog, index, registry) = build(known);
        registry
            .register(Arc::new(FakeConnector::new("crm_db", schema)))
            .await;

        let report = sync.sync_all().await;
        assert_eq!(report.unchanged, vec!["crm_db"]);
        assert_eq!(report.index, Some(RebuildStatus::Rebuilt { tables: 1, columns: 2 }));
        assert_ne!(index.record_counts(), (0, 0));
    }

    #[tokio::test]
    async fn test_unfinished_rebuild_is_retried() {
        let catalog = Arc::new(SchemaCatalog::in_memory(Catalog::new()));
        let index = Arc::new(SemanticIndex::new(
            LazyEncoder::new(Box::new(|| Err(AppError::EmbeddingError("offline".to_string())))),
            None,
        ));
        let registry = Arc::new(ConnectorRegistry::default());
        let sync = SchemaSync::new(catalog, index, registry.clone(), None);
        registry
            .register(Arc::new(FakeConnector::new("crm_db", tables(&[("t", &["c"])]))))
            .await;

        let first = sync.sync_all().await;
        assert_eq!(first.changed, vec!["crm_db"]);
        assert_eq!(first.index, Some(RebuildStatus::Unavailable));

        // No drift on the second pass, but the index is still owed a rebuild.
        let second = sync.sync_all().await;
        assert!(second.changed.is_empty());
        assert_eq!(second.index, Some(RebuildStatus::Unavailable));
    }

    #[tokio::test]
    async fn test_drift_updates_catalog() {
        let mut known = Catalog::new();
        known.upsert_database("crm_db", tables(&[("customers", &["customer_id"])]));
        let (sync, catalog, _index, registry) = build(known);

        let connector = Arc::new(FakeConnector::new(
            "crm_db",
            tables(&[("customers", &["customer_id", "email"]), ("leads", &["id"])]),
        ));
        registry.register(connector).await;

        let report = sync.sync_all().await;
        let drift = &report.drift["crm_db"];
        assert_eq!(drift.new_tables, vec!["leads"]);
        assert_eq!(drift.new_columns, vec![("customers".to_string(), "email".to_string())]);
        assert_eq!(catalog.database("crm_db").unwrap()["customers"], vec!["customer_id", "email"]);
    }

    #[tokio::test]
    async fn test_describe_failure_is_skipped() {
        let (sync, catalog, _index, registry) = build(Catalog::new());
        let broken = FakeConnector::new("broken_db", TableColumns::new());
        broken.set_schema(Err(AppError::DatabaseError("unable to open database file".to_string())));
        registry.register(Arc::new(broken)).await;
        registry
            .register(Arc::new(FakeConnector::new("ok_db", tables(&[("t", &["c"])]))))
            .await;

        let report = sync.sync_all().await;
        assert!(report.failed.contains_key("broken_db"));
        assert_eq!(report.changed, vec!["ok_db"]);
        assert!(catalog.database("broken_db").is_none());
    }

    #[tokio::test]
    async fn test_unregistered_databases_are_dropped() {
        let mut known = Catalog::new();
        known.upsert_database("gone_db", tables(&[("t", &["c"])]));
        let (sync, catalog, _index, _registry) = build(known);

        let report = sync.sync_all().await;
        assert_eq!(report.removed, vec!["gone_db"]);
        assert!(catalog.is_empty());
        assert!(matches!(report.index, Some(RebuildStatus::Rebuilt { tables: 0, columns: 0 })));
    }
}
