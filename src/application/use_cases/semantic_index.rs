//! Semantic index over catalog descriptions
//!
//! Every table and every column gets a templated description and an
//! embedding. Search runs a flat (exhaustive) squared-L2 scan over the
//! embeddings of all table records followed by all column records; a hit's
//! position maps straight back to its record.
//!
//! The index is rebuilt in full whenever the catalog changes and swapped in
//! atomically. The embedding model loads lazily on first use; when it cannot
//! load, rebuilds keep the previous index and searches return nothing.

use super::embedding_service::{squared_l2_distance, EncoderStatus, LazyEncoder};
use crate::domain::catalog::Catalog;
use crate::domain::error::{AppError, Result};
use crate::domain::schema_entities::{MatchResult, RecordKind, TextRecord};
use crate::infrastructure::storage::{read_json, write_json};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

/// Number of hits aggregated when picking a database and table.
pub const BEST_MATCH_TOP_K: usize = 5;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedRecords {
    #[serde(default)]
    tables: Vec<TextRecord>,
    #[serde(default)]
    columns: Vec<TextRecord>,
}

/// Exhaustive nearest-neighbour search over row-major vectors.
#[derive(Debug, Default)]
struct FlatL2Index {
    dimension: usize,
    vectors: Vec<f32>,
}

impl FlatL2Index {
    fn build<'a>(dimension: usize, embeddings: impl Iterator<Item = &'a [f32]>) -> Self {
        let mut vectors = Vec::new();
        for embedding in embeddings {
            vectors.extend_from_slice(embedding);
        }
        Self { dimension, vectors }
    }

    fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.vectors.len() / self.dimension
        }
    }

    /// `(position, squared distance)` pairs, nearest first, at most `k`.
    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if query.len() != self.dimension || k == 0 {
            return Vec::new();
        }
        let mut hits: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(idx, vector)| (idx, squared_l2_distance(query, vector)))
            .collect();
        // Stable sort keeps index order among equal distances.
        hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        hits
    }
}

#[derive(Debug, Default)]
struct IndexSnapshot {
    tables: Vec<TextRecord>,
    columns: Vec<TextRecord>,
    index: FlatL2Index,
}

impl IndexSnapshot {
    /// Build from records, rejecting any embedding whose width differs from the rest.
    fn from_records(tables: Vec<TextRecord>, columns: Vec<TextRecord>) -> Result<Self> {
        let dimension = tables
            .iter()
            .chain(columns.iter())
            .map(|r| r.embedding.len())
            .next()
            .unwrap_or(0);

        if let Some(bad) = tables
            .iter()
            .chain(columns.iter())
            .find(|r| r.embedding.len() != dimension || dimension == 0)
        {
            return Err(AppError::EmbeddingError(format!(
                "Embedding for {}.{} has dimension {}, expected {}",
                bad.database_name,
                bad.table_name,
                bad.embedding.len(),
                dimension
            )));
        }

        let index = FlatL2Index::build(
            dimension,
            tables
                .iter()
                .chain(columns.iter())
                .map(|r| r.embedding.as_slice()),
        );
        Ok(Self {
            tables,
            columns,
            index,
        })
    }

    fn record(&self, position: usize) -> Option<&TextRecord> {
        if position < self.tables.len() {
            self.tables.get(position)
        } else {
            self.columns.get(position - self.tables.len())
        }
    }
}

/// Outcome of [`SemanticIndex::rebuild`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RebuildStatus {
    Rebuilt { tables: usize, columns: usize },
    /// The embedding backend could not be loaded; the previous index is kept.
    Unavailable,
    /// Encoding failed part-way; the previous index is kept.
    Failed { reason: String },
}

pub struct SemanticIndex {
    encoder: LazyEncoder,
    embeddings_path: Option<PathBuf>,
    snapshot: RwLock<Arc<IndexSnapshot>>,
}

impl SemanticIndex {
    /// Create the index, loading persisted records from `embeddings_path` if present.
    ///
    /// Loading records does not load the embedding model.
    pub fn new(encoder: LazyEncoder, embeddings_path: Option<PathBuf>) -> Self {
        let snapshot = embeddings_path
            .as_ref()
            .map(|path| Self::load_snapshot(path))
            .unwrap_or_default();

        Self {
            encoder,
            embeddings_path,
            snapshot: RwLock::new(Arc::new(snapshot)),
        }
    }

    fn load_snapshot(path: &Path) -> IndexSnapshot {
        let persisted = match read_json::<PersistedRecords>(path) {
            Ok(Some(persisted)) => persisted,
            Ok(None) => return IndexSnapshot::default(),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to load embeddings");
                return IndexSnapshot::default();
            }
        };
        if persisted.tables.is_empty() && persisted.columns.is_empty() {
            return IndexSnapshot::default();
        }
        match IndexSnapshot::from_records(persisted.tables, persisted.columns) {
            Ok(snapshot) => {
                info!(
                    path = %path.display(),
                    embeddings = snapshot.index.len(),
                    "Rebuilt index from persisted embeddings"
                );
                snapshot
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Discarding persisted embeddings");
                IndexSnapshot::default()
            }
        }
    }

    /// True once the embedding backend has loaded. The first call triggers the load.
    pub fn is_available(&self) -> bool {
        self.encoder.is_available()
    }

    pub fn encoder_status(&self) -> EncoderStatus {
        self.encoder.status()
    }

    /// `(table records, column records)` currently indexed.
    pub fn record_counts(&self) -> (usize, usize) {
        let snapshot = self.current();
        (snapshot.tables.len(), snapshot.columns.len())
    }

    /// Regenerate every record from `catalog` and swap in a fresh index.
    pub fn rebuild(&self, catalog: &Catalog) -> RebuildStatus {
        let Some(encoder) = self.encoder.get() else {
            warn!("Semantic search is not available, keeping the current index");
            return RebuildStatus::Unavailable;
        };

        let mut tables = Vec::new();
        let mut columns = Vec::new();
        for (db, table, table_columns) in catalog.tables() {
            tables.push(TextRecord {
                database_name: db.to_string(),
                table_name: table.to_string(),
                column_name: None,
                description: TextRecord::table_description(db, table, table_columns),
                embedding: Vec::new(),
            });
            for column in table_columns {
                columns.push(TextRecord {
                    database_name: db.to_string(),
                    table_name: table.to_string(),
                    column_name: Some(column.clone()),
                    description: TextRecord::column_description(db, table, column),
                    embedding: Vec::new(),
                });
            }
        }

        let descriptions: Vec<String> = tables
            .iter()
            .chain(columns.iter())
            .map(|r| r.description.clone())
            .collect();

        let embeddings = match encoder.encode(&descriptions) {
            Ok(embeddings) if embeddings.len() == descriptions.len() => embeddings,
            Ok(embeddings) => {
                let reason = format!(
                    "Expected {} embeddings, got {}",
                    descriptions.len(),
                    embeddings.len()
                );
                error!(reason = %reason, "Semantic index rebuild failed");
                return RebuildStatus::Failed { reason };
            }
            Err(e) => {
                error!(error = %e, "Semantic index rebuild failed");
                return RebuildStatus::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let mut embeddings = embeddings.into_iter();
        for record in tables.iter_mut().chain(columns.iter_mut()) {
            record.embedding = embeddings.next().unwrap_or_default();
        }

        let snapshot = if tables.is_empty() && columns.is_empty() {
            IndexSnapshot::default()
        } else {
            match IndexSnapshot::from_records(tables, columns) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    error!(error = %e, "Semantic index rebuild failed");
                    return RebuildStatus::Failed {
                        reason: e.to_string(),
                    };
                }
            }
        };

        if snapshot.index.len() > 0 && snapshot.index.dimension != encoder.dimension() {
            warn!(
                index = snapshot.index.dimension,
                encoder = encoder.dimension(),
                "Encoder produced vectors of an unexpected width"
            );
        }

        let status = RebuildStatus::Rebuilt {
            tables: snapshot.tables.len(),
            columns: snapshot.columns.len(),
        };
        self.persist(&snapshot);
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(snapshot);

        info!(?status, "Updated semantic index");
        status
    }

    /// Nearest records to `query`, most similar first, at most `k`.
    ///
    /// `score = 1 / (1 + squared L2 distance)`.
    pub fn search(&self, query: &str, k: usize) -> Vec<MatchResult> {
        let snapshot = self.current();
        if snapshot.index.len() == 0 {
            return Vec::new();
        }
        let Some(encoder) = self.encoder.get() else {
            return Vec::new();
        };

        let query_embedding = match encoder.encode(&[query.to_string()]) {
            Ok(mut vectors) if !vectors.is_empty() => vectors.swap_remove(0),
            Ok(_) => return Vec::new(),
            Err(e) => {
                error!(error = %e, "Error during vector search");
                return Vec::new();
            }
        };

        snapshot
            .index
            .search(&query_embedding, k)
            .into_iter()
            .filter_map(|(position, distance)| {
                let record = snapshot.record(position)?;
                Some(MatchResult {
                    database_name: record.database_name.clone(),
                    table_name: record.table_name.clone(),
                    column_name: record.column_name.clone(),
                    kind: record.kind(),
                    score: 1.0 / (1.0 + distance),
                })
            })
            .collect()
    }

    /// Pick a database by summed similarity over the top hits, then a table within it.
    ///
    /// Ties go to whichever candidate appeared first in the ranked hits.
    pub fn best_database_and_table(&self, query: &str) -> (Option<String>, Option<String>) {
        let results = self.search(query, BEST_MATCH_TOP_K);
        if results.is_empty() {
            return (None, None);
        }

        let db_scores = sum_by(results.iter().map(|r| (&r.database_name, r.score)));
        let Some(best_db) = pick_max(&db_scores) else {
            return (None, None);
        };

        let table_scores = sum_by(
            results
                .iter()
                .filter(|r| &r.database_name == best_db)
                .map(|r| (&r.table_name, r.score)),
        );
        let best_table = pick_max(&table_scores).cloned();

        debug!(
            database = %best_db,
            table = ?best_table,
            hits = results.len(),
            column_hits = results.iter().filter(|r| r.kind == RecordKind::Column).count(),
            "Semantic match"
        );
        (Some(best_db.clone()), best_table)
    }

    fn current(&self) -> Arc<IndexSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn persist(&self, snapshot: &IndexSnapshot) {
        let Some(path) = &self.embeddings_path else {
            return;
        };
        #[derive(Serialize)]
        struct PersistedRef<'a> {
            tables: &'a [TextRecord],
            columns: &'a [TextRecord],
        }
        let blob = PersistedRef {
            tables: &snapshot.tables,
            columns: &snapshot.columns,
        };
        match write_json(path, &blob) {
            Ok(()) => info!(path = %path.display(), "Saved embeddings"),
            Err(e) => error!(path = %path.display(), error = %e, "Error saving embeddings"),
        }
    }
}

/// Sum scores per key, keeping keys in first-seen order.
fn sum_by<'a>(items: impl Iterator<Item = (&'a String, f32)>) -> Vec<(&'a String, f32)> {
    let mut sums: Vec<(&String, f32)> = Vec::new();
    for (key, score) in items {
        match sums.iter_mut().find(|(k, _)| *k == key) {
            Some((_, total)) => *total += score,
            None => sums.push((key, score)),
        }
    }
    sums
}

fn pick_max<'a>(sums: &[(&'a String, f32)]) -> Option<&'a String> {
    let mut best: Option<(&String, f32)> = None;
    for (key, score) in sums {
        if best.map_or(true, |(_, s)| *score > s) {
            best = Some((key, *score));
        }
    }
    best.map(|(key, _)| key)
}
