//! Question → (database, table) resolution
//!
//! Semantic search is tried first and only accepted when it names both a
//! database and a table. Otherwise the lexical matcher picks a database, then
//! a table within it.

use super::lexical_matcher::LexicalMatcher;
use super::schema_catalog::SchemaCatalog;
use super::semantic_index::SemanticIndex;
use crate::domain::schema_entities::{Resolution, ResolutionMethod};
use std::sync::Arc;
use tracing::debug;

pub struct Resolver {
    catalog: Arc<SchemaCatalog>,
    index: Arc<SemanticIndex>,
}

impl Resolver {
    pub fn new(catalog: Arc<SchemaCatalog>, index: Arc<SemanticIndex>) -> Self {
        Self { catalog, index }
    }

    /// Synchronous; may load the embedding model on first call.
    pub fn resolve(&self, query: &str) -> Resolution {
        if self.index.is_available() {
            if let (Some(database), Some(table)) = self.index.best_database_and_table(query) {
                debug!(database = %database, table = %table, "Resolved semantically");
                return Resolution {
                    database: Some(database),
                    table: Some(table),
                    method: ResolutionMethod::Semantic,
                };
            }
        }

        let catalog = self.catalog.snapshot();
        let matcher = LexicalMatcher::new(&catalog);

        let Some(database) = LexicalMatcher::best(&matcher.score_databases(query)) else {
            debug!("No database matched the question");
            return Resolution::none();
        };
        let table = LexicalMatcher::best(&matcher.score_tables(query, Some(&database)));
        debug!(database = %database, table = ?table, "Resolved lexically");

        Resolution {
            database: Some(database),
            table,
            method: ResolutionMethod::Lexical,
        }
    }
}
