//! Keyword matcher over catalog table and column names
//!
//! Scores a query by plain substring containment:
//! - every table name found in the query adds [`TABLE_MATCH_WEIGHT`]
//! - every column name found in the query adds [`COLUMN_MATCH_WEIGHT`]
//!
//! This is the deterministic fallback beneath semantic search. It misses
//! paraphrases ("clients" vs "customers") but needs no model.

use crate::domain::catalog::Catalog;
use std::collections::BTreeMap;

pub const TABLE_MATCH_WEIGHT: u32 = 5;
pub const COLUMN_MATCH_WEIGHT: u32 = 2;

pub struct LexicalMatcher<'a> {
    catalog: &'a Catalog,
}

impl<'a> LexicalMatcher<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Score every database that has at least one table or column mentioned in `query`.
    pub fn score_databases(&self, query: &str) -> BTreeMap<String, u32> {
        let query_lower = query.to_lowercase();
        let mut scores = BTreeMap::new();

        for (db_name, tables) in self.catalog.databases() {
            let score: u32 = tables
                .iter()
                .map(|(table, columns)| Self::score_table(&query_lower, table, columns))
                .sum();
            if score > 0 {
                scores.insert(db_name.clone(), score);
            }
        }

        scores
    }

    /// Score tables mentioned in `query`, optionally limited to one database.
    ///
    /// A filter naming an unknown database scans every database. When the
    /// same table name appears in several scanned databases the later one
    /// overwrites the earlier score.
    pub fn score_tables(&self, query: &str, db_filter: Option<&str>) -> BTreeMap<String, u32> {
        let query_lower = query.to_lowercase();
        let mut scores = BTreeMap::new();

        let filter = db_filter.filter(|db| self.catalog.contains_database(db));

        for (db_name, tables) in self.catalog.databases() {
            if filter.is_some_and(|wanted| wanted != db_name.as_str()) {
                continue;
            }
            for (table, columns) in tables {
                let score = Self::score_table(&query_lower, table, columns);
                if score > 0 {
                    scores.insert(table.clone(), score);
                }
            }
        }

        scores
    }

    /// Highest-scoring key; the first in name order wins a tie.
    pub fn best(scores: &BTreeMap<String, u32>) -> Option<String> {
        let mut best: Option<(&String, u32)> = None;
        for (name, score) in scores {
            if best.map_or(true, |(_, s)| *score > s) {
                best = Some((name, *score));
            }
        }
        best.map(|(name, _)| name.clone())
    }

    fn score_table(query_lower: &str, table: &str, columns: &[String]) -> u32 {
        let mut score = 0;
        if query_lower.contains(&table.to_lowercase()) {
            score += TABLE_MATCH_WEIGHT;
        }
        for column in columns {
            if query_lower.contains(&column.to_lowercase()) {
                score += COLUMN_MATCH_WEIGHT;
            }
        }
        score
    }
}
