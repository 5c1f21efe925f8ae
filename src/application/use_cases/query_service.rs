//! Question → answer pipeline
//!
//! 1. resolve the question to a database and table
//! 2. produce SQL with the text generator, or the fallback builder when the
//!    generator is offline or returns nothing usable
//! 3. repair the SQL for the target dialect and execute it, retrying once
//!    after a syntax error
//! 4. optionally summarise non-empty results, streamed through the same sink

use super::dialect_adapter::{should_retry, DialectAdapter};
use super::fallback_sql::FallbackQueryBuilder;
use super::prompt_engine::PromptEngine;
use super::resolver::Resolver;
use super::schema_catalog::SchemaCatalog;
use super::sql_extractor::{extract_sql, strip_thinking};
use crate::domain::catalog::TableColumns;
use crate::domain::error::{AppError, Result};
use crate::domain::schema_entities::{ExecutionOutcome, ResolutionMethod};
use crate::infrastructure::db::connectors::{ConnectorRegistry, DatabaseConnector};
use crate::infrastructure::llm_clients::{TextGenerator, TextSink};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub default_limit: u32,
    pub stream_generation: bool,
    pub summarize: bool,
    pub unquote_identifiers: bool,
    pub sql_temperature: f32,
    pub summary_temperature: f32,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            default_limit: 10,
            stream_generation: true,
            summarize: true,
            unquote_identifiers: true,
            sql_temperature: 0.1,
            summary_temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlSource {
    Generator,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Succeeded { outcome: ExecutionOutcome },
    /// The engine's message for the first attempt, unchanged.
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryReport {
    pub question: String,
    pub database: String,
    pub table: String,
    pub method: ResolutionMethod,
    /// The statement that produced `execution`.
    pub sql: String,
    pub sql_source: SqlSource,
    pub retried: bool,
    pub execution: ExecutionStatus,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryAnswer {
    NoMatch { available_tables: Vec<String> },
    Answered(QueryReport),
}

pub struct QueryService {
    catalog: Arc<SchemaCatalog>,
    resolver: Arc<Resolver>,
    connectors: Arc<ConnectorRegistry>,
    generator: Arc<dyn TextGenerator>,
    fallback: FallbackQueryBuilder,
    options: QueryOptions,
}

impl QueryService {
    pub fn new(
        catalog: Arc<SchemaCatalog>,
        resolver: Arc<Resolver>,
        connectors: Arc<ConnectorRegistry>,
        generator: Arc<dyn TextGenerator>,
        options: QueryOptions,
    ) -> Self {
        Self {
            catalog,
            resolver,
            connectors,
            generator,
            fallback: FallbackQueryBuilder::new(options.default_limit),
            options,
        }
    }

    /// Answer one question. `sink` receives generated text as it streams in.
    pub async fn answer(&self, question: &str, mut sink: Option<TextSink<'_>>) -> Result<QueryAnswer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::ValidationError("Question cannot be empty".to_string()));
        }

        let resolver = self.resolver.clone();
        let owned_question = question.to_string();
        let resolution = tokio::task::spawn_blocking(move || resolver.resolve(&owned_question))
            .await
            .map_err(|e| AppError::Internal(format!("Resolution task failed: {}", e)))?;

        let Some(database) = resolution.database else {
            info!(question = %question, "No database matched");
            return Ok(QueryAnswer::NoMatch {
                available_tables: self.catalog.all_tables(),
            });
        };

        let tables = self.catalog.database(&database).ok_or_else(|| {
            AppError::NotFound(format!("Database '{}' is not in the catalog", database))
        })?;
        let table = choose_table(&database, resolution.table, &tables)?;
        let connector = self.connectors.get(&database).await.ok_or_else(|| {
            AppError::NotFound(format!("Database '{}' is not connected", database))
        })?;

        info!(database = %database, table = %table, method = ?resolution.method, "Resolved question");

        let generator_available = self.generator.is_available().await;
        let (sql, sql_source) = self
            .produce_sql(question, &database, &table, &tables, generator_available, &mut sink)
            .await;

        let adapter = DialectAdapter::new(connector.dialect())
            .with_unquote_identifiers(self.options.unquote_identifiers);
        let sql = adapter.adapt(&sql);
        let (sql, retried, execution) = execute_with_retry(connector.as_ref(), &adapter, sql).await;

        let summary = match &execution {
            ExecutionStatus::Succeeded { outcome }
                if self.options.summarize && generator_available && outcome.row_count() > 0 =>
            {
                self.summarize(question, &sql, outcome, &mut sink).await
            }
            _ => None,
        };

        Ok(QueryAnswer::Answered(QueryReport {
            question: question.to_string(),
            database,
            table,
            method: resolution.method,
            sql,
            sql_source,
            retried,
            execution,
            summary,
        }))
    }

    async fn produce_sql(
        &self,
        question: &str,
        database: &str,
        table: &str,
        tables: &TableColumns,
        generator_available: bool,
        sink: &mut Option<TextSink<'_>>,
    ) -> (String, SqlSource) {
        let columns = tables.get(table).map(Vec::as_slice).unwrap_or(&[]);
        let fallback = || (self.fallback.build(question, table, columns), SqlSource::Fallback);

        if !generator_available {
            warn!("Text generator unavailable, using fallback SQL");
            return fallback();
        }

        let request =
            PromptEngine::sql_request(question, database, tables, self.options.sql_temperature);
        let raw = match sink.as_deref_mut() {
            Some(sink) if self.options.stream_generation => {
                self.generator.generate_stream(&request, sink).await
            }
            _ => self.generator.generate(&request).await,
        };

        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "SQL generation failed, using fallback SQL");
                return fallback();
            }
        };

        let sql = extract_sql(&raw);
        if sql.is_empty() {
            warn!("Generator returned no SQL, using fallback SQL");
            return fallback();
        }
        if sql != raw.trim() {
            if let Some(sink) = sink.as_deref_mut() {
                sink(&sql);
            }
        }
        (sql, SqlSource::Generator)
    }

    async fn summarize(
        &self,
        question: &str,
        sql: &str,
        outcome: &ExecutionOutcome,
        sink: &mut Option<TextSink<'_>>,
    ) -> Option<String> {
        let request =
            PromptEngine::summary_request(question, sql, outcome, self.options.summary_temperature);
        let text = match sink.as_deref_mut() {
            Some(sink) if self.options.stream_generation => {
                self.generator.generate_stream(&request, sink).await
            }
            _ => self.generator.generate(&request).await,
        };
        match text {
            Ok(text) => {
                let summary = strip_thinking(&text);
                (!summary.is_empty()).then_some(summary)
            }
            Err(e) => {
                warn!(error = %e, "Summary generation failed");
                None
            }
        }
    }
}

/// Resolved table, else the database's only table, else its first table.
fn choose_table(database: &str, resolved: Option<String>, tables: &TableColumns) -> Result<String> {
    if let Some(table) = resolved {
        return Ok(table);
    }
    let mut names = tables.keys();
    match (names.next(), tables.len()) {
        (Some(only), 1) => Ok(only.clone()),
        (Some(first), _) => {
            warn!(database = database, table = %first, "No table matched, defaulting to first table");
            Ok(first.clone())
        }
        (None, _) => Err(AppError::NotFound(format!(
            "Database '{}' has no tables",
            database
        ))),
    }
}

/// Execute once; after a retryable syntax error run the repaired statement once more.
///
/// A failed retry reports the first error, not the retry's.
async fn execute_with_retry(
    connector: &dyn DatabaseConnector,
    adapter: &DialectAdapter,
    sql: String,
) -> (String, bool, ExecutionStatus) {
    let error = match connector.execute(&sql).await {
        Ok(outcome) => return (sql, false, ExecutionStatus::Succeeded { outcome }),
        Err(e) => e.message().to_string(),
    };

    if !should_retry(&error) {
        return (sql, false, ExecutionStatus::Failed { error });
    }

    let repaired = adapter.adapt_after_syntax_error(&sql);
    if repaired == sql {
        return (sql, false, ExecutionStatus::Failed { error });
    }

    info!(original = %sql, repaired = %repaired, "Retrying after syntax error");
    match connector.execute(&repaired).await {
        Ok(outcome) => (repaired, true, ExecutionStatus::Succeeded { outcome }),
        Err(retry_error) => {
            warn!(error = %retry_error, "Retry failed, reporting original error");
            (sql, true, ExecutionStatus::Failed { error })
        }
    }
}
