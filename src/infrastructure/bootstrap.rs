use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::application::use_cases::embedding_service::LazyEncoder;
use crate::application::use_cases::query_service::{QueryOptions, QueryService};
use crate::application::use_cases::refresh_task::PeriodicTask;
use crate::application::use_cases::resolver::Resolver;
use crate::application::use_cases::schema_catalog::SchemaCatalog;
use crate::application::use_cases::schema_sync::SchemaSync;
use crate::application::use_cases::semantic_index::SemanticIndex;
use crate::domain::error::Result;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::db::connectors::{ConnectorRegistry, PoolSettings};
use crate::infrastructure::llm_clients::{OllamaClient, TextGenerator};
use crate::infrastructure::storage::resolve_data_dir;
use crate::interfaces::state::AppContext;

pub const REFRESH_TASK_NAME: &str = "schema-refresh";

/// Wire every component from `config`. Databases that fail to connect are logged and skipped.
pub async fn build_context(config: AppConfig) -> Result<Arc<AppContext>> {
    let data_dir = resolve_data_dir(&config.data_dir).map_err(|err| {
        error!(error = %err, data_dir = %config.data_dir.display(), "Failed to create data dir");
        err
    })?;
    info!(data_dir = %data_dir.display(), "Using data directory");

    let catalog = Arc::new(SchemaCatalog::open(config.catalog_path()));
    let encoder = LazyEncoder::fastembed(
        config.embedding.model.clone(),
        config.embedding.cache_dir.clone(),
    );
    let semantic_index = Arc::new(SemanticIndex::new(encoder, Some(config.embeddings_path())));

    let connectors = Arc::new(ConnectorRegistry::new(PoolSettings::default()));
    for db in &config.databases {
        if let Err(err) = connectors.connect(db).await {
            warn!(database = %db.name, error = %err, "Skipping database, connection failed");
        }
    }

    let generator: Arc<dyn TextGenerator> = Arc::new(OllamaClient::new(config.llm.clone())?);

    let schema_sync = Arc::new(SchemaSync::new(
        catalog.clone(),
        semantic_index.clone(),
        connectors.clone(),
        Some(config.databases_dir.clone()),
    ));
    let refresh_task = PeriodicTask::new(
        REFRESH_TASK_NAME,
        Duration::from_secs(config.refresh_interval_secs),
    );

    let resolver = Arc::new(Resolver::new(catalog.clone(), semantic_index.clone()));
    let query_service = QueryService::new(
        catalog.clone(),
        resolver,
        connectors.clone(),
        generator.clone(),
        query_options(&config),
    );

    Ok(Arc::new(AppContext {
        config,
        catalog,
        semantic_index,
        connectors,
        generator,
        schema_sync,
        refresh_task,
        query_service,
    }))
}

fn query_options(config: &AppConfig) -> QueryOptions {
    QueryOptions {
        default_limit: config.query.default_limit,
        stream_generation: config.query.stream_generation,
        summarize: config.query.summarize,
        unquote_identifiers: config.query.unquote_identifiers,
        sql_temperature: config.llm.sql_temperature,
        summary_temperature: config.llm.summary_temperature,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::DatabaseConfig;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sqlroute-bootstrap-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_build_context_skips_unreachable_databases() {
        let dir = temp_dir();
        let config = AppConfig {
            data_dir: dir.join("data"),
            databases_dir: dir.join("databases"),
            databases: vec![DatabaseConfig::sqlite("missing_db", dir.join("missing.db"))],
            ..AppConfig::default()
        };

        let ctx = build_context(config).await.unwrap();
        assert!(ctx.connectors.names().await.is_empty());
        assert!(ctx.catalog.is_empty());
        assert!(dir.join("data").is_dir());
        assert!(!ctx.refresh_task.is_running());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_query_options_follow_config() {
        let mut config = AppConfig::default();
        config.query.default_limit = 25;
        config.query.summarize = false;
        config.llm.sql_temperature = 0.0;

        let options = query_options(&config);
        assert_eq!(options.default_limit, 25);
        assert!(!options.summarize);
        assert_eq!(options.sql_temperature, 0.0);
        assert_eq!(options.summary_temperature, 0.7);
    }
}
