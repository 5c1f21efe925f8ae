use crate::application::use_cases::refresh_task::PeriodicTask;
use crate::application::use_cases::schema_catalog::SchemaCatalog;
use crate::application::use_cases::semantic_index::SemanticIndex;
use crate::application::{QueryService, SchemaSync};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::db::connectors::ConnectorRegistry;
use crate::infrastructure::llm_clients::TextGenerator;
use std::sync::Arc;

/// Everything the interfaces need, built once at startup.
pub struct AppContext {
    pub config: AppConfig,
    pub catalog: Arc<SchemaCatalog>,
    pub semantic_index: Arc<SemanticIndex>,
    pub connectors: Arc<ConnectorRegistry>,
    pub generator: Arc<dyn TextGenerator>,
    pub schema_sync: Arc<SchemaSync>,
    pub refresh_task: PeriodicTask,
    pub query_service: QueryService,
}

impl AppContext {
    /// Start the background discover-and-sync loop. False when already running.
    pub fn start_refresh(&self) -> bool {
        let sync = self.schema_sync.clone();
        self.refresh_task.start(move || {
            let sync = sync.clone();
            async move {
                sync.discover_and_sync().await;
            }
        })
    }

    pub fn stop_refresh(&self) -> bool {
        self.refresh_task.stop()
    }

    pub async fn shutdown(&self) {
        self.refresh_task.stop_and_wait().await;
        self.connectors.close_all().await;
    }
}
