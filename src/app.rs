use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::domain::error::Result;
use crate::infrastructure::bootstrap::build_context;
use crate::infrastructure::config::AppConfig;
use crate::interfaces::http::start_server;

/// Load config, wire the context, sync schemas once, then serve until shutdown.
pub async fn run() -> Result<()> {
    let _ = dotenvy::dotenv();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let config = AppConfig::load()?;
    let ctx = build_context(config).await?;

    let report = ctx.schema_sync.discover_and_sync().await;
    if !report.failed.is_empty() {
        warn!(failed = ?report.failed.keys().collect::<Vec<_>>(), "Some databases could not be described");
    }
    info!(
        databases = report.checked,
        tables = ctx.catalog.all_tables().len(),
        "Initial schema sync complete"
    );

    if ctx.config.auto_refresh {
        ctx.start_refresh();
    }

    let server = start_server(ctx.clone())?;
    let served = server.await;

    info!("Shutting down");
    ctx.shutdown().await;
    served?;
    Ok(())
}
