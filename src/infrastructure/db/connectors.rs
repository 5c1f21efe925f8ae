//! Connectors to the databases questions are routed to
//!
//! Each registered database is reached through a [`DatabaseConnector`]:
//! - schema introspection (`table -> ordered columns`)
//! - raw statement execution with rows rendered as JSON values
//!
//! Pools use bounded connection counts and every call is wrapped in a timeout.

use crate::domain::catalog::TableColumns;
use crate::domain::error::{AppError, Result};
use crate::domain::schema_entities::{ExecutionOutcome, SqlDialect};
use crate::infrastructure::config::{DatabaseConfig, DatabaseKind};
use crate::infrastructure::security::keyring::resolve_password;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Pool, Postgres, Row, Sqlite};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub query_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            connect_timeout_secs: 10,
            query_timeout_secs: 30,
            idle_timeout_secs: 300,
        }
    }
}

#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    fn name(&self) -> &str;
    fn dialect(&self) -> SqlDialect;
    async fn describe_schema(&self) -> Result<TableColumns>;
    /// Errors carry the engine's message unchanged.
    async fn execute(&self, sql: &str) -> Result<ExecutionOutcome>;
    async fn close(&self);
}

/// Statements whose result is a row set rather than an affected-row count.
pub fn returns_rows(sql: &str) -> bool {
    let head = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("")
        .to_uppercase();
    matches!(
        head.as_str(),
        "SELECT" | "WITH" | "PRAGMA" | "VALUES" | "EXPLAIN"
    )
}

async fn with_timeout<T, F>(secs: u64, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    tokio::time::timeout(Duration::from_secs(secs), fut)
        .await
        .map_err(|_| AppError::DatabaseError(format!("{} timed out after {} seconds", what, secs)))?
        .map_err(AppError::from)
}

pub struct SqliteConnector {
    name: String,
    path: PathBuf,
    pool: Pool<Sqlite>,
    query_timeout_secs: u64,
}

impl SqliteConnector {
    pub async fn open(name: &str, path: &Path, settings: &PoolSettings) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(settings.idle_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| {
                error!(database = name, path = %path.display(), error = %e, "Failed to open SQLite database");
                AppError::DatabaseError(format!("Failed to open SQLite database: {}", e))
            })?;

        info!(database = name, path = %path.display(), "Connected to SQLite database");
        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            pool,
            query_timeout_secs: settings.query_timeout_secs,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Column names of a statement without running it; empty results carry no rows to read them from.
    async fn describe_columns(&self, sql: &str) -> Vec<String> {
        match with_timeout(self.query_timeout_secs, "Describe", self.pool.describe(sql)).await {
            Ok(described) => described.columns().iter().map(|c| c.name().to_string()).collect(),
            Err(e) => {
                debug!(database = %self.name, error = %e, "Could not describe statement");
                Vec::new()
            }
        }
    }

    fn extract_column_value(row: &SqliteRow, index: usize) -> serde_json::Value {
        if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
            return v
                .map(|n| serde_json::Value::Number(n.into()))
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
            return v
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(index) {
            return v
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
            return v
                .map(|bytes| serde_json::Value::String(format!("<{} bytes>", bytes.len())))
                .unwrap_or(serde_json::Value::Null);
        }
        serde_json::Value::Null
    }
}

#[async_trait]
impl DatabaseConnector for SqliteConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    async fn describe_schema(&self) -> Result<TableColumns> {
        let tables: Vec<String> = with_timeout(
            self.query_timeout_secs,
            "Table listing",
            sqlx::query_scalar(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .fetch_all(&self.pool),
        )
        .await?;

        let mut schema = TableColumns::new();
        for table in tables {
            let columns: Vec<String> = with_timeout(
                self.query_timeout_secs,
                "Column listing",
                sqlx::query_scalar("SELECT name FROM pragma_table_info(?) ORDER BY cid")
                    .bind(&table)
                    .fetch_all(&self.pool),
            )
            .await?;
            schema.insert(table, columns);
        }
        Ok(schema)
    }

    async fn execute(&self, sql: &str) -> Result<ExecutionOutcome> {
        if !returns_rows(sql) {
            let result = with_timeout(
                self.query_timeout_secs,
                "Statement",
                sqlx::query(sql).execute(&self.pool),
            )
            .await?;
            return Ok(ExecutionOutcome::Affected {
                rows_affected: result.rows_affected(),
            });
        }

        let rows = with_timeout(
            self.query_timeout_secs,
            "Query",
            sqlx::query(sql).fetch_all(&self.pool),
        )
        .await?;

        let columns: Vec<String> = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => self.describe_columns(sql).await,
        };
        let rows = rows
            .iter()
            .map(|row| {
                (0..row.columns().len())
                    .map(|idx| Self::extract_column_value(row, idx))
                    .collect()
            })
            .collect();
        Ok(ExecutionOutcome::Rows { columns, rows })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

pub struct PostgresConnector {
    name: String,
    pool: Pool<Postgres>,
    query_timeout_secs: u64,
}

impl PostgresConnector {
    pub async fn connect(config: &DatabaseConfig, settings: &PoolSettings) -> Result<Self> {
        let password = match config.password_ref.as_deref() {
            Some(reference) => resolve_password(reference)?,
            None => String::new(),
        };
        let options = Self::build_options(config, &password)?;

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(settings.idle_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| {
                error!(database = %config.name, error = %e, "Failed to connect to PostgreSQL");
                AppError::DatabaseError(format!("Failed to connect to PostgreSQL: {}", e))
            })?;

        info!(
            database = %config.name,
            host = config.host.as_deref().unwrap_or("unknown"),
            "Created PostgreSQL connection pool"
        );
        Ok(Self {
            name: config.name.clone(),
            pool,
            query_timeout_secs: settings.query_timeout_secs,
        })
    }

    fn build_options(config: &DatabaseConfig, password: &str) -> Result<PgConnectOptions> {
        let host = config.host.as_deref().ok_or_else(|| {
            AppError::ValidationError("PostgreSQL host is required".to_string())
        })?;
        let database = config.database.as_deref().ok_or_else(|| {
            AppError::ValidationError("PostgreSQL database name is required".to_string())
        })?;

        let mut options = PgConnectOptions::new()
            .host(host)
            .port(config.port.unwrap_or(5432))
            .database(database)
            .ssl_mode(Self::parse_ssl_mode(config.ssl_mode.as_deref().unwrap_or("prefer")));
        if let Some(username) = config.username.as_deref() {
            options = options.username(username);
        }
        if !password.is_empty() {
            options = options.password(password);
        }
        Ok(options)
    }

    /// Column names of a statement without running it; empty results carry no rows to read them from.
    async fn describe_columns(&self, sql: &str) -> Vec<String> {
        match with_timeout(self.query_timeout_secs, "Describe", self.pool.describe(sql)).await {
            Ok(described) => described.columns().iter().map(|c| c.name().to_string()).collect(),
            Err(e) => {
                debug!(database = %self.name, error = %e, "Could not describe statement");
                Vec::new()
            }
        }
    }

    fn parse_ssl_mode(ssl_mode: &str) -> PgSslMode {
        match ssl_mode.to_lowercase().as_str() {
            "disable" => PgSslMode::Disable,
            "allow" => PgSslMode::Allow,
            "require" => PgSslMode::Require,
            "verify-ca" => PgSslMode::VerifyCa,
            "verify-full" => PgSslMode::VerifyFull,
            _ => PgSslMode::Prefer,
        }
    }

    fn extract_column_value(row: &PgRow, index: usize) -> serde_json::Value {
        if let Ok(v) = row.try_get::<Option<String>, _>(index) {
            return v
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
            return v
                .map(|n| serde_json::Value::Number(n.into()))
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(index) {
            return v
                .map(|n| serde_json::Value::Number(n.into()))
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(index) {
            return v
                .map(|n| serde_json::Value::Number(n.into()))
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
            return v
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f32>, _>(index) {
            return v
                .and_then(|n| serde_json::Number::from_f64(n as f64))
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<bigdecimal::BigDecimal>, _>(index) {
            return v
                .map(|d| {
                    d.to_string()
                        .parse::<f64>()
                        .ok()
                        .and_then(serde_json::Number::from_f64)
                        .map(serde_json::Value::Number)
                        .unwrap_or_else(|| serde_json::Value::String(d.to_string()))
                })
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
            return v
                .map(serde_json::Value::Bool)
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index) {
            return v
                .map(|dt| serde_json::Value::String(dt.to_rfc3339()))
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(index) {
            return v
                .map(|dt| serde_json::Value::String(dt.to_string()))
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(index) {
            return v
                .map(|d| serde_json::Value::String(d.to_string()))
                .unwrap_or(serde_json::Value::Null);
        }
        serde_json::Value::Null
    }
}

#[async_trait]
impl DatabaseConnector for PostgresConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    async fn describe_schema(&self) -> Result<TableColumns> {
        let rows: Vec<(String, String)> = with_timeout(
            self.query_timeout_secs,
            "Schema listing",
            sqlx::query_as(
                "SELECT c.table_name::text, c.column_name::text
                 FROM information_schema.columns c
                 JOIN information_schema.tables t
                   ON t.table_schema = c.table_schema AND t.table_name = c.table_name
                 WHERE c.table_schema = 'public' AND t.table_type = 'BASE TABLE'
                 ORDER BY c.table_name, c.ordinal_position",
            )
            .fetch_all(&self.pool),
        )
        .await?;

        let mut schema = TableColumns::new();
        for (table, column) in rows {
            schema.entry(table).or_default().push(column);
        }
        Ok(schema)
    }

    async fn execute(&self, sql: &str) -> Result<ExecutionOutcome> {
        if !returns_rows(sql) {
            let result = with_timeout(
                self.query_timeout_secs,
                "Statement",
                sqlx::query(sql).execute(&self.pool),
            )
            .await?;
            return Ok(ExecutionOutcome::Affected {
                rows_affected: result.rows_affected(),
            });
        }

        let rows = with_timeout(
            self.query_timeout_secs,
            "Query",
            sqlx::query(sql).fetch_all(&self.pool),
        )
        .await?;

        let columns: Vec<String> = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => self.describe_columns(sql).await,
        };
        let rows = rows
            .iter()
            .map(|row| {
                (0..row.columns().len())
                    .map(|idx| Self::extract_column_value(row, idx))
                    .collect()
            })
            .collect();
        Ok(ExecutionOutcome::Rows { columns, rows })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Named connectors, shared by the sync job and the query pipeline.
pub struct ConnectorRegistry {
    connectors: RwLock<HashMap<String, Arc<dyn DatabaseConnector>>>,
    settings: PoolSettings,
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new(PoolSettings::default())
    }
}

impl ConnectorRegistry {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            connectors: RwLock::new(HashMap::new()),
            settings,
        }
    }

    /// Add or replace a connector. A replaced connector is closed.
    pub async fn register(&self, connector: Arc<dyn DatabaseConnector>) {
        let name = connector.name().to_string();
        let previous = self.connectors.write().await.insert(name.clone(), connector);
        if let Some(previous) = previous {
            info!(database = %name, "Replacing database connector");
            previous.close().await;
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn DatabaseConnector>> {
        self.connectors.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.connectors.read().await.contains_key(name)
    }

    /// Registered names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connectors.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn remove(&self, name: &str) -> bool {
        let removed = self.connectors.write().await.remove(name);
        match removed {
            Some(connector) => {
                connector.close().await;
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&self) {
        let drained: Vec<_> = self.connectors.write().await.drain().collect();
        for (name, connector) in drained {
            info!(database = %name, "Closing database connector");
            connector.close().await;
        }
    }

    /// Open and register the database described by `config`.
    pub async fn connect(&self, config: &DatabaseConfig) -> Result<()> {
        let connector: Arc<dyn DatabaseConnector> = match config.kind {
            DatabaseKind::Sqlite => {
                let path = config.path.as_deref().ok_or_else(|| {
                    AppError::ValidationError(format!(
                        "SQLite database '{}' requires a path",
                        config.name
                    ))
                })?;
                Arc::new(SqliteConnector::open(&config.name, path, &self.settings).await?)
            }
            DatabaseKind::Postgres => {
                Arc::new(PostgresConnector::connect(config, &self.settings).await?)
            }
        };
        self.register(connector).await;
        Ok(())
    }

    /// Register every `*.db` file in `dir` not yet known, as `<file stem>_db`.
    ///
    /// Returns the names that were added. A missing directory adds nothing.
    pub async fn discover_sqlite(&self, dir: &Path) -> Result<Vec<String>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "db"))
            .collect();
        paths.sort();

        let mut added = Vec::new();
        for path in paths {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let name = format!("{}_db", stem);
            if self.contains(&name).await {
                continue;
            }
            match SqliteConnector::open(&name, &path, &self.settings).await {
                Ok(connector) => {
                    self.register(Arc::new(connector)).await;
                    added.push(name);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping SQLite file"),
            }
        }

        if !added.is_empty() {
            info!(databases = ?added, "Discovered SQLite databases");
        }
        Ok(added)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// In-memory connector with a fixed schema and scripted execution results.
    pub struct FakeConnector {
        name: String,
        dialect: SqlDialect,
        schema: Mutex<Result<TableColumns>>,
        results: Mutex<Vec<Result<ExecutionOutcome>>>,
        pub executed: Mutex<Vec<String>>,
    }

    impl FakeConnector {
        pub fn new(name: &str, schema: TableColumns) -> Self {
            Self {
                name: name.to_string(),
                dialect: SqlDialect::Sqlite,
                schema: Mutex::new(Ok(schema)),
                results: Mutex::new(Vec::new()),
                executed: Mutex::new(Vec::new()),
            }
        }

        pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
            self.dialect = dialect;
            self
        }

        /// Results returned by successive `execute` calls; later calls reuse an empty row set.
        pub fn with_results(self, results: Vec<Result<ExecutionOutcome>>) -> Self {
            *self.results.lock().unwrap() = results.into_iter().rev().collect();
            self
        }

        pub fn set_schema(&self, schema: Result<TableColumns>) {
            *self.schema.lock().unwrap() = schema;
        }
    }

    #[async_trait]
    impl DatabaseConnector for FakeConnector {
        fn name(&self) -> &str {
            &self.name
        }

        fn dialect(&self) -> SqlDialect {
            self.dialect
        }

        async fn describe_schema(&self) -> Result<TableColumns> {
            self.schema.lock().unwrap().clone()
        }

        async fn execute(&self, sql: &str) -> Result<ExecutionOutcome> {
            self.executed.lock().unwrap().push(sql.to_string());
            self.results.lock().unwrap().pop().unwrap_or(Ok(ExecutionOutcome::Rows {
                columns: Vec::new(),
                rows: Vec::new(),
            }))
        }

        async fn close(&self) {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sqlroute-db-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    async fn create_sample_db(path: &Path) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::new().filename(path).create_if_missing(true))
            .await
            .unwrap();
        for stmt in [
            "CREATE TABLE customers (customer_id INTEGER PRIMARY KEY, first_name TEXT, email TEXT)",
            "CREATE TABLE orders (order_id INTEGER PRIMARY KEY, customer_id INTEGER, total REAL)",
            "INSERT INTO customers VALUES (1, 'Ada', 'ada@example.com'), (2, 'Linus', NULL)",
            "INSERT INTO orders VALUES (10, 1, 19.5), (11, 2, 5.0)",
        ] {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }
        pool.close().await;
    }

    #[test]
    fn test_returns_rows_classification() {
        assert!(returns_rows("  select 1"));
        assert!(returns_rows("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(returns_rows("PRAGMA table_info(t)"));
        assert!(!returns_rows("UPDATE t SET a = 1"));
        assert!(!returns_rows("CREATE TABLE t (a INTEGER)"));
        assert!(!returns_rows(""));
    }

    #[tokio::test]
    async fn test_sqlite_schema_and_queries() {
        let dir = scratch_dir();
        let path = dir.join("shop.db");
        create_sample_db(&path).await;

        let connector = SqliteConnector::open("shop_db", &path, &PoolSettings::default())
            .await
            .unwrap();

        let schema = connector.describe_schema().await.unwrap();
        assert_eq!(schema.keys().collect::<Vec<_>>(), vec!["customers", "orders"]);
        assert_eq!(schema["customers"], vec!["customer_id", "first_name", "email"]);

        let outcome = connector
            .execute("SELECT first_name, email FROM customers ORDER BY customer_id")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ExecutionOutcome::Rows {
                columns: vec!["first_name".to_string(), "email".to_string()],
                rows: vec![
                    vec![json!("Ada"), json!("ada@example.com")],
                    vec![json!("Linus"), serde_json::Value::Null],
                ],
            }
        );

        let count = connector.execute("SELECT COUNT(*) AS n FROM orders").await.unwrap();
        assert_eq!(count.row_count(), 1);

        let updated = connector
            .execute("UPDATE orders SET total = total + 1")
            .await
            .unwrap();
        assert_eq!(updated, ExecutionOutcome::Affected { rows_affected: 2 });

        connector.close().await;
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_sqlite_empty_result_keeps_column_names() {
        let dir = scratch_dir();
        let path = dir.join("shop.db");
        create_sample_db(&path).await;
        let connector = SqliteConnector::open("shop_db", &path, &PoolSettings::default())
            .await
            .unwrap();

        let outcome = connector
            .execute("SELECT first_name, email FROM customers WHERE customer_id = 99")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ExecutionOutcome::Rows {
                columns: vec!["first_name".to_string(), "email".to_string()],
                rows: Vec::new(),
            }
        );

        connector.close().await;
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_sqlite_syntax_error_message_is_kept() {
        let dir = scratch_dir();
        let path = dir.join("shop.db");
        create_sample_db(&path).await;
        let connector = SqliteConnector::open("shop_db", &path, &PoolSettings::default())
            .await
            .unwrap();

        let err = connector
            .execute("SELECT * FROM orders WHERE total >> > 3")
            .await
            .unwrap_err();
        assert!(matches!(&err, AppError::DatabaseError(msg) if msg.contains("syntax error")));

        connector.close().await;
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_discover_sqlite_names_by_stem() {
        let dir = scratch_dir();
        create_sample_db(&dir.join("sales.db")).await;
        create_sample_db(&dir.join("crm.db")).await;
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let registry = ConnectorRegistry::default();
        let added = registry.discover_sqlite(&dir).await.unwrap();
        assert_eq!(added, vec!["crm_db", "sales_db"]);
        assert_eq!(registry.names().await, vec!["crm_db", "sales_db"]);

        // Second scan finds nothing new.
        assert!(registry.discover_sqlite(&dir).await.unwrap().is_empty());
        assert!(registry
            .discover_sqlite(&dir.join("missing"))
            .await
            .unwrap()
            .is_empty());

        registry.close_all().await;
        assert!(registry.names().await.is_empty());
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_registry_replace_and_remove() {
        let registry = ConnectorRegistry::default();
        registry
            .register(Arc::new(test_support::FakeConnector::new("a_db", TableColumns::new())))
            .await;
        registry
            .register(Arc::new(
                test_support::FakeConnector::new("a_db", TableColumns::new())
                    .with_dialect(SqlDialect::Postgres),
            ))
            .await;

        let connector = registry.get("a_db").await.unwrap();
        assert_eq!(connector.dialect(), SqlDialect::Postgres);
        assert!(registry.remove("a_db").await);
        assert!(!registry.remove("a_db").await);
    }

    #[test]
    fn test_postgres_options_require_host() {
        let mut config = DatabaseConfig::sqlite("pg", "unused");
        config.kind = DatabaseKind::Postgres;
        config.database = Some("app".to_string());
        assert!(PostgresConnector::build_options(&config, "").is_err());
        config.host = Some("localhost".to_string());
        assert!(PostgresConnector::build_options(&config, "secret").is_ok());
    }
}
