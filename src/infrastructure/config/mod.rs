//! Layered application configuration
//!
//! Built-in defaults, then `sqlroute.toml` (or the file named by
//! `SQLROUTE_CONFIG`), then `SQLROUTE_*` environment variables with `__`
//! separating nested keys, e.g. `SQLROUTE_HTTP__PORT=8080`.

use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::LLMConfig;
use crate::domain::schema_entities::SqlDialect;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_CONFIG_FILE: &str = "sqlroute.toml";
pub const CONFIG_PATH_ENV: &str = "SQLROUTE_CONFIG";
const ENV_PREFIX: &str = "SQLROUTE_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub catalog_file: String,
    pub embeddings_file: String,
    /// Scanned for `*.db` SQLite files at startup and on each refresh.
    pub databases_dir: PathBuf,
    pub refresh_interval_secs: u64,
    pub auto_refresh: bool,
    pub http: HttpConfig,
    pub llm: LLMConfig,
    pub embedding: EmbeddingConfig,
    pub query: QueryConfig,
    pub databases: Vec<DatabaseConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            catalog_file: "db_metadata.json".to_string(),
            embeddings_file: "db_embeddings.json".to_string(),
            databases_dir: PathBuf::from("databases"),
            refresh_interval_secs: 300,
            auto_refresh: true,
            http: HttpConfig::default(),
            llm: LLMConfig::default(),
            embedding: EmbeddingConfig::default(),
            query: QueryConfig::default(),
            databases: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-minilm-l6-v2".to_string(),
            cache_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    pub default_limit: u32,
    pub stream_generation: bool,
    pub summarize: bool,
    pub unquote_identifiers: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            stream_generation: true,
            summarize: true,
            unquote_identifiers: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Sqlite,
    Postgres,
}

impl DatabaseKind {
    pub fn dialect(&self) -> SqlDialect {
        match self {
            DatabaseKind::Sqlite => SqlDialect::Sqlite,
            DatabaseKind::Postgres => SqlDialect::Postgres,
        }
    }
}

/// One database to register at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    pub name: String,
    pub kind: DatabaseKind,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    /// `env:VAR`, `keychain:key`, `plain:secret` or the bare password.
    #[serde(default)]
    pub password_ref: Option<String>,
    #[serde(default)]
    pub ssl_mode: Option<String>,
}

impl DatabaseConfig {
    pub fn sqlite(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind: DatabaseKind::Sqlite,
            path: Some(path.into()),
            host: None,
            port: None,
            username: None,
            database: None,
            password_ref: None,
            ssl_mode: None,
        }
    }
}

impl AppConfig {
    /// Load from the standard locations; see module docs.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            info!(path = %path.display(), "Loading configuration file");
        }
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval_secs == 0 {
            return Err(AppError::ConfigError(
                "refresh_interval_secs must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for db in &self.databases {
            if db.name.trim().is_empty() {
                return Err(AppError::ConfigError("Database name cannot be empty".to_string()));
            }
            if !seen.insert(db.name.as_str()) {
                return Err(AppError::ConfigError(format!(
                    "Duplicate database name '{}'",
                    db.name
                )));
            }
            match db.kind {
                DatabaseKind::Sqlite if db.path.is_none() => {
                    return Err(AppError::ConfigError(format!(
                        "SQLite database '{}' requires a path",
                        db.name
                    )));
                }
                DatabaseKind::Postgres if db.host.is_none() || db.database.is_none() => {
                    return Err(AppError::ConfigError(format!(
                        "PostgreSQL database '{}' requires host and database",
                        db.name
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join(&self.catalog_file)
    }

    pub fn embeddings_path(&self) -> PathBuf {
        self.data_dir.join(&self.embeddings_file)
    }
}
