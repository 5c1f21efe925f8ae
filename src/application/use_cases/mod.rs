pub mod dialect_adapter;
pub mod embedding_service;
pub mod fallback_sql;
pub mod lexical_matcher;
pub mod prompt_engine;
pub mod query_service;
pub mod refresh_task;
pub mod resolver;
pub mod schema_catalog;
pub mod schema_sync;
pub mod semantic_index;
pub mod sql_extractor;
