pub mod catalog;
pub mod error;
pub mod llm_config;
pub mod schema_entities;
