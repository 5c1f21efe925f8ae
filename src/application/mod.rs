pub mod use_cases;

pub use use_cases::query_service::{QueryAnswer, QueryReport, QueryService};
pub use use_cases::schema_sync::{SchemaSync, SyncReport};
