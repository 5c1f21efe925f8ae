use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LLMConfig {
    pub base_url: String,
    pub model: String,
    /// Low temperature keeps SQL generation close to deterministic.
    pub sql_temperature: f32,
    pub summary_temperature: f32,
    pub request_timeout_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "deepseek-r1:1.5b".to_string(),
            sql_temperature: 0.1,
            summary_temperature: 0.7,
            request_timeout_secs: 120,
            probe_timeout_secs: 2,
        }
    }
}

/// A single prompt for the text generator.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system: String,
    pub temperature: f32,
}
