use super::{TextGenerator, TextSink};
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::{GenerationRequest, LLMConfig};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Client for a local Ollama server.
pub struct OllamaClient {
    client: reqwest::Client,
    config: LLMConfig,
}

impl OllamaClient {
    pub fn new(config: LLMConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::LLMError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn body(&self, request: &GenerationRequest, stream: bool) -> serde_json::Value {
        json!({
            "model": self.config.model,
            "prompt": request.prompt,
            "system": request.system,
            "stream": stream,
            "options": {
                "temperature": request.temperature,
            },
        })
    }

    async fn post_generate(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint("api/generate"))
            .json(&self.body(request, stream))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::LLMError(format!(
                "Error calling Ollama API: {} - {}",
                status, text
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let response = self.post_generate(request, false).await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::LLMError(format!("Failed to parse JSON: {}", e)))?;

        if let Some(error) = json["error"].as_str() {
            return Err(AppError::LLMError(error.to_string()));
        }
        json["response"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| AppError::LLMError("Invalid response format".to_string()))
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        sink: TextSink<'_>,
    ) -> Result<String> {
        let mut response = self.post_generate(request, true).await?;
        let mut decoder = StreamDecoder::default();

        while let Some(chunk) = response.chunk().await? {
            if decoder.push(&chunk) {
                sink(decoder.text());
            }
            if decoder.is_done() {
                break;
            }
        }
        if decoder.finish() {
            sink(decoder.text());
        }

        if let Some(error) = decoder.error() {
            if decoder.text().is_empty() {
                return Err(AppError::LLMError(error.to_string()));
            }
            warn!(error = %error, "Ollama reported an error mid-stream");
        }
        Ok(decoder.text().trim().to_string())
    }

    async fn is_available(&self) -> bool {
        let probe = self
            .client
            .get(self.endpoint("api/tags"))
            .timeout(Duration::from_secs(self.config.probe_timeout_secs))
            .send()
            .await;
        match probe {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Ollama probe failed");
                false
            }
        }
    }
}

/// Incremental decoder for newline-delimited JSON generation chunks.
///
/// Bytes are buffered until a full line arrives, so chunk boundaries may fall
/// anywhere, including inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending: Vec<u8>,
    text: String,
    error: Option<String>,
    done: bool,
}

impl StreamDecoder {
    /// Feed raw bytes. Returns true when new text was appended.
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        self.pending.extend_from_slice(bytes);
        let mut changed = false;
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            changed |= self.consume_line(&line);
        }
        changed
    }

    /// Decode a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        let line = std::mem::take(&mut self.pending);
        self.consume_line(&line)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn consume_line(&mut self, line: &[u8]) -> bool {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            return false;
        }
        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Skipping malformed stream line");
                return false;
            }
        };
        if let Some(error) = value["error"].as_str() {
            self.error = Some(error.to_string());
        }
        if value["done"].as_bool() == Some(true) {
            self.done = true;
        }
        match value["response"].as_str() {
            Some(piece) if !piece.is_empty() => {
                self.text.push_str(piece);
                true
            }
            _ => false,
        }
    }
}
