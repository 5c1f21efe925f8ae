pub mod ollama;

use crate::domain::error::Result;
use crate::domain::llm_config::GenerationRequest;
use async_trait::async_trait;

pub use ollama::OllamaClient;

/// Receives the text generated so far, once per streamed chunk.
pub type TextSink<'a> = &'a mut (dyn FnMut(&str) + Send);

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Like `generate`, reporting the accumulated text after each chunk.
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        sink: TextSink<'_>,
    ) -> Result<String>;

    /// Cheap reachability probe. Never errors.
    async fn is_available(&self) -> bool;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::domain::error::AppError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses in order and records every request.
    pub struct ScriptedGenerator {
        available: bool,
        responses: Mutex<VecDeque<Result<String>>>,
        pub requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedGenerator {
        pub fn new(responses: Vec<Result<String>>) -> Self {
            Self {
                available: true,
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn offline() -> Self {
            Self {
                available: false,
                responses: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn next(&self, request: &GenerationRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AppError::LLMError("script exhausted".to_string())))
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<String> {
            self.next(request)
        }

        async fn generate_stream(
            &self,
            request: &GenerationRequest,
            sink: TextSink<'_>,
        ) -> Result<String> {
            let text = self.next(request)?;
            let mut sofar = String::new();
            for word in text.split_inclusive(' ') {
                sofar.push_str(word);
                sink(&sofar);
            }
            Ok(text)
        }

        async fn is_available(&self) -> bool {
            self.available
        }
    }
}
