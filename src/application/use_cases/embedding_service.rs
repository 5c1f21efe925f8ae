use crate::domain::error::{AppError, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Turns text into fixed-dimension vectors.
pub trait TextEncoder: Send + Sync {
    fn dimension(&self) -> usize;
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Local sentence-embedding model backed by fastembed.
pub struct FastEmbedEncoder {
    embedder: Mutex<TextEmbedding>,
    dimension: usize,
}

impl FastEmbedEncoder {
    pub fn load(model: &str, cache_dir: Option<PathBuf>) -> Result<Self> {
        let model_name = Self::resolve_local_embedding_model(model);
        info!(model = model, "Loading sentence embedding model");

        let mut options = InitOptions::default();
        options.model_name = model_name;
        options.show_download_progress = false;
        if let Some(dir) = cache_dir {
            options.cache_dir = dir;
        }
        let mut embedder = TextEmbedding::try_new(options)
            .map_err(|e| AppError::EmbeddingError(format!("Failed to init local embedder: {}", e)))?;

        // The model's output width is read off a probe instead of a lookup table.
        let probe = embedder
            .embed(vec!["dimension probe".to_string()], None)
            .map_err(|e| AppError::EmbeddingError(format!("Failed to embed text: {}", e)))?;
        let dimension = probe.first().map(|v| v.len()).unwrap_or(0);
        if dimension == 0 {
            return Err(AppError::EmbeddingError("Empty embedding response".to_string()));
        }
        info!(dimension, "Embedding model ready");

        Ok(Self {
            embedder: Mutex::new(embedder),
            dimension,
        })
    }

    fn resolve_local_embedding_model(model: &str) -> EmbeddingModel {
        match model.trim().to_lowercase().as_str() {
            "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
            _ => EmbeddingModel::AllMiniLML6V2,
        }
    }
}

impl TextEncoder for FastEmbedEncoder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut embedder = self
            .embedder
            .lock()
            .map_err(|_| AppError::EmbeddingError("Local embedder lock poisoned".to_string()))?;
        let embeddings = embedder
            .embed(texts.to_vec(), None)
            .map_err(|e| AppError::EmbeddingError(format!("Failed to embed text: {}", e)))?;
        if embeddings.len() != texts.len() {
            return Err(AppError::EmbeddingError(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }
}

pub type EncoderLoader = Box<dyn Fn() -> Result<Arc<dyn TextEncoder>> + Send + Sync>;

enum EncoderState {
    Uninitialized,
    Loading,
    Ready(Arc<dyn TextEncoder>),
    Failed(String),
}

/// Externally visible encoder state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum EncoderStatus {
    Uninitialized,
    Loading,
    Ready,
    Failed(String),
}

/// Defers loading the embedding model until first use.
///
/// `Uninitialized -> Loading -> Ready | Failed`, attempted exactly once.
/// Callers arriving while another caller is loading see the encoder as not
/// yet available instead of waiting for the load.
pub struct LazyEncoder {
    loader: EncoderLoader,
    state: Mutex<EncoderState>,
}

impl LazyEncoder {
    pub fn new(loader: EncoderLoader) -> Self {
        Self {
            loader,
            state: Mutex::new(EncoderState::Uninitialized),
        }
    }

    pub fn fastembed(model: String, cache_dir: Option<PathBuf>) -> Self {
        Self::new(Box::new(move || {
            let encoder = FastEmbedEncoder::load(&model, cache_dir.clone())?;
            Ok(Arc::new(encoder) as Arc<dyn TextEncoder>)
        }))
    }

    /// Wrap an encoder that is already loaded.
    pub fn ready(encoder: Arc<dyn TextEncoder>) -> Self {
        Self {
            loader: Box::new(|| Err(AppError::Internal("Encoder already loaded".to_string()))),
            state: Mutex::new(EncoderState::Ready(encoder)),
        }
    }

    pub fn is_available(&self) -> bool {
        self.get().is_some()
    }

    /// Current state, without triggering a load.
    pub fn status(&self) -> EncoderStatus {
        match &*self.lock_state() {
            EncoderState::Uninitialized => EncoderStatus::Uninitialized,
            EncoderState::Loading => EncoderStatus::Loading,
            EncoderState::Ready(_) => EncoderStatus::Ready,
            EncoderState::Failed(reason) => EncoderStatus::Failed(reason.clone()),
        }
    }

    /// Loaded encoder, loading it first if this is the first request.
    pub fn get(&self) -> Option<Arc<dyn TextEncoder>> {
        {
            let mut state = self.lock_state();
            match &*state {
                EncoderState::Ready(encoder) => return Some(encoder.clone()),
                EncoderState::Failed(_) | EncoderState::Loading => return None,
                EncoderState::Uninitialized => *state = EncoderState::Loading,
            }
        }

        let loaded = (self.loader)();

        let mut state = self.lock_state();
        match loaded {
            Ok(encoder) => {
                *state = EncoderState::Ready(encoder.clone());
                Some(encoder)
            }
            Err(e) => {
                warn!(error = %e, "Embedding backend unavailable, semantic search disabled");
                *state = EncoderState::Failed(e.to_string());
                None
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, EncoderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub fn squared_l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}
