//! Text-to-vector encoders.
//!
//! Everything here is synchronous. Provider-backed embedders use a blocking HTTP
//! client, so they must be built and used outside of an async runtime.

mod ollama;

#[cfg(feature = "embeddings-local")]
mod local;

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dreams_config::{AiConfig, AiEmbeddingsBackend};
use thiserror::Error;

use crate::AiError;

pub use ollama::OllamaEmbedder;

#[cfg(feature = "embeddings-local")]
pub use local::LocalEmbedder;

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, AiError>;

    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AiError> {
        inputs.iter().map(|input| self.embed(input)).collect()
    }
}

/// A fully local embedder based on the hashing trick.
///
/// Not a neural model, but stable across runs and good enough to rank records that
/// share vocabulary.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    fn token_hash(token: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, AiError> {
        let mut vec = vec![0.0f32; self.dims];

        for token in tokenize(text) {
            let idx = (Self::token_hash(&token) % self.dims as u64) as usize;
            vec[idx] += 1.0;
        }

        l2_normalize(&mut vec);
        Ok(vec)
    }
}

/// Lowercased ASCII alphanumeric runs, also split at camelCase boundaries.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_is_lower = false;

    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            let is_upper = ch.is_ascii_uppercase();
            if is_upper && prev_is_lower && !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            current.push(ch.to_ascii_lowercase());
            prev_is_lower = ch.is_ascii_lowercase();
        } else {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_is_lower = false;
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

fn l2_normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec {
            *v /= norm;
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    #[error("embedding model unavailable: {0}")]
    Unavailable(String),
    #[error("embedding request failed: {0}")]
    Backend(#[from] AiError),
    #[error("embedding backend returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
}

#[derive(Clone)]
enum ProviderState {
    Ready(Arc<dyn Embedder>),
    Unavailable(String),
}

/// The process-wide encoder shared by search and layout.
///
/// Construction never fails: a backend that cannot be built yields an explicitly
/// unavailable provider, and every encode call then reports
/// [`EmbeddingError::Unavailable`].
#[derive(Clone)]
pub struct EmbeddingProvider {
    state: ProviderState,
}

impl fmt::Debug for EmbeddingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            ProviderState::Ready(_) => f.write_str("EmbeddingProvider::Ready"),
            ProviderState::Unavailable(reason) => f
                .debug_tuple("EmbeddingProvider::Unavailable")
                .field(reason)
                .finish(),
        }
    }
}

impl EmbeddingProvider {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            state: ProviderState::Ready(embedder),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            state: ProviderState::Unavailable(reason.into()),
        }
    }

    pub fn from_config(config: &AiConfig) -> Self {
        match embedder_from_config(config) {
            Ok(embedder) => Self::new(embedder),
            Err(err) => {
                tracing::warn!(
                    target: "dreams.ai",
                    backend = ?config.embeddings.backend,
                    error = %err,
                    "embedding backend failed to initialize; search and layout are degraded"
                );
                Self::unavailable(err.to_string())
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.state, ProviderState::Ready(_))
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.state {
            ProviderState::Ready(_) => None,
            ProviderState::Unavailable(reason) => Some(reason),
        }
    }

    fn embedder(&self) -> Result<&Arc<dyn Embedder>, EmbeddingError> {
        match &self.state {
            ProviderState::Ready(embedder) => Ok(embedder),
            ProviderState::Unavailable(reason) => Err(EmbeddingError::Unavailable(reason.clone())),
        }
    }

    pub fn encode_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embedder()?.embed(text)?)
    }

    pub fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.embedder()?.embed_batch(texts)?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        Ok(vectors)
    }
}

fn embedder_from_config(config: &AiConfig) -> Result<Arc<dyn Embedder>, AiError> {
    let embeddings = &config.embeddings;
    match embeddings.backend {
        AiEmbeddingsBackend::Hash => Ok(Arc::new(HashEmbedder::new(embeddings.hash_dims))),
        AiEmbeddingsBackend::Provider => {
            let model = embeddings
                .model
                .clone()
                .unwrap_or_else(|| config.provider.model.clone());
            let timeout = embeddings
                .timeout_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or_else(|| config.provider.timeout());
            Ok(Arc::new(OllamaEmbedder::new(
                config.provider.url.clone(),
                model,
                timeout,
                embeddings.batch_size,
            )?))
        }
        AiEmbeddingsBackend::Local => local_embedder(config),
    }
}

#[cfg(feature = "embeddings-local")]
fn local_embedder(config: &AiConfig) -> Result<Arc<dyn Embedder>, AiError> {
    Ok(Arc::new(LocalEmbedder::from_config(&config.embeddings)?))
}

#[cfg(not(feature = "embeddings-local"))]
fn local_embedder(_config: &AiConfig) -> Result<Arc<dyn Embedder>, AiError> {
    Err(AiError::InvalidConfig(
        "ai.embeddings.backend=local requires dreams-ai to be built with the `embeddings-local` feature"
            .into(),
    ))
}
