use std::sync::Mutex;

use dreams_config::AiEmbeddingsConfig;

use super::Embedder;
use crate::AiError;

/// In-process sentence embeddings via `fastembed` (all-MiniLM-L6-v2 by default).
pub struct LocalEmbedder {
    batch_size: usize,
    embedder: Mutex<fastembed::TextEmbedding>,
    model_id: String,
}

impl LocalEmbedder {
    /// Load (downloading on first use) the configured model.
    pub fn from_config(config: &AiEmbeddingsConfig) -> Result<Self, AiError> {
        let model_id = config.local_model.trim();
        if model_id.is_empty() {
            return Err(AiError::InvalidConfig(
                "ai.embeddings.local_model must be non-empty when backend=\"local\"".to_string(),
            ));
        }

        let model_dir = config.model_dir.clone();
        std::fs::create_dir_all(&model_dir).map_err(|source| {
            AiError::InvalidConfig(format!(
                "failed to create ai.embeddings.model_dir {}: {source}",
                model_dir.display()
            ))
        })?;

        let model = fastembed_model_from_id(model_id).map_err(|err| {
            AiError::InvalidConfig(format!(
                "unsupported ai.embeddings.local_model={model_id:?}: {err}"
            ))
        })?;

        let options = fastembed::InitOptions::new(model)
            .with_cache_dir(model_dir.clone())
            .with_show_download_progress(false);

        let embedder = fastembed::TextEmbedding::try_new(options).map_err(|source| {
            AiError::InvalidConfig(format!(
                "failed to initialize local embedding model {model_id:?} (cache dir {}): {source}",
                model_dir.display()
            ))
        })?;

        tracing::info!(target: "dreams.ai", model = model_id, "loaded local embedding model");

        Ok(Self {
            batch_size: config.batch_size.max(1),
            embedder: Mutex::new(embedder),
            model_id: model_id.to_string(),
        })
    }
}

/// The sentence-transformers hub name is accepted as well as fastembed's own.
fn fastembed_model_from_id(id: &str) -> Result<fastembed::EmbeddingModel, String> {
    let id = id.strip_prefix("sentence-transformers/").unwrap_or(id);
    id.parse::<fastembed::EmbeddingModel>()
        .map_err(|err| err.to_string())
}

impl Embedder for LocalEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, AiError> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| AiError::UnexpectedResponse("no embedding returned".into()))
    }

    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AiError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut embedder = self.embedder.lock().unwrap_or_else(|err| err.into_inner());
        let mut out = Vec::with_capacity(inputs.len());
        for chunk in inputs.chunks(self.batch_size) {
            let embeddings = embedder
                .embed(chunk.to_vec(), Some(self.batch_size))
                .map_err(|err| {
                    AiError::UnexpectedResponse(format!(
                        "fastembed embedding failed for model {}: {err}",
                        self.model_id
                    ))
                })?;

            if embeddings.len() != chunk.len() {
                return Err(AiError::UnexpectedResponse(format!(
                    "fastembed returned {} embeddings for {} inputs (model {})",
                    embeddings.len(),
                    chunk.len(),
                    self.model_id
                )));
            }
            out.extend(embeddings);
        }
        Ok(out)
    }
}
