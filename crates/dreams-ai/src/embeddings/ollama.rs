use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use reqwest::blocking::Client as BlockingClient;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use super::Embedder;
use crate::http::{join_endpoint, map_reqwest_error};
use crate::AiError;

const EMBED_ENDPOINT_UNKNOWN: u8 = 0;
const EMBED_ENDPOINT_SUPPORTED: u8 = 1;
const EMBED_ENDPOINT_UNSUPPORTED: u8 = 2;

/// Embeddings from an Ollama server.
///
/// Prefers the batch `/api/embed` endpoint and falls back to the per-text legacy
/// `/api/embeddings` endpoint on servers that predate it. The probe result is
/// remembered.
pub struct OllamaEmbedder {
    base_url: Url,
    model: String,
    batch_size: usize,
    embed_endpoint: AtomicU8,
    client: BlockingClient,
}

impl OllamaEmbedder {
    pub fn new(
        base_url: Url,
        model: impl Into<String>,
        timeout: Duration,
        batch_size: usize,
    ) -> Result<Self, AiError> {
        let client = BlockingClient::builder()
            .timeout(timeout)
            .build()
            .map_err(map_reqwest_error)?;
        Ok(Self {
            base_url,
            model: model.into(),
            batch_size: batch_size.max(1),
            embed_endpoint: AtomicU8::new(EMBED_ENDPOINT_UNKNOWN),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AiError> {
        // Tolerate base URLs that already end in `/api`.
        let mut relative = path.trim_start_matches('/');
        if self.base_url.path().trim_end_matches('/').ends_with("/api") {
            relative = relative.trim_start_matches("api/");
        }
        join_endpoint(&self.base_url, relative)
    }

    fn embed_via_batch_endpoint(&self, input: &[String]) -> Result<Option<Vec<Vec<f32>>>, AiError> {
        let url = self.endpoint("/api/embed")?;
        let body = OllamaEmbedRequest {
            model: &self.model,
            input,
        };

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .map_err(map_reqwest_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let parsed: OllamaEmbedResponse = response
            .error_for_status()
            .map_err(map_reqwest_error)?
            .json()
            .map_err(map_reqwest_error)?;

        if parsed.embeddings.len() != input.len() {
            return Err(AiError::UnexpectedResponse(format!(
                "Ollama /api/embed returned {} embeddings for {} inputs",
                parsed.embeddings.len(),
                input.len()
            )));
        }
        if parsed.embeddings.iter().any(Vec::is_empty) {
            return Err(AiError::UnexpectedResponse(
                "Ollama /api/embed returned an empty embedding vector".into(),
            ));
        }
        Ok(Some(parsed.embeddings))
    }

    fn embed_via_legacy_endpoint(&self, input: &[String]) -> Result<Vec<Vec<f32>>, AiError> {
        let url = self.endpoint("/api/embeddings")?;
        let mut out = Vec::with_capacity(input.len());

        for prompt in input {
            let body = OllamaEmbeddingRequest {
                model: &self.model,
                prompt,
            };
            let parsed: OllamaEmbeddingResponse = self
                .client
                .post(url.clone())
                .json(&body)
                .send()
                .map_err(map_reqwest_error)?
                .error_for_status()
                .map_err(map_reqwest_error)?
                .json()
                .map_err(map_reqwest_error)?;

            if parsed.embedding.is_empty() {
                return Err(AiError::UnexpectedResponse(
                    "missing `embedding` in Ollama /api/embeddings response".into(),
                ));
            }
            out.push(parsed.embedding);
        }

        Ok(out)
    }
}

impl Embedder for OllamaEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, AiError> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| AiError::UnexpectedResponse("no embedding returned".into()))
    }

    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AiError> {
        let mut out = Vec::with_capacity(inputs.len());

        for chunk in inputs.chunks(self.batch_size) {
            if self.embed_endpoint.load(Ordering::Acquire) != EMBED_ENDPOINT_UNSUPPORTED {
                match self.embed_via_batch_endpoint(chunk) {
                    Ok(Some(embeddings)) => {
                        self.embed_endpoint
                            .store(EMBED_ENDPOINT_SUPPORTED, Ordering::Release);
                        out.extend(embeddings);
                        continue;
                    }
                    Ok(None) => {
                        self.embed_endpoint
                            .store(EMBED_ENDPOINT_UNSUPPORTED, Ordering::Release);
                    }
                    Err(err) if err.is_unavailable() => return Err(err),
                    Err(err) => {
                        tracing::warn!(
                            target: "dreams.ai",
                            error = %err,
                            "Ollama /api/embed failed; falling back to /api/embeddings"
                        );
                    }
                }
            }

            out.extend(self.embed_via_legacy_endpoint(chunk)?);
        }

        Ok(out)
    }
}

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}
