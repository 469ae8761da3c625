pub mod ollama;
pub mod openai_compatible;

use crate::{types::AiStream, AiError, ChatRequest};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// An opaque text-completion backend.
///
/// Connectivity failures must surface as errors for which
/// [`AiError::is_unavailable`] holds, so callers can tell them apart from bad output.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<String, AiError>;

    async fn chat_stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<AiStream, AiError>;
}
