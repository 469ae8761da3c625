use crate::{
    providers::{ollama::OllamaProvider, openai_compatible::OpenAiCompatibleProvider, LlmProvider},
    types::{AiStream, ChatRequest},
    AiError,
};
use dreams_config::{AiConfig, AiProviderKind};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Shared completion client: a provider plus a concurrency limit and request defaults.
#[derive(Clone)]
pub struct AiClient {
    provider: Arc<dyn LlmProvider>,
    semaphore: Arc<Semaphore>,
    default_max_tokens: Option<u32>,
    default_temperature: Option<f32>,
}

impl AiClient {
    /// Wrap an existing provider. Used for fakes in tests and for custom backends.
    pub fn new(provider: Arc<dyn LlmProvider>, concurrency: usize) -> Self {
        Self {
            provider,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            default_max_tokens: None,
            default_temperature: None,
        }
    }

    pub fn with_defaults(mut self, max_tokens: Option<u32>, temperature: Option<f32>) -> Self {
        self.default_max_tokens = max_tokens;
        self.default_temperature = temperature;
        self
    }

    pub fn from_config(config: &AiConfig) -> Result<Self, AiError> {
        if config.provider.concurrency == 0 {
            return Err(AiError::InvalidConfig(
                "ai.provider.concurrency must be >= 1".into(),
            ));
        }

        let provider: Arc<dyn LlmProvider> = match config.provider.kind {
            AiProviderKind::Ollama => Arc::new(OllamaProvider::new(
                config.provider.url.clone(),
                config.provider.model.clone(),
                config.provider.timeout(),
            )?),
            AiProviderKind::OpenAiCompatible => Arc::new(OpenAiCompatibleProvider::new(
                config.provider.url.clone(),
                config.provider.model.clone(),
                config.provider.timeout(),
                config.api_key.clone(),
            )?),
        };

        tracing::debug!(
            target: "dreams.ai",
            kind = ?config.provider.kind,
            model = %config.provider.model,
            "constructed completion client"
        );

        Ok(Self::new(provider, config.provider.concurrency).with_defaults(
            Some(config.provider.max_tokens),
            config.provider.temperature,
        ))
    }

    fn apply_defaults(&self, request: &mut ChatRequest) {
        if request.max_tokens.is_none() {
            request.max_tokens = self.default_max_tokens;
        }
        if request.temperature.is_none() {
            request.temperature = self.default_temperature;
        }
    }

    pub async fn chat(
        &self,
        mut request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<String, AiError> {
        self.apply_defaults(&mut request);

        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AiError::UnexpectedResponse("ai client shutting down".into()))?;

        self.provider.chat(request, cancel).await
    }

    pub async fn chat_stream(
        &self,
        mut request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<AiStream, AiError> {
        self.apply_defaults(&mut request);

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AiError::UnexpectedResponse("ai client shutting down".into()))?;

        let inner = self.provider.chat_stream(request, cancel).await?;
        let stream = async_stream::try_stream! {
            let _permit = permit;
            let mut inner = inner;
            while let Some(item) = inner.next().await {
                yield item?;
            }
        };

        let stream: AiStream = Box::pin(stream);
        Ok(stream)
    }
}
