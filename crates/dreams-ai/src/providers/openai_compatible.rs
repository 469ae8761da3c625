use crate::{
    http::{join_endpoint, map_reqwest_error},
    providers::LlmProvider,
    types::{AiStream, ChatMessage, ChatRequest, ResponseFormat},
    AiError,
};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// `/v1/chat/completions` servers (vLLM, llama.cpp server, LM Studio, ...).
#[derive(Clone)]
pub struct OpenAiCompatibleProvider {
    base_url: Url,
    model: String,
    timeout: Duration,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        base_url: Url,
        model: impl Into<String>,
        timeout: Duration,
        api_key: Option<String>,
    ) -> Result<Self, AiError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            base_url,
            model: model.into(),
            timeout,
            api_key,
            client,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(api_key) => request.bearer_auth(api_key),
            None => request,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, AiError> {
        // Accept both `http://host:8000` and `http://host:8000/v1`.
        let base = join_endpoint(&self.base_url, "")?;
        if base.path().trim_end_matches('/').ends_with("/v1") {
            join_endpoint(&base, path)
        } else {
            join_endpoint(&base, &format!("v1/{}", path.trim_start_matches('/')))
        }
    }

    fn body<'a>(&'a self, request: &'a ChatRequest, stream: bool) -> OpenAiChatCompletionRequest<'a> {
        OpenAiChatCompletionRequest {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: match request.format {
                ResponseFormat::Json => Some(OpenAiResponseFormat {
                    kind: "json_object",
                }),
                ResponseFormat::Text => None,
            },
            stream,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<String, AiError> {
        let url = self.endpoint("/chat/completions")?;
        let body = self.body(&request, false);

        let fut = async {
            let response = self
                .authorize(self.client.post(url))
                .json(&body)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(map_reqwest_error)?
                .error_for_status()
                .map_err(map_reqwest_error)?;

            let parsed: OpenAiChatCompletionResponse =
                response.json().await.map_err(map_reqwest_error)?;
            let content = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .ok_or_else(|| {
                    AiError::UnexpectedResponse("missing choices[0].message.content".into())
                })?;
            Ok::<_, AiError>(content)
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(AiError::Cancelled),
            res = fut => res,
        }
    }

    async fn chat_stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<AiStream, AiError> {
        let url = self.endpoint("/chat/completions")?;
        let body = self.body(&request, true);

        let request_builder = self
            .authorize(self.client.post(url))
            .json(&body)
            .timeout(self.timeout);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(AiError::Cancelled),
            resp = request_builder.send() => resp.map_err(map_reqwest_error)?,
        }
        .error_for_status()
        .map_err(map_reqwest_error)?;

        let mut bytes_stream = response.bytes_stream();
        let timeout = self.timeout;

        let stream = try_stream! {
            let mut buffer = String::new();

            loop {
                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    match sse_event(&line)? {
                        SseEvent::Done => return,
                        SseEvent::Content(content) => yield content,
                        SseEvent::Skip => {}
                    }
                }

                let next = tokio::select! {
                    _ = cancel.cancelled() => Err(AiError::Cancelled),
                    chunk = tokio::time::timeout(timeout, bytes_stream.next()) => {
                        chunk.map_err(|_| AiError::Timeout)
                    }
                }?;

                let Some(chunk) = next else { break };
                let chunk = chunk.map_err(map_reqwest_error)?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));
            }
        };

        let stream: AiStream = Box::pin(stream);
        Ok(stream)
    }
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Content(String),
    Done,
    Skip,
}

/// One server-sent-events line: `data: {...}` deltas, terminated by `data: [DONE]`.
fn sse_event(line: &str) -> Result<SseEvent, AiError> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }

    let parsed: OpenAiChatCompletionStreamResponse = serde_json::from_str(data)?;
    let content: String = parsed
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect();
    Ok(if content.is_empty() {
        SseEvent::Skip
    } else {
        SseEvent::Content(content)
    })
}

#[derive(Debug, Serialize)]
struct OpenAiChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAiResponseFormat>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatCompletionResponse {
    choices: Vec<OpenAiChatCompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatCompletionChoice {
    message: OpenAiChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatCompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatCompletionStreamResponse {
    choices: Vec<OpenAiChatCompletionStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatCompletionStreamChoice {
    delta: OpenAiChatCompletionStreamDelta,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatCompletionStreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_lines_map_to_events() {
        assert_eq!(
            sse_event(r#"data: {"choices":[{"delta":{"content":"Run "}}]}"#).unwrap(),
            SseEvent::Content("Run ".into())
        );
        assert_eq!(
            sse_event(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            SseEvent::Skip
        );
        assert_eq!(sse_event(": keep-alive\n").unwrap(), SseEvent::Skip);
        assert_eq!(sse_event("data: [DONE]\n").unwrap(), SseEvent::Done);
        assert!(sse_event("data: {not json").is_err());
    }
}
