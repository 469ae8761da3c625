use std::sync::Arc;
use std::time::Duration;

use dreams_ai::{
    AiClient, ChatRequest, DreamExtractor, LlmProvider, OllamaProvider, OpenAiCompatibleProvider,
    ResponseFormat,
};
use dreams_core::DreamCategory;
use futures::StreamExt;
use httpmock::prelude::*;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;

fn ollama(server: &MockServer) -> OllamaProvider {
    OllamaProvider::new(
        Url::parse(&server.base_url()).unwrap(),
        "llama3",
        Duration::from_secs(2),
    )
    .unwrap()
}

#[tokio::test]
async fn ollama_structured_channel_sends_json_format() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/chat")
            .body_contains("\"format\":\"json\"")
            .body_contains("\"stream\":false")
            .body_contains("\"num_predict\":256");
        then.status(200).json_body(json!({
            "message": {"role": "assistant", "content": "{\"ok\":true}"},
            "done": true
        }));
    });

    let client = AiClient::new(Arc::new(ollama(&server)), 1).with_defaults(Some(256), None);
    let out = client
        .chat(
            ChatRequest::prompt("hi").with_format(ResponseFormat::Json),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    mock.assert();
    assert_eq!(out, "{\"ok\":true}");
}

#[tokio::test]
async fn ollama_stream_reads_ndjson_lines() {
    let server = MockServer::start();
    let body = [
        json!({"message": {"role": "assistant", "content": "[{\"title\""}, "done": false}),
        json!({"message": {"role": "assistant", "content": ": \"Register\"}]"}, "done": false}),
        json!({"message": {"role": "assistant", "content": ""}, "done": true}),
    ]
    .iter()
    .map(|line| format!("{line}\n"))
    .collect::<String>();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/chat")
            .body_contains("\"stream\":true");
        then.status(200)
            .header("content-type", "application/x-ndjson")
            .body(body);
    });

    let provider = ollama(&server);
    let mut stream = provider
        .chat_stream(ChatRequest::prompt("roadmap"), CancellationToken::new())
        .await
        .unwrap();
    let mut chunks = Vec::new();
    while let Some(chunk) = stream.next().await {
        chunks.push(chunk.unwrap());
    }

    mock.assert();
    assert_eq!(chunks, vec!["[{\"title\"", ": \"Register\"}]"]);
}

#[tokio::test]
async fn extraction_through_ollama_uses_structured_answer() {
    let server = MockServer::start();
    let content = json!({
        "dreams": [
            {"title": "Run a marathon", "category": "Health & Wellness", "suggested_target_year": 2026},
            {"title": "Start a bakery", "category": "Career & Business", "suggested_target_year": 2028}
        ]
    })
    .to_string();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/chat")
            .body_contains("\"format\":\"json\"")
            .body_contains("marathon");
        then.status(200).json_body(json!({
            "message": {"role": "assistant", "content": content},
            "done": true
        }));
    });

    let extractor = DreamExtractor::new(AiClient::new(Arc::new(ollama(&server)), 1), 2025);
    let drafts = extractor
        .extract(
            "I want to run a marathon and also start a bakery",
            CancellationToken::new(),
        )
        .await
        .unwrap();

    mock.assert_hits(1);
    let categories: Vec<DreamCategory> = drafts.iter().map(|draft| draft.category).collect();
    assert_eq!(categories, vec![DreamCategory::Health, DreamCategory::Career]);
}

#[tokio::test]
async fn openai_compatible_sends_bearer_and_json_object_format() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .header("authorization", "Bearer sk-test")
            .body_contains("\"response_format\":{\"type\":\"json_object\"}")
            .body_contains("\"model\":\"gpt-test\"");
        then.status(200).json_body(json!({
            "choices": [{"message": {"role": "assistant", "content": "{}"}}]
        }));
    });

    let provider = OpenAiCompatibleProvider::new(
        Url::parse(&format!("{}/v1", server.base_url())).unwrap(),
        "gpt-test",
        Duration::from_secs(2),
        Some("sk-test".to_string()),
    )
    .unwrap();
    let out = provider
        .chat(
            ChatRequest::prompt("hi").with_format(ResponseFormat::Json),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    mock.assert();
    assert_eq!(out, "{}");
}

#[tokio::test]
async fn openai_compatible_stream_stops_at_done() {
    let server = MockServer::start();
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .body_contains("\"stream\":true");
        then.status(200)
            .header("content-type", "text/event-stream")
            .body(body);
    });

    let provider = OpenAiCompatibleProvider::new(
        Url::parse(&server.base_url()).unwrap(),
        "gpt-test",
        Duration::from_secs(2),
        None,
    )
    .unwrap();
    let mut stream = provider
        .chat_stream(ChatRequest::prompt("hi"), CancellationToken::new())
        .await
        .unwrap();
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        text.push_str(&chunk.unwrap());
    }

    mock.assert();
    assert_eq!(text, "Hello world");
}

#[tokio::test]
async fn cancelled_request_returns_promptly() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/chat");
        then.status(200)
            .delay(Duration::from_secs(5))
            .json_body(json!({"message": {"role": "assistant", "content": "late"}, "done": true}));
    });

    let provider = ollama(&server);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = provider
        .chat(ChatRequest::prompt("hi"), cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, dreams_ai::AiError::Cancelled), "{err:?}");
}
