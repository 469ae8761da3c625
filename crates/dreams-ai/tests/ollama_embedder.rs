use std::sync::Arc;
use std::time::Duration;

use dreams_ai::{search_dreams, Embedder, EmbeddingError, EmbeddingProvider, OllamaEmbedder};
use dreams_core::{DreamCategory, DreamDraft};
use httpmock::prelude::*;
use serde_json::json;
use url::Url;

fn embedder(server: &MockServer, batch_size: usize) -> OllamaEmbedder {
    OllamaEmbedder::new(
        Url::parse(&server.base_url()).expect("base url"),
        "nomic-embed-text",
        Duration::from_secs(1),
        batch_size,
    )
    .expect("embedder")
}

#[test]
fn prefers_batch_endpoint() {
    let server = MockServer::start();
    let embed = server.mock(|when, then| {
        when.method(POST).path("/api/embed").json_body(json!({
            "model": "nomic-embed-text",
            "input": ["alpha", "beta"],
        }));
        then.status(200)
            .json_body(json!({"embeddings": [[1.0, 0.0], [0.0, 1.0]]}));
    });

    let out = embedder(&server, 16)
        .embed_batch(&["alpha".to_string(), "beta".to_string()])
        .unwrap();

    embed.assert();
    assert_eq!(out, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
}

#[test]
fn falls_back_to_legacy_endpoint_and_remembers() {
    let server = MockServer::start();
    let embed = server.mock(|when, then| {
        when.method(POST).path("/api/embed");
        then.status(404);
    });
    let legacy = server.mock(|when, then| {
        when.method(POST).path("/api/embeddings");
        then.status(200).json_body(json!({"embedding": [0.5, 0.5]}));
    });

    let embedder = embedder(&server, 1);
    let out = embedder
        .embed_batch(&["a".to_string(), "b".to_string(), "c".to_string()])
        .unwrap();

    assert_eq!(out.len(), 3);
    // Probed once, then skipped for the remaining batches.
    embed.assert_hits(1);
    legacy.assert_hits(3);
}

#[test]
fn base_url_ending_in_api_is_tolerated() {
    let server = MockServer::start();
    let embed = server.mock(|when, then| {
        when.method(POST).path("/api/embed");
        then.status(200).json_body(json!({"embeddings": [[0.25]]}));
    });

    let embedder = OllamaEmbedder::new(
        Url::parse(&format!("{}/api", server.base_url())).unwrap(),
        "m",
        Duration::from_secs(1),
        8,
    )
    .unwrap();
    assert_eq!(embedder.embed("x").unwrap(), vec![0.25]);
    embed.assert();
}

#[test]
fn provider_search_ranks_by_returned_vectors() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST)
            .path("/api/embed")
            .json_body(json!({"model": "nomic-embed-text", "input": ["running"]}));
        then.status(200).json_body(json!({"embeddings": [[1.0, 0.0]]}));
    });
    server.mock(|when, then| {
        when.method(POST).path("/api/embed").json_body(json!({
            "model": "nomic-embed-text",
            "input": ["Career & Business: Start a bakery", "Health & Wellness: Run a marathon"],
        }));
        then.status(200)
            .json_body(json!({"embeddings": [[0.0, 1.0], [0.9, 0.1]]}));
    });

    let provider = EmbeddingProvider::new(Arc::new(embedder(&server, 16)));
    let dreams = vec![
        DreamDraft::new("Start a bakery", DreamCategory::Career, 2028).into_entry(),
        DreamDraft::new("Run a marathon", DreamCategory::Health, 2026).into_entry(),
    ];

    let hits = search_dreams(&provider, "running", &dreams, 5).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].dream.title, "Run a marathon");
    assert!(hits[0].score > hits[1].score);
}

#[test]
fn server_error_surfaces_as_backend_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/embed");
        then.status(500);
    });
    server.mock(|when, then| {
        when.method(POST).path("/api/embeddings");
        then.status(500);
    });

    let provider = EmbeddingProvider::new(Arc::new(embedder(&server, 4)));
    let err = provider.encode_one("x").unwrap_err();
    assert!(matches!(err, EmbeddingError::Backend(_)), "{err:?}");
}
