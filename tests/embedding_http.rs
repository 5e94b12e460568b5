//! HTTP embedding providers against a mock server.

use std::time::Duration;

use campus_rag::config::EmbeddingConfig;
use campus_rag::embedding::OpenAiEmbedder;
use campus_rag::retry::RetryPolicy;
use campus_rag_core::embedding::Embedder;
use campus_rag_core::RagError;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer, batch_size: usize) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: "openai".to_string(),
        model: Some("text-embedding-3-small".to_string()),
        dims: Some(2),
        url: Some(server.uri()),
        batch_size,
        max_retries: 3,
        timeout_secs: 5,
    }
}

fn embedder(server: &MockServer, batch_size: usize) -> OpenAiEmbedder {
    OpenAiEmbedder::with_api_key(&config(server, batch_size), "sk-test".to_string())
        .unwrap()
        .with_retry(RetryPolicy::new(3).with_base_delay(Duration::from_millis(5)))
}

fn ok_body(n: usize) -> serde_json::Value {
    let data: Vec<_> = (0..n)
        .map(|i| json!({"index": i, "embedding": [i as f32, 1.0]}))
        .collect();
    json!({"data": data})
}

#[tokio::test]
async fn rate_limit_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(header("Authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(1)))
        .expect(1)
        .mount(&server)
        .await;

    let vectors = embedder(&server, 8).embed(&["tuition".to_string()]).await.unwrap();
    assert_eq!(vectors, vec![vec![0.0, 1.0]]);
}

#[tokio::test]
async fn client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
        .expect(1)
        .mount(&server)
        .await;

    let err = embedder(&server, 8).embed(&["x".to_string()]).await.unwrap_err();
    assert!(!err.is_transient());
}

#[tokio::test]
async fn retries_are_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&server)
        .await;

    let err = embedder(&server, 8).embed(&["x".to_string()]).await.unwrap_err();
    assert!(err.is_transient());
    assert!(err.to_string().contains("after 4 attempts"));
}

#[tokio::test]
async fn inputs_are_batched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(2)))
        .expect(2)
        .mount(&server)
        .await;

    let texts: Vec<String> = (0..4).map(|i| format!("chunk {}", i)).collect();
    let vectors = embedder(&server, 2).embed(&texts).await.unwrap();
    assert_eq!(vectors.len(), 4);
}

#[tokio::test]
async fn wrong_dimensionality_is_schema_mismatch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": [{"index": 0, "embedding": [1.0, 2.0, 3.0]}]})),
        )
        .mount(&server)
        .await;

    let err = embedder(&server, 8).embed(&["x".to_string()]).await.unwrap_err();
    assert!(matches!(err, RagError::SchemaMismatch { expected: 2, found: 3 }));
}
