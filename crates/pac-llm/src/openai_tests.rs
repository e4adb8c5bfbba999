//! Tests for the OpenAI client.

use super::*;
use crate::client::LlmProvider;
use pac_core::SecretValue;
use serde_json::json;
use std::collections::BTreeMap;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> OpenAiClient {
    let mut config = ClientConfig::new(
        LlmProvider::OpenAi,
        SecretValue::from_string("sk-test".to_string()),
    );
    config.base_url = format!("{}/v1", server.uri());
    OpenAiClient::new(config).unwrap()
}

fn request() -> AnalysisRequest {
    let mut context = BTreeMap::new();
    context.insert("pipeline".to_string(), json!({"name": "build"}));
    AnalysisRequest {
        prompt: "Explain the failure".to_string(),
        context,
        max_tokens: 200,
    }
}

#[tokio::test]
async fn test_analyze_posts_chat_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({"model": "gpt-4", "max_tokens": 200})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "The test step failed."}}],
            "usage": {"prompt_tokens": 40, "completion_tokens": 5, "total_tokens": 45}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server).analyze(&request()).await.unwrap();

    assert_eq!(response.content, "The test step failed.");
    assert_eq!(response.tokens_used, 45);
    assert_eq!(response.provider, "openai");
}

#[tokio::test]
async fn test_prompt_carries_context() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "ok"}}]
        })))
        .mount(&server)
        .await;

    client(&server).analyze(&request()).await.unwrap();

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    let content = body["messages"][0]["content"].as_str().unwrap();
    assert_eq!(body["messages"][0]["role"], "user");
    assert!(content.starts_with("Explain the failure\n\n"));
    assert!(content.contains("=== PIPELINE ==="));
}

#[tokio::test]
async fn test_rate_limit_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit reached", "type": "requests"}
        })))
        .mount(&server)
        .await;

    let err = client(&server).analyze(&request()).await.unwrap_err();

    assert!(matches!(err, LlmError::RateLimited { ref message, .. } if message == "Rate limit reached"));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_invalid_key_is_not_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided"}
        })))
        .mount(&server)
        .await;

    let err = client(&server).analyze(&request()).await.unwrap_err();

    assert!(matches!(err, LlmError::Authentication { .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_empty_choices_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let err = client(&server).analyze(&request()).await.unwrap_err();

    assert!(matches!(err, LlmError::EmptyResponse { provider: "openai" }));
}

#[tokio::test]
async fn test_unreadable_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = client(&server).analyze(&request()).await.unwrap_err();

    assert!(matches!(err, LlmError::InvalidResponse { .. }));
}
