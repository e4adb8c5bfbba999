//! Tests for the Gemini client.

use super::*;
use crate::client::LlmProvider;
use pac_core::SecretValue;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, model: &str) -> GeminiClient {
    let mut config = ClientConfig::new(
        LlmProvider::Gemini,
        SecretValue::from_string("g-key".to_string()),
    );
    config.base_url = server.uri();
    config.model = model.to_string();
    GeminiClient::new(config).unwrap()
}

fn request() -> AnalysisRequest {
    AnalysisRequest {
        prompt: "Summarize".to_string(),
        max_tokens: 300,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_analyze_calls_generate_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-pro:generateContent"))
        .and(query_param("key", "g-key"))
        .and(body_partial_json(json!({
            "contents": [{"parts": [{"text": "Summarize\n\n"}]}],
            "generationConfig": {"maxOutputTokens": 300}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "Flaky network in step fetch."}]}, "finishReason": "STOP"}],
            "usageMetadata": {"totalTokenCount": 17}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server, "gemini-pro").analyze(&request()).await.unwrap();

    assert_eq!(response.content, "Flaky network in step fetch.");
    assert_eq!(response.tokens_used, 17);
    assert_eq!(response.provider, "gemini");
}

/// Verify that a response without usage metadata falls back to a word count
/// of prompt and answer.
#[tokio::test]
async fn test_token_estimate_without_usage_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "two words"}]}}]
        })))
        .mount(&server)
        .await;

    let response = client(&server, "m").analyze(&request()).await.unwrap();

    assert_eq!(response.tokens_used, 3);
}

#[tokio::test]
async fn test_forbidden_is_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED"}
        })))
        .mount(&server)
        .await;

    let err = client(&server, "m").analyze(&request()).await.unwrap_err();

    assert!(matches!(err, LlmError::Authentication { ref message, .. } if message == "API key not valid"));
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .mount(&server)
        .await;

    let err = client(&server, "m").analyze(&request()).await.unwrap_err();

    assert!(matches!(err, LlmError::Api { status: 500, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_missing_candidates_is_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
        .mount(&server)
        .await;

    let err = client(&server, "m").analyze(&request()).await.unwrap_err();

    assert!(matches!(err, LlmError::EmptyResponse { provider: "gemini" }));
}
