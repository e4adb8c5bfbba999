//! # Gemini Client
//!
//! `models/{model}:generateContent` on the Generative Language API. The API
//! key travels in the `key` query parameter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use crate::client::{
    build_prompt, http_client, AnalysisRequest, AnalysisResponse, ClientConfig, LlmClient,
};
use crate::error::LlmError;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-lite";

const PROVIDER: &str = "gemini";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    total_token_count: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Client for Google Gemini.
#[derive(Debug)]
pub struct GeminiClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl GeminiClient {
    pub fn new(config: ClientConfig) -> Result<Self, LlmError> {
        let http = http_client(config.timeout)?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, LlmError> {
        let started = Instant::now();
        let model = self.config.effective_model();
        let prompt = build_prompt(request);
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.clone(),
                }],
            }],
            generation_config: (request.max_tokens > 0).then_some(GenerationConfig {
                max_output_tokens: request.max_tokens,
            }),
        };
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.effective_base_url(),
            model
        );
        debug!(url = %url, model = %model, "Sending generateContent request");

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.config.api_key.expose_secret())])
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport {
                provider: PROVIDER,
                message: e.without_url().to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| LlmError::Transport {
            provider: PROVIDER,
            message: e.without_url().to_string(),
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("status {}", status.as_u16()));
            return Err(LlmError::from_status(PROVIDER, status.as_u16(), message));
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER,
                message: e.to_string(),
            })?;
        let content = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or(LlmError::EmptyResponse { provider: PROVIDER })?;

        // Older API versions omit usage metadata; fall back to a word count.
        let tokens_used = parsed
            .usage_metadata
            .map(|u| u.total_token_count)
            .unwrap_or_else(|| {
                (content.split_whitespace().count() + prompt.split_whitespace().count()) as u64
            });

        Ok(AnalysisResponse {
            content,
            tokens_used,
            provider: PROVIDER,
            duration: started.elapsed(),
        })
    }
}

#[cfg(test)]
#[path = "gemini_tests.rs"]
mod tests;
