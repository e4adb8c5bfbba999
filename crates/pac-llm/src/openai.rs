//! # OpenAI Client
//!
//! Chat completions against `{base}/chat/completions` with a bearer token.
//! Any OpenAI-compatible endpoint works through the base URL override.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use crate::client::{
    build_prompt, http_client, AnalysisRequest, AnalysisResponse, ClientConfig, LlmClient,
};
use crate::error::LlmError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4";

const PROVIDER: &str = "openai";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Client for the OpenAI chat completions API.
#[derive(Debug)]
pub struct OpenAiClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl OpenAiClient {
    pub fn new(config: ClientConfig) -> Result<Self, LlmError> {
        let http = http_client(config.timeout)?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, LlmError> {
        let started = Instant::now();
        let model = self.config.effective_model();
        let body = ChatRequest {
            model: &model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: build_prompt(request),
            }],
            max_tokens: (request.max_tokens > 0).then_some(request.max_tokens),
        };
        let url = format!("{}/chat/completions", self.config.effective_base_url());
        debug!(url = %url, model = %model, "Sending chat completion request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport {
                provider: PROVIDER,
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| LlmError::Transport {
            provider: PROVIDER,
            message: e.to_string(),
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("status {}", status.as_u16()));
            return Err(LlmError::from_status(PROVIDER, status.as_u16(), message));
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER,
                message: e.to_string(),
            })?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse { provider: PROVIDER })?;

        Ok(AnalysisResponse {
            content: choice.message.content,
            tokens_used: parsed.usage.total_tokens,
            provider: PROVIDER,
            duration: started.elapsed(),
        })
    }
}

#[cfg(test)]
#[path = "openai_tests.rs"]
mod tests;
