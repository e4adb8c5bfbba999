//! # LLM Clients
//!
//! The [`LlmClient`] seam and the pieces shared by its backends: request
//! and response types, prompt rendering and backend selection.

use async_trait::async_trait;
use pac_core::SecretValue;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::LlmError;
use crate::gemini::GeminiClient;
use crate::openai::OpenAiClient;

/// Request timeout when the Repository sets none.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Completion budget when the Repository sets none.
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

// ============================================================================
// Request and Response
// ============================================================================

/// One prompt with its context sections.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub prompt: String,
    pub context: BTreeMap<String, Value>,
    pub max_tokens: u32,
}

/// Text produced by the model.
#[derive(Debug, Clone)]
pub struct AnalysisResponse {
    pub content: String,
    pub tokens_used: u64,
    pub provider: &'static str,
    pub duration: Duration,
}

/// Renders the prompt followed by one `=== KEY ===` section per context
/// entry. Strings are inlined, structured values are pretty-printed JSON.
pub fn build_prompt(request: &AnalysisRequest) -> String {
    let mut prompt = String::with_capacity(request.prompt.len() + 64);
    prompt.push_str(&request.prompt);
    prompt.push_str("\n\n");

    if request.context.is_empty() {
        return prompt;
    }

    prompt.push_str("Context Information:\n");
    for (key, value) in &request.context {
        prompt.push_str(&format!("=== {} ===\n", key.to_uppercase()));
        match value {
            Value::String(s) => prompt.push_str(s),
            Value::Object(_) | Value::Array(_) => {
                let rendered =
                    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
                prompt.push_str(&rendered);
            }
            other => prompt.push_str(&other.to_string()),
        }
        prompt.push_str("\n\n");
    }
    prompt
}

// ============================================================================
// Client Trait
// ============================================================================

/// An LLM backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, LlmError>;
}

// ============================================================================
// Backend Selection
// ============================================================================

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Gemini,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => crate::openai::DEFAULT_BASE_URL,
            Self::Gemini => crate::gemini::DEFAULT_BASE_URL,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => crate::openai::DEFAULT_MODEL,
            Self::Gemini => crate::gemini::DEFAULT_MODEL,
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "gemini" => Ok(Self::Gemini),
            other => Err(LlmError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Connection settings of a client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub provider: LlmProvider,
    pub api_key: SecretValue,
    /// Empty selects the backend default.
    pub base_url: String,
    /// Empty selects the backend default.
    pub model: String,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(provider: LlmProvider, api_key: SecretValue) -> Self {
        Self {
            provider,
            api_key,
            base_url: String::new(),
            model: String::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        }
    }

    pub fn effective_base_url(&self) -> String {
        if self.base_url.is_empty() {
            self.provider.default_base_url().to_string()
        } else {
            self.base_url.trim_end_matches('/').to_string()
        }
    }

    pub fn effective_model(&self) -> String {
        if self.model.is_empty() {
            self.provider.default_model().to_string()
        } else {
            self.model.clone()
        }
    }

    pub fn validate(&self) -> Result<(), LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::configuration("API key is required"));
        }
        if self.timeout.is_zero() {
            return Err(LlmError::configuration("timeout must be positive"));
        }
        if !self.base_url.is_empty() {
            validate_base_url(&self.base_url)?;
        }
        Ok(())
    }
}

/// An absolute http(s) URL with a host and no whitespace.
pub fn validate_base_url(base_url: &str) -> Result<(), LlmError> {
    if base_url.chars().any(char::is_whitespace) {
        return Err(LlmError::configuration(
            "base URL contains whitespace characters",
        ));
    }
    let parsed = url::Url::parse(base_url)
        .map_err(|e| LlmError::configuration(format!("invalid base URL: {}", e)))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(LlmError::configuration(format!(
            "base URL must use http or https scheme, got: {}",
            parsed.scheme()
        )));
    }
    if parsed.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(LlmError::configuration("base URL must have a valid host"));
    }
    Ok(())
}

/// Builds the client for a validated configuration.
pub fn create_client(config: ClientConfig) -> Result<Box<dyn LlmClient>, LlmError> {
    config.validate()?;
    Ok(match config.provider {
        LlmProvider::OpenAi => Box::new(OpenAiClient::new(config)?),
        LlmProvider::Gemini => Box::new(GeminiClient::new(config)?),
    })
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent("pipelines-as-code")
        .build()
        .map_err(|e| LlmError::configuration(format!("cannot build HTTP client: {}", e)))
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
