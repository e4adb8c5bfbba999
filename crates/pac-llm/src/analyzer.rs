//! # LLM Analyzer
//!
//! Runs the analysis roles of a Repository against a finished PipelineRun
//! and posts each answer as a pull request comment.
//!
//! ## Flow
//!
//! 1. Skip unless `settings.ai.enabled` is set on the Repository.
//! 2. Validate the configuration and read the API token from the
//!    Repository namespace.
//! 3. For every role whose `on_cel` filter matches, assemble the context
//!    (cached per context configuration) and query the backend.
//! 4. Post one comment per successful role, replacing the previous
//!    analysis of the same role.

use async_trait::async_trait;
use pac_core::reconciler::{CompletedRun, CompletionHook};
use pac_core::repository::{AiAnalysisConfig, AnalysisRole};
use pac_core::{KubeClient, SecretValue};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::client::{
    create_client, AnalysisRequest, AnalysisResponse, ClientConfig, LlmClient, LlmProvider,
    DEFAULT_MAX_TOKENS, DEFAULT_TIMEOUT_SECONDS,
};
use crate::context::{cache_key, cel_activation, ContextAssembler};
use crate::error::LlmError;

/// Secret key holding the API token when the reference names none.
pub const DEFAULT_SECRET_KEY: &str = "token";

/// The only supported role output.
pub const OUTPUT_PR_COMMENT: &str = "pr-comment";

/// Prefix of the marker identifying an analysis comment.
const COMMENT_MARKER_PREFIX: &str = "<!-- pac-llm-analysis";

// ============================================================================
// Retry Policy
// ============================================================================

/// Retries of a role's LLM call on transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of one role.
#[derive(Debug)]
pub struct AnalysisResult {
    pub role: String,
    pub outcome: Result<AnalysisResponse, LlmError>,
}

impl AnalysisResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Marker line of a role's comment. Later analyses of the same role
/// replace the comment carrying it.
pub fn comment_marker(role: &str) -> String {
    format!("{}: {} -->", COMMENT_MARKER_PREFIX, role)
}

/// Comment body for a role's answer.
pub fn render_comment(role: &str, pipeline_run: &str, response: &AnalysisResponse) -> String {
    format!(
        "{}\n### 🤖 AI Analysis - {}\n\n{}\n\n<sub>Generated by {} for PipelineRun `{}`</sub>",
        comment_marker(role),
        role,
        response.content.trim(),
        response.provider,
        pipeline_run
    )
}

/// Rejects configurations that cannot produce any analysis.
pub fn validate_config(config: &AiAnalysisConfig) -> Result<LlmProvider, LlmError> {
    if config.provider.trim().is_empty() {
        return Err(LlmError::configuration("provider is required"));
    }
    let provider: LlmProvider = config.provider.parse()?;
    if config.secret_ref.name.is_empty() {
        return Err(LlmError::configuration("token secret reference is required"));
    }
    if config.roles.is_empty() {
        return Err(LlmError::configuration(
            "at least one analysis role is required",
        ));
    }
    for (i, role) in config.roles.iter().enumerate() {
        if role.name.is_empty() {
            return Err(LlmError::configuration(format!(
                "role[{}]: name is required",
                i
            )));
        }
        if role.prompt.is_empty() {
            return Err(LlmError::configuration(format!(
                "role[{}]: prompt is required",
                i
            )));
        }
        if role.output != OUTPUT_PR_COMMENT {
            return Err(LlmError::configuration(format!(
                "role[{}]: invalid output destination '{}' (only '{}' is supported)",
                i, role.output, OUTPUT_PR_COMMENT
            )));
        }
    }
    if !config.api_url.is_empty() {
        crate::client::validate_base_url(&config.api_url)?;
    }
    Ok(provider)
}

// ============================================================================
// Analyzer
// ============================================================================

/// Completion hook running the LLM analysis of finished runs.
pub struct LlmAnalyzer {
    kube: Arc<dyn KubeClient>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl LlmAnalyzer {
    pub fn new(kube: Arc<dyn KubeClient>) -> Self {
        Self {
            kube,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Aborts in-flight calls and backoffs once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Runs every matching role. An empty result means analysis is not
    /// configured; per-role failures are reported in the results.
    #[instrument(skip(self, run), fields(
        repository = %run.repository.name(),
        pipeline_run = %run.pipeline_run.metadata.name,
    ))]
    pub async fn analyze(&self, run: &CompletedRun<'_>) -> Result<Vec<AnalysisResult>, LlmError> {
        let Some(config) = run
            .repository
            .spec
            .settings
            .as_ref()
            .and_then(|s| s.ai_analysis.as_ref())
        else {
            debug!("No AI analysis configuration found, skipping analysis");
            return Ok(Vec::new());
        };
        if !config.enabled {
            debug!("AI analysis is disabled, skipping analysis");
            return Ok(Vec::new());
        }

        let provider = validate_config(config)?;
        info!(provider = %provider, roles = config.roles.len(), "Starting LLM analysis");

        let api_key = self.api_key(config, run.repository.namespace()).await?;
        let activation = cel_activation(run.pipeline_run, run.event, run.repository);
        let assembler = ContextAssembler::new(self.kube.as_ref(), run.provider, run.task_runs);

        let mut contexts: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
        let mut results = Vec::new();

        for role in &config.roles {
            if self.cancel.is_cancelled() {
                results.push(AnalysisResult {
                    role: role.name.clone(),
                    outcome: Err(LlmError::Cancelled),
                });
                continue;
            }

            if !role.on_cel.is_empty() {
                match pac_core::cel::evaluate_bool(&role.on_cel, &activation) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(
                            role = %role.name,
                            expression = %role.on_cel,
                            "Role did not match, skipping"
                        );
                        continue;
                    }
                    Err(e) => {
                        warn!(role = %role.name, error = %e, "Cannot evaluate role filter");
                        results.push(AnalysisResult {
                            role: role.name.clone(),
                            outcome: Err(e.into()),
                        });
                        continue;
                    }
                }
            }

            let key = cache_key(role.context_items.as_ref());
            if !contexts.contains_key(&key) {
                let context = assembler
                    .build(run.pipeline_run, run.event, role.context_items.as_ref())
                    .await;
                contexts.insert(key.clone(), context);
            }
            let context = contexts.get(&key).cloned().unwrap_or_default();

            let outcome = self
                .run_role(config, provider, &api_key, role, context)
                .await;
            results.push(AnalysisResult {
                role: role.name.clone(),
                outcome,
            });
        }

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!(
            succeeded,
            failed = results.len() - succeeded,
            "LLM analysis completed"
        );
        Ok(results)
    }

    /// Posts successful results as pull request comments.
    pub async fn publish(&self, run: &CompletedRun<'_>, results: &[AnalysisResult]) {
        if run.event.pull_request_number.is_none() {
            debug!("Event has no pull request, analysis comments are not posted");
            return;
        }
        for result in results {
            let response = match &result.outcome {
                Ok(response) => response,
                Err(e) => {
                    warn!(role = %result.role, error = %e, "Analysis failed for role");
                    continue;
                }
            };
            let marker = comment_marker(&result.role);
            let body = render_comment(&result.role, &run.pipeline_run.metadata.name, response);
            if let Err(e) = run
                .provider
                .create_comment(run.event, &body, Some(&marker))
                .await
            {
                warn!(role = %result.role, error = %e, "Cannot post analysis comment");
            }
        }
    }

    async fn api_key(
        &self,
        config: &AiAnalysisConfig,
        namespace: &str,
    ) -> Result<SecretValue, LlmError> {
        let name = &config.secret_ref.name;
        let key = if config.secret_ref.key.is_empty() {
            DEFAULT_SECRET_KEY
        } else {
            config.secret_ref.key.as_str()
        };
        let secret = self
            .kube
            .get_secret(namespace, name)
            .await
            .map_err(|source| LlmError::Secret {
                namespace: namespace.to_string(),
                name: name.clone(),
                source,
            })?;
        match secret.value(key).filter(|v| !v.is_empty()) {
            Some(value) => Ok(SecretValue::from_string(value)),
            None => Err(LlmError::EmptySecret {
                namespace: namespace.to_string(),
                name: name.clone(),
                key: key.to_string(),
            }),
        }
    }

    async fn run_role(
        &self,
        config: &AiAnalysisConfig,
        provider: LlmProvider,
        api_key: &SecretValue,
        role: &AnalysisRole,
        context: BTreeMap<String, Value>,
    ) -> Result<AnalysisResponse, LlmError> {
        let mut client_config = ClientConfig::new(provider, api_key.clone());
        client_config.base_url = config.api_url.clone();
        client_config.model = role.model.clone();
        client_config.timeout = Duration::from_secs(
            config
                .timeout_seconds
                .filter(|t| *t > 0)
                .unwrap_or(DEFAULT_TIMEOUT_SECONDS),
        );
        let client = create_client(client_config)?;

        let request = AnalysisRequest {
            prompt: role.prompt.clone(),
            context,
            max_tokens: config
                .max_tokens
                .filter(|t| *t > 0)
                .unwrap_or(DEFAULT_MAX_TOKENS),
        };
        debug!(
            role = %role.name,
            context_items = request.context.len(),
            max_tokens = request.max_tokens,
            "Sending analysis request"
        );

        let started = Instant::now();
        let response = self.call_with_retry(client.as_ref(), &request).await;
        match &response {
            Ok(r) => info!(
                role = %role.name,
                tokens_used = r.tokens_used,
                duration_ms = started.elapsed().as_millis() as u64,
                "LLM analysis completed for role"
            ),
            Err(e) => warn!(
                role = %role.name,
                error = %e,
                duration_ms = started.elapsed().as_millis() as u64,
                "LLM analysis failed for role"
            ),
        }
        response
    }

    async fn call_with_retry(
        &self,
        client: &dyn LlmClient,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResponse, LlmError> {
        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(LlmError::Cancelled),
                result = client.analyze(request) => result,
            };
            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    warn!(
                        provider = client.provider_name(),
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %e,
                        "LLM call failed, retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(LlmError::Cancelled),
                        _ = tokio::time::sleep(self.retry.delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl CompletionHook for LlmAnalyzer {
    fn name(&self) -> &'static str {
        "llm-analysis"
    }

    async fn on_completed(&self, run: &CompletedRun<'_>) {
        match self.analyze(run).await {
            Ok(results) => self.publish(run, &results).await,
            Err(e) => warn!(
                error = %e,
                category = ?e.error_category(),
                "LLM analysis skipped"
            ),
        }
    }
}

#[cfg(test)]
#[path = "analyzer_tests.rs"]
mod tests;
