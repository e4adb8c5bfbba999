//! # Repository Custom Resource
//!
//! The user-owned `Repository` resource binding a VCS URL to a namespace, and
//! the merge of a namespace-local Repository with the controller-wide global
//! Repository.
//!
//! Field names follow the snake_case JSON schema of the CRD
//! (`pipelinesascode.tekton.dev/v1alpha1`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::keys;
use crate::resources::{Condition, ObjectMeta};

/// Number of run statuses kept on a Repository.
pub const MAX_RUN_STATUS: usize = 5;

// ============================================================================
// Spec Types
// ============================================================================

/// Reference to a key inside a Kubernetes Secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
}

/// Connection settings for the git provider of a Repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitProvider {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<SecretRef>,

    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub type_: String,
}

/// An incoming-webhook trigger declared on a Repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incoming {
    #[serde(rename = "type")]
    pub type_: String,

    pub secret: SecretRef,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
}

/// A user-declared parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretRef>,

    /// CEL expression deciding whether this declaration applies.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filter: String,
}

/// Team based access policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ok_to_test: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pull_request: Vec<String>,
}

/// Provider specific comment behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentSettings {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment_strategy: String,
}

/// Limits on which parts of the run context are sent to the LLM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextItems {
    #[serde(default)]
    pub commit_content: bool,

    #[serde(default)]
    pub pr_content: bool,

    #[serde(default)]
    pub error_content: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_logs: Option<ContainerLogsConfig>,
}

/// Container log tail settings for LLM context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLogsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "ContainerLogsConfig::default_max_lines")]
    pub max_lines: usize,
}

impl ContainerLogsConfig {
    fn default_max_lines() -> usize {
        50
    }
}

impl Default for ContainerLogsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_lines: Self::default_max_lines(),
        }
    }
}

/// One analysis role of the LLM analyzer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRole {
    pub name: String,

    pub prompt: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,

    /// CEL filter; empty means "always".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub on_cel: String,

    /// Output destination, only `pr-comment` is supported.
    #[serde(default = "AnalysisRole::default_output")]
    pub output: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_items: Option<ContextItems>,
}

impl AnalysisRole {
    fn default_output() -> String {
        "pr-comment".to_string()
    }
}

/// LLM analysis configuration of a Repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiAnalysisConfig {
    #[serde(default)]
    pub enabled: bool,

    /// `openai` or `gemini`.
    pub provider: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_url: String,

    pub secret_ref: SecretRef,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub roles: Vec<AnalysisRole>,
}

/// Repository level settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySettings {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub github_app_token_scope_repos: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pipelinerun_provenance: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitlab: Option<CommentSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<CommentSettings>,

    #[serde(default, rename = "ai", skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<AiAnalysisConfig>,
}

/// Desired state of a Repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySpec {
    /// Nil or non-positive means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_limit: Option<i32>,

    #[serde(default)]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_provider: Option<GitProvider>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incoming: Option<Vec<Incoming>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<Param>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<RepositorySettings>,
}

impl RepositorySpec {
    /// Effective concurrency limit, `None` when unlimited.
    pub fn effective_concurrency_limit(&self) -> Option<usize> {
        match self.concurrency_limit {
            Some(limit) if limit > 0 => Some(limit as usize),
            _ => None,
        }
    }

    /// Merges the controller-wide `global` spec into `local`.
    ///
    /// Local values win; a global value fills a field only when the local
    /// one is unset. Settings merge field by field. The git provider is
    /// merged only when both sides refer to the same provider type (or one
    /// side leaves the type empty), so credentials never cross providers.
    /// Neither input is modified.
    pub fn merge(local: &RepositorySpec, global: &RepositorySpec) -> RepositorySpec {
        let mut merged = local.clone();

        if merged.concurrency_limit.is_none() {
            merged.concurrency_limit = global.concurrency_limit;
        }
        if merged.incoming.is_none() {
            merged.incoming = global.incoming.clone();
        }
        if merged.params.is_none() {
            merged.params = global.params.clone();
        }

        merged.settings = match (&local.settings, &global.settings) {
            (Some(l), Some(g)) => Some(merge_settings(l, g)),
            (None, Some(g)) => Some(g.clone()),
            (l, None) => l.clone(),
        };

        merged.git_provider = match (&local.git_provider, &global.git_provider) {
            (Some(l), Some(g)) => Some(merge_git_provider(l, g)),
            (None, Some(g)) => Some(g.clone()),
            (l, None) => l.clone(),
        };

        merged
    }
}

fn merge_settings(local: &RepositorySettings, global: &RepositorySettings) -> RepositorySettings {
    let mut merged = local.clone();
    if merged.pipelinerun_provenance.is_empty() {
        merged.pipelinerun_provenance = global.pipelinerun_provenance.clone();
    }
    if merged.policy.is_none() {
        merged.policy = global.policy.clone();
    }
    if merged.github_app_token_scope_repos.is_empty() {
        merged.github_app_token_scope_repos = global.github_app_token_scope_repos.clone();
    }
    if merged.gitlab.is_none() {
        merged.gitlab = global.gitlab.clone();
    }
    if merged.github.is_none() {
        merged.github = global.github.clone();
    }
    if merged.ai_analysis.is_none() {
        merged.ai_analysis = global.ai_analysis.clone();
    }
    merged
}

fn merge_git_provider(local: &GitProvider, global: &GitProvider) -> GitProvider {
    let compatible =
        local.type_.is_empty() || global.type_.is_empty() || local.type_ == global.type_;
    if !compatible {
        return local.clone();
    }

    let mut merged = local.clone();
    if merged.type_.is_empty() {
        merged.type_ = global.type_.clone();
    }
    if merged.url.is_empty() {
        merged.url = global.url.clone();
    }
    if merged.user.is_empty() {
        merged.user = global.user.clone();
    }
    if merged.secret.is_none() {
        merged.secret = global.secret.clone();
    }
    if merged.webhook_secret.is_none() {
        merged.webhook_secret = global.webhook_secret.clone();
    }
    merged
}

// ============================================================================
// Status Types
// ============================================================================

/// Short description of a failed task kept in the run history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_snippet: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

/// One entry of the Repository run history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRunStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(rename = "pipelineRunName")]
    pub pipeline_run_name: String,

    #[serde(rename = "startTime", default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(
        rename = "completionTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub completion_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub sha: String,

    #[serde(default)]
    pub sha_url: String,

    #[serde(default)]
    pub title: String,

    #[serde(rename = "logurl", default)]
    pub log_url: String,

    #[serde(default)]
    pub target_branch: String,

    #[serde(default)]
    pub event_type: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failure_reason: BTreeMap<String, TaskInfo>,
}

/// Appends `entry` to `history`, evicting the oldest entries so that at most
/// `max` remain.
pub fn push_run_status(history: &mut Vec<RepositoryRunStatus>, entry: RepositoryRunStatus, max: usize) {
    history.push(entry);
    if history.len() > max {
        let excess = history.len() - max;
        history.drain(0..excess);
    }
}

// ============================================================================
// Repository
// ============================================================================

/// The Repository custom resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    #[serde(default = "Repository::api_version")]
    pub api_version: String,

    #[serde(default = "Repository::kind")]
    pub kind: String,

    pub metadata: ObjectMeta,

    pub spec: RepositorySpec,

    #[serde(
        rename = "pipelinerun_status",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub status: Vec<RepositoryRunStatus>,
}

impl Repository {
    fn api_version() -> String {
        keys::REPOSITORY_API_VERSION.to_string()
    }

    fn kind() -> String {
        "Repository".to_string()
    }

    /// Creates a Repository with the given identity and URL.
    pub fn new(namespace: &str, name: &str, url: &str) -> Self {
        Self {
            api_version: Self::api_version(),
            kind: Self::kind(),
            metadata: ObjectMeta::named(namespace, name),
            spec: RepositorySpec {
                url: url.to_string(),
                ..Default::default()
            },
            status: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    /// True when this Repository serves `url`, ignoring a trailing slash.
    pub fn matches_url(&self, url: &str) -> bool {
        normalize_url(&self.spec.url) == normalize_url(url)
    }
}

/// Removes trailing slashes and a `.git` suffix for URL comparison.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    trimmed
        .strip_suffix(".git")
        .unwrap_or(trimmed)
        .to_string()
}

#[cfg(test)]
#[path = "repository_tests.rs"]
mod tests;
