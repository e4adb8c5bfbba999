//! # Kubernetes Client
//!
//! Typed access to the handful of Kubernetes resources the controller reads
//! and writes: Repositories, Secrets, the controller ConfigMap, PipelineRuns,
//! TaskRuns, pod logs and events.
//!
//! Business logic only sees the [`KubeClient`] trait. [`MemoryKubeClient`]
//! backs tests and local runs; [`HttpKubeClient`] talks to a real API server.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

use crate::repository::Repository;
use crate::resources::{ConfigMap, EventSeverity, RepositoryEvent, Secret};
use crate::tekton::{PipelineRun, TaskRun};

pub mod http;
pub mod memory;

pub use http::{HttpKubeClient, KubeHttpConfig};
pub use memory::MemoryKubeClient;

/// Maximum attempts of a Get-then-Update loop on optimistic-concurrency
/// conflicts.
pub const MAX_CONFLICT_RETRIES: usize = 5;

// ============================================================================
// Errors
// ============================================================================

/// Errors returned by Kubernetes operations
#[derive(Debug, thiserror::Error)]
pub enum KubeError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} was modified concurrently")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("Invalid object: {message}")]
    Invalid { message: String },

    #[error("Kubernetes API request failed: {message}")]
    Transport { message: String },
}

impl KubeError {
    pub(crate) fn not_found(kind: &str, namespace: &str, name: &str) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn already_exists(kind: &str, namespace: &str, name: &str) -> Self {
        Self::AlreadyExists {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn conflict(kind: &str, namespace: &str, name: &str) -> Self {
        Self::Conflict {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Transport { .. } => true,
            Self::NotFound { .. } => false,
            Self::AlreadyExists { .. } => false,
            Self::Invalid { .. } => false,
        }
    }

    /// Get error category for monitoring
    pub fn error_category(&self) -> crate::ErrorCategory {
        if self.is_transient() {
            crate::ErrorCategory::Transient
        } else {
            crate::ErrorCategory::Permanent
        }
    }
}

// ============================================================================
// Label Selectors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    In(String, Vec<String>),
    Exists(String),
}

/// Equality / set-based label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `key=value` requirement.
    pub fn equals(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements
            .push(Requirement::Equals(key.into(), value.into()));
        self
    }

    /// Adds a `key in (values)` requirement.
    pub fn in_values(mut self, key: impl Into<String>, values: &[&str]) -> Self {
        self.requirements.push(Requirement::In(
            key.into(),
            values.iter().map(|v| v.to_string()).collect(),
        ));
        self
    }

    /// Adds a `key` existence requirement.
    pub fn exists(mut self, key: impl Into<String>) -> Self {
        self.requirements.push(Requirement::Exists(key.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// True when `labels` satisfy every requirement.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| match r {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::In(k, vs) => labels.get(k).map(|l| vs.contains(l)).unwrap_or(false),
            Requirement::Exists(k) => labels.contains_key(k),
        })
    }

    /// Renders the selector in the API server's `labelSelector` syntax.
    pub fn to_query_string(&self) -> String {
        self.requirements
            .iter()
            .map(|r| match r {
                Requirement::Equals(k, v) => format!("{}={}", k, v),
                Requirement::In(k, vs) => format!("{} in ({})", k, vs.join(",")),
                Requirement::Exists(k) => k.clone(),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

// ============================================================================
// Client Trait
// ============================================================================

/// Typed Kubernetes client used by the controller.
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Lists Repositories in `namespace`, or in every namespace when `None`.
    async fn list_repositories(&self, namespace: Option<&str>)
        -> Result<Vec<Repository>, KubeError>;

    async fn get_repository(&self, namespace: &str, name: &str) -> Result<Repository, KubeError>;

    /// Replaces a Repository; fails with `Conflict` on a stale
    /// `resourceVersion`.
    async fn update_repository(&self, repo: &Repository) -> Result<Repository, KubeError>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, KubeError>;

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, KubeError>;

    async fn update_secret(&self, secret: &Secret) -> Result<Secret, KubeError>;

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), KubeError>;

    async fn list_secrets(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Secret>, KubeError>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, KubeError>;

    /// Creates a PipelineRun; `generateName` is honoured.
    async fn create_pipeline_run(&self, pr: &PipelineRun) -> Result<PipelineRun, KubeError>;

    async fn get_pipeline_run(&self, namespace: &str, name: &str)
        -> Result<PipelineRun, KubeError>;

    /// Lists PipelineRuns in `namespace` (all namespaces when `None`).
    async fn list_pipeline_runs(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<PipelineRun>, KubeError>;

    /// Applies a JSON merge patch (RFC 7386).
    async fn patch_pipeline_run(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<PipelineRun, KubeError>;

    async fn delete_pipeline_run(&self, namespace: &str, name: &str) -> Result<(), KubeError>;

    /// TaskRuns belonging to a PipelineRun.
    async fn list_task_runs(
        &self,
        namespace: &str,
        pipeline_run: &str,
    ) -> Result<Vec<TaskRun>, KubeError>;

    async fn get_pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        tail_lines: Option<usize>,
    ) -> Result<String, KubeError>;

    /// Records a Kubernetes event on a Repository.
    async fn emit_event(&self, event: &RepositoryEvent) -> Result<(), KubeError>;
}

/// Emits a Repository event, logging instead of failing when the API
/// rejects it.
pub async fn emit_repository_event(
    kube: &dyn KubeClient,
    repo: &Repository,
    severity: EventSeverity,
    reason: &str,
    message: impl Into<String>,
) {
    let event = RepositoryEvent {
        namespace: repo.namespace().to_string(),
        repository: repo.name().to_string(),
        severity,
        reason: reason.to_string(),
        message: message.into(),
    };
    if let Err(e) = kube.emit_event(&event).await {
        warn!(
            repository = %repo.name(),
            reason = %reason,
            error = %e,
            "Failed to emit repository event"
        );
    }
}

/// Applies an RFC 7386 JSON merge patch to `target`.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                let entry = target_map.entry(key.clone()).or_insert(Value::Null);
                apply_merge_patch(entry, value);
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
