//! Response bodies of the HTTP surface

use chrono::{DateTime, Utc};
use pac_core::OrchestratorOutcome;
use serde::Serialize;

/// Answer to a processed or skipped webhook.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WebhookResponse {
    /// `processed` or `skipped`
    pub status: String,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// `namespace/name` of the runs that exist in the cluster.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pipeline_runs: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cancelled: Vec<String>,

    /// Templates rejected before submission.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<String>,

    /// Templates whose submission failed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureSummary>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailureSummary {
    pub template: String,
    pub error: String,
}

impl WebhookResponse {
    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            status: "skipped".to_string(),
            message: message.into(),
            event_id: None,
            provider: None,
            repository: None,
            pipeline_runs: Vec::new(),
            cancelled: Vec::new(),
            validation_errors: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Summarises what the orchestrator did with an event.
    pub fn from_outcome(event_id: String, provider: &str, outcome: &OrchestratorOutcome) -> Self {
        let (status, message) = match &outcome.skipped {
            Some(reason) => ("skipped", reason.clone()),
            None => (
                "processed",
                format!(
                    "{} PipelineRun(s) created",
                    outcome.pipeline_runs.len()
                ),
            ),
        };
        Self {
            status: status.to_string(),
            message,
            event_id: Some(event_id),
            provider: Some(provider.to_string()),
            repository: outcome.repository.as_ref().map(|r| r.metadata.key()),
            pipeline_runs: outcome
                .pipeline_runs
                .iter()
                .map(|pr| pr.metadata.key())
                .collect(),
            cancelled: outcome.cancelled.clone(),
            validation_errors: outcome
                .validation_errors
                .iter()
                .map(|v| format!("{}: {}", v.name, v.error))
                .collect(),
            failures: outcome
                .failures
                .iter()
                .map(|f| FailureSummary {
                    template: f.template.clone(),
                    error: f.error.to_string(),
                })
                .collect(),
        }
    }
}

/// Answer to a scheduler registration.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterResponse {
    pub message: String,

    /// Runs started by this registration.
    pub started: Vec<String>,
}

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub providers: Vec<String>,
}

/// Readiness check response
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub timestamp: DateTime<Utc>,
}
