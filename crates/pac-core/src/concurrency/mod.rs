//! # Concurrency
//!
//! Admission of new PipelineRuns under a Repository's concurrency limit,
//! cancel-in-progress, and the in-process queue that starts pending runs
//! once a slot frees up.
//!
//! A Repository without a positive `concurrency_limit` gets its runs
//! submitted running. With a limit, every run is submitted in the Tekton
//! `PipelineRunPending` state and labelled `state=queued`; the
//! [`queue::QueueManager`] decides when each one starts.

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::keys;
use crate::kube::{KubeClient, KubeError};
use crate::repository::Repository;
use crate::tekton::{spec_status, PipelineRun};

pub mod cancel;
pub mod queue;
pub mod sync;

pub use cancel::{
    cancel_for_closed_pull_request, cancel_from_comment, cancel_in_progress_matching,
};
pub use queue::QueueManager;
pub use sync::{SchedulerError, SyncManager};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConcurrencyError {
    #[error("cancel in progress is not supported with concurrency limit (repository {repository})")]
    CancelWithConcurrencyLimit { repository: String },

    #[error("failed to list pipelineRuns: {0}")]
    Kube(#[from] KubeError),

    #[error("pipelineRun {key} is missing the {annotation} annotation")]
    MissingAnnotation { key: String, annotation: String },
}

impl ConcurrencyError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Kube(e) => e.is_transient(),
            Self::CancelWithConcurrencyLimit { .. } | Self::MissingAnnotation { .. } => false,
        }
    }

    pub fn error_category(&self) -> crate::ErrorCategory {
        match self {
            Self::Kube(e) => e.error_category(),
            Self::CancelWithConcurrencyLimit { .. } => crate::ErrorCategory::Configuration,
            Self::MissingAnnotation { .. } => crate::ErrorCategory::Permanent,
        }
    }
}

// ============================================================================
// Admission
// ============================================================================

/// How a PipelineRun enters the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Submitted running.
    Started,
    /// Submitted pending, waiting for a queue slot.
    Queued,
}

impl Admission {
    /// Admission mode for runs of `repo`.
    pub fn for_repository(repo: &Repository) -> Self {
        match repo.spec.effective_concurrency_limit() {
            Some(_) => Self::Queued,
            None => Self::Started,
        }
    }

    /// Value of the `state` label and annotation.
    pub fn state(&self) -> &'static str {
        match self {
            Self::Started => keys::state::STARTED,
            Self::Queued => keys::state::QUEUED,
        }
    }
}

/// Orders runs of one event by template name, the order in which they are
/// submitted and queued.
pub fn sort_for_submission(runs: &mut [PipelineRun]) {
    runs.sort_by_key(|pr| pr.template_name());
}

/// Stamps `pr` with the admission state of `repo` and returns it.
pub fn admit(pr: &mut PipelineRun, repo: &Repository) -> Admission {
    let admission = Admission::for_repository(repo);
    let meta = &mut pr.metadata;
    meta.labels
        .insert(keys::STATE.to_string(), admission.state().to_string());
    meta.annotations
        .insert(keys::STATE.to_string(), admission.state().to_string());

    match admission {
        Admission::Queued => {
            pr.spec.status = spec_status::PENDING.to_string();
        }
        Admission::Started => {
            pr.spec.status.clear();
            meta.annotations
                .insert(keys::SCM_REPORTING_PLR_STARTED.to_string(), "true".to_string());
        }
    }
    debug!(
        pipelinerun = %pr.template_name(),
        state = %admission.state(),
        "Admitted PipelineRun"
    );
    admission
}

/// Records the submission order of the queued runs of one event on each of
/// them, so the queue can be rebuilt after a restart.
pub async fn record_execution_order(
    kube: &dyn KubeClient,
    created: &[PipelineRun],
) -> Result<Vec<String>, ConcurrencyError> {
    let queued: Vec<&PipelineRun> = created.iter().filter(|pr| pr.is_pending()).collect();
    let order: Vec<String> = queued.iter().map(|pr| pr.metadata.key()).collect();
    if order.is_empty() {
        return Ok(order);
    }

    let patch = json!({
        "metadata": {"annotations": {keys::EXECUTION_ORDER: order.join(",")}}
    });
    for pr in queued {
        kube.patch_pipeline_run(&pr.metadata.namespace, &pr.metadata.name, &patch)
            .await?;
    }
    info!(order = %order.join(","), "Recorded execution order of queued PipelineRuns");
    Ok(order)
}

/// Merge patch that takes a run out of the pending state.
pub fn start_patch() -> Value {
    json!({
        "spec": {"status": Value::Null},
        "metadata": {
            "labels": {keys::STATE: keys::state::STARTED},
            "annotations": {keys::STATE: keys::state::STARTED},
        }
    })
}

/// Starts the queued run `key` (`namespace/name`).
pub async fn start_pipeline_run(
    kube: &dyn KubeClient,
    key: &str,
) -> Result<PipelineRun, ConcurrencyError> {
    let (namespace, name) = split_key(key)?;
    let started = kube
        .patch_pipeline_run(namespace, name, &start_patch())
        .await?;
    info!(pipelinerun = %key, "Started queued PipelineRun");
    Ok(started)
}

pub(crate) fn split_key(key: &str) -> Result<(&str, &str), ConcurrencyError> {
    key.split_once('/')
        .filter(|(ns, name)| !ns.is_empty() && !name.is_empty())
        .ok_or_else(|| {
            ConcurrencyError::Kube(KubeError::Invalid {
                message: format!("invalid pipelineRun key {}", key),
            })
        })
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
