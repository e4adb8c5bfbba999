//! # Cancel-in-progress
//!
//! Supersedes earlier runs when new activity arrives. Three entry points
//! share one selection and patching path:
//!
//! - [`cancel_in_progress_matching`]: a new run of a template that opted in
//!   cancels older runs of the same template on the same branch
//! - [`cancel_from_comment`]: a `/cancel [name]` comment
//! - [`cancel_for_closed_pull_request`]: every opted-in run of a closed PR
//!
//! Victims are patched concurrently with a JSON merge patch setting
//! `spec.status` to `Cancelled`. A failed patch is reported on the
//! Repository event stream and never fails the triggering event.

use futures::future::join_all;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::event::{event_types, Event};
use crate::formatting::{clean_label_value, strip_heads_prefix};
use crate::keys;
use crate::kube::{emit_repository_event, KubeClient, LabelSelector};
use crate::repository::Repository;
use crate::resources::EventSeverity;
use crate::settings::Settings;
use crate::tekton::{spec_status, PipelineRun};

use super::ConcurrencyError;

/// Reason of the Repository events emitted by this module.
pub const EVENT_REASON: &str = "CancelInProgress";

/// `event-type` label values that belong to a pull request.
fn pull_request_event_types() -> Vec<String> {
    let mut types = vec![
        clean_label_value(event_types::PULL_REQUEST),
        clean_label_value(event_types::MERGE_REQUEST),
    ];
    types.extend(
        event_types::COMMENT_TYPES
            .iter()
            .map(|t| clean_label_value(t)),
    );
    types
}

fn with_pull_request_event_types(selector: LabelSelector) -> LabelSelector {
    let types = pull_request_event_types();
    let refs: Vec<&str> = types.iter().map(String::as_str).collect();
    selector.in_values(keys::EVENT_TYPE, &refs)
}

// ============================================================================
// Entry Points
// ============================================================================

/// Cancels older runs of the template `created` was made from.
///
/// The template's `cancel-in-progress` annotation overrides the global
/// setting for the event's trigger. Runs of other pull requests, of other
/// source branches and `created` itself are left alone. Returns the names
/// of the runs that were asked to cancel.
#[instrument(skip_all, fields(repository = %repo.name(), pipelinerun = %created.metadata.name))]
pub async fn cancel_in_progress_matching(
    kube: &dyn KubeClient,
    settings: &Settings,
    repo: &Repository,
    event: &Event,
    created: &PipelineRun,
) -> Result<Vec<String>, ConcurrencyError> {
    let (enabled, via) = match created.annotation(keys::CANCEL_IN_PROGRESS) {
        Some(value) => (value == "true", "via PipelineRun annotation"),
        None => (
            settings.cancel_in_progress_enabled_for(event.trigger_target),
            "globally via Pipelines-as-Code ConfigMap",
        ),
    };
    if !enabled {
        return Ok(Vec::new());
    }
    info!(trigger = %event.trigger_target, "cancel-in-progress is enabled {}", via);

    let Some(template) = created.metadata.labels.get(keys::ORIGINAL_PRNAME) else {
        return Ok(Vec::new());
    };

    if repo.spec.effective_concurrency_limit().is_some() {
        return Err(ConcurrencyError::CancelWithConcurrencyLimit {
            repository: repo.name().to_string(),
        });
    }

    let mut selector = LabelSelector::new()
        .equals(keys::URL_REPOSITORY, clean_label_value(&event.repository))
        .equals(keys::ORIGINAL_PRNAME, template.as_str());
    if event.trigger_target.is_pull_request() {
        selector = with_pull_request_event_types(
            selector.equals(keys::PULL_REQUEST, event.pull_request_number_string()),
        );
    }
    info!(selector = %selector.to_query_string(), "cancel-in-progress: selecting pipelineRuns to cancel");

    let runs = kube
        .list_pipeline_runs(Some(&created.metadata.namespace), &selector)
        .await?;
    let head_branch = strip_heads_prefix(&event.head_branch);
    let victims = runs
        .into_iter()
        .filter(|pr| {
            if let Some(source) = pr.annotation(keys::SOURCE_BRANCH) {
                if strip_heads_prefix(source) != head_branch {
                    info!(
                        pipelinerun = %pr.metadata.key(),
                        source_branch = %source,
                        head_branch = %event.head_branch,
                        "cancel-in-progress: skipping pipelinerun from another branch"
                    );
                    return false;
                }
            }
            pr.metadata.name != created.metadata.name
        })
        .collect();

    Ok(cancel_pipeline_runs(kube, repo, victims).await)
}

/// Cancels runs on behalf of a `/cancel` comment.
///
/// Pull request events select by PR number; other events by commit. A
/// targeted `/cancel <name>` keeps only runs of that template.
#[instrument(skip_all, fields(repository = %repo.name()))]
pub async fn cancel_from_comment(
    kube: &dyn KubeClient,
    repo: &Repository,
    event: &Event,
) -> Result<Vec<String>, ConcurrencyError> {
    let selector = if event.trigger_target.is_pull_request() {
        LabelSelector::new().equals(keys::PULL_REQUEST, event.pull_request_number_string())
    } else {
        LabelSelector::new()
            .equals(keys::URL_REPOSITORY, clean_label_value(&event.repository))
            .equals(keys::SHA, clean_label_value(&event.sha))
    };

    let runs = kube
        .list_pipeline_runs(Some(repo.namespace()), &selector)
        .await?;
    if runs.is_empty() {
        let message = format!(
            "no pipelinerun found for repository: {} , sha: {} and pulRequest {}",
            event.repository,
            event.sha,
            event.pull_request_number_string()
        );
        emit_repository_event(kube, repo, EventSeverity::Normal, EVENT_REASON, message).await;
        return Ok(Vec::new());
    }

    let target = event.state.target_cancel_pipeline_run.as_str();
    let victims = runs
        .into_iter()
        .filter(|pr| target.is_empty() || pr.annotation(keys::ORIGINAL_PRNAME) == Some(target))
        .collect();

    Ok(cancel_pipeline_runs(kube, repo, victims).await)
}

/// Cancels the in-progress runs of a pull request that was closed.
///
/// With the global pull request switch on, every run that does not carry
/// `cancel-in-progress: false` is cancelled; otherwise only runs that
/// carry `cancel-in-progress: true`.
#[instrument(skip_all, fields(repository = %repo.name()))]
pub async fn cancel_for_closed_pull_request(
    kube: &dyn KubeClient,
    settings: &Settings,
    repo: &Repository,
    event: &Event,
) -> Result<Vec<String>, ConcurrencyError> {
    let selector = with_pull_request_event_types(
        LabelSelector::new()
            .equals(keys::URL_REPOSITORY, clean_label_value(&event.repository))
            .equals(keys::PULL_REQUEST, event.pull_request_number_string()),
    );
    let globally_enabled = settings.enable_cancel_in_progress_on_pull_requests;

    let runs = kube
        .list_pipeline_runs(Some(repo.namespace()), &selector)
        .await?;
    let victims: Vec<PipelineRun> = runs
        .into_iter()
        .filter(|pr| {
            let opt = pr
                .metadata
                .labels
                .get(keys::CANCEL_IN_PROGRESS)
                .map(String::as_str)
                .or_else(|| pr.annotation(keys::CANCEL_IN_PROGRESS));
            if globally_enabled {
                opt != Some("false")
            } else {
                opt == Some("true")
            }
        })
        .collect();

    if victims.is_empty() {
        let message = format!(
            "no pipelinerun found for repository: {} and pullRequest {}",
            event.repository,
            event.pull_request_number_string()
        );
        emit_repository_event(kube, repo, EventSeverity::Normal, EVENT_REASON, message).await;
        return Ok(Vec::new());
    }

    Ok(cancel_pipeline_runs(kube, repo, victims).await)
}

// ============================================================================
// Patching
// ============================================================================

/// True when a run can still be cancelled.
pub fn is_cancellable(pr: &PipelineRun) -> bool {
    !(pr.is_cancelled() || pr.is_gracefully_stopped() || pr.is_done() || pr.is_pending())
}

/// Patches every cancellable run concurrently and waits for all patches.
async fn cancel_pipeline_runs(
    kube: &dyn KubeClient,
    repo: &Repository,
    runs: Vec<PipelineRun>,
) -> Vec<String> {
    let patch = json!({"spec": {"status": spec_status::CANCELLED}});

    let targets: Vec<PipelineRun> = runs
        .into_iter()
        .filter(|pr| {
            if is_cancellable(pr) {
                return true;
            }
            info!(
                pipelinerun = %pr.metadata.key(),
                spec_status = %pr.spec.status,
                "cancel-in-progress: skipping pipelinerun, already finished or not started"
            );
            false
        })
        .collect();

    let patches = targets.iter().map(|pr| {
        let patch = &patch;
        async move {
            info!(pipelinerun = %pr.metadata.key(), "cancel-in-progress: cancelling pipelinerun");
            kube.patch_pipeline_run(&pr.metadata.namespace, &pr.metadata.name, patch)
                .await
                .map(|_| pr.metadata.name.clone())
                .map_err(|e| (pr.metadata.key(), e))
        }
    });

    let mut cancelled = Vec::new();
    for result in join_all(patches).await {
        match result {
            Ok(name) => cancelled.push(name),
            Err((key, e)) => {
                warn!(pipelinerun = %key, error = %e, "Failed to cancel PipelineRun");
                let message = format!("failed to cancel pipelineRun {}: {}", key, e);
                emit_repository_event(kube, repo, EventSeverity::Warning, EVENT_REASON, message)
                    .await;
            }
        }
    }
    cancelled.sort();
    cancelled
}

#[cfg(test)]
#[path = "cancel_tests.rs"]
mod tests;
