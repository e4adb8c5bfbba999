//! # Reconciler
//!
//! Follows submitted PipelineRuns until they finish.
//!
//! For every PipelineRun managed by this controller the reconciler:
//!
//! 1. Starts queued runs when their Repository has a free slot
//! 2. Reports the final status to the VCS once Tekton marks the run done
//! 3. Appends the run to the Repository history and records the final
//!    `state` on the run
//! 4. Hands the freed slot to the next queued run
//! 5. Deletes runs of the same template beyond `max-keep-runs`
//!
//! The VCS event is rebuilt from the annotations stamped at creation, so a
//! run can be reconciled by a controller that never saw its webhook.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::cmp::Reverse;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::concurrency::{self, ConcurrencyError, QueueManager};
use crate::event::{Event, TriggerType};
use crate::formatting::{clean_label_value, org_repo_from_url};
use crate::keys;
use crate::kube::{emit_repository_event, KubeClient, KubeError, LabelSelector};
use crate::provider::{Provider, ProviderError, RunStatus, StatusOptions};
use crate::repository::Repository;
use crate::resources::EventSeverity;
use crate::secrets::{self, SecretError, STALE_SECRET_AGE_MINUTES};
use crate::settings::{ControllerInfo, Settings, SettingsError};
use crate::status::{self, StatusError};
use crate::tekton::{PipelineRun, TaskRun};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("no provider {provider} registered for pipelinerun {pipeline_run}")]
    UnknownProvider {
        provider: String,
        pipeline_run: String,
    },

    #[error("pipelinerun {pipeline_run} has no {annotation} annotation")]
    MissingAnnotation {
        pipeline_run: String,
        annotation: String,
    },

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("cannot set up provider client: {0}")]
    Provider(#[from] ProviderError),

    #[error("cannot update run status: {0}")]
    Status(#[from] StatusError),

    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    #[error("kubernetes error: {0}")]
    Kube(#[from] KubeError),
}

impl ReconcileError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Settings(e) => e.is_transient(),
            Self::Secret(e) => e.is_transient(),
            Self::Provider(e) => e.is_transient(),
            Self::Status(e) => e.is_transient(),
            Self::Concurrency(e) => e.is_transient(),
            Self::Kube(e) => e.is_transient(),
            Self::UnknownProvider { .. } | Self::MissingAnnotation { .. } => false,
        }
    }

    pub fn error_category(&self) -> crate::ErrorCategory {
        match self {
            Self::UnknownProvider { .. } => crate::ErrorCategory::Configuration,
            Self::MissingAnnotation { .. } => crate::ErrorCategory::Permanent,
            Self::Settings(e) => e.error_category(),
            Self::Secret(e) => e.error_category(),
            Self::Provider(e) => e.error_category(),
            Self::Status(e) => e.error_category(),
            Self::Concurrency(e) => e.error_category(),
            Self::Kube(e) => e.error_category(),
        }
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// What a reconciliation pass did with a PipelineRun.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Already reported, or owned by another controller.
    Skipped,

    /// Still executing; nothing to do yet.
    Running,

    /// A queued run was handed to the queue. `started` lists the runs that
    /// acquired a slot as a result.
    Queued { started: Vec<String> },

    /// The final status was reported.
    Reported {
        state: String,
        started: Vec<String>,
        deleted: Vec<String>,
    },
}

// ============================================================================
// Completion Hooks
// ============================================================================

/// A finished PipelineRun together with everything needed to comment on it.
pub struct CompletedRun<'a> {
    pub event: &'a Event,
    pub repository: &'a Repository,
    pub pipeline_run: &'a PipelineRun,
    pub task_runs: &'a [TaskRun],
    pub settings: &'a Settings,
    pub provider: &'a dyn Provider,
}

/// Work triggered after the final status of a run was reported.
///
/// Hooks handle their own failures; a hook never fails reconciliation.
#[async_trait]
pub trait CompletionHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_completed(&self, run: &CompletedRun<'_>);
}

// ============================================================================
// Event Reconstruction
// ============================================================================

/// Rebuilds the event a PipelineRun was created for from its annotations.
pub fn event_from_pipeline_run(pr: &PipelineRun) -> Event {
    let annotation = |key: &str| pr.annotation(key).unwrap_or_default().to_string();

    let mut event = Event::new(
        annotation(keys::EVENT_TYPE),
        TriggerType::from_wire(&annotation(keys::TRIGGER_TARGET)),
    );
    event.url = annotation(keys::REPO_URL);
    event.head_url = annotation(keys::SOURCE_REPO_URL);
    event.organization = annotation(keys::URL_ORG);
    event.repository = annotation(keys::URL_REPOSITORY);
    if event.organization.is_empty() || event.repository.is_empty() {
        if let Some((org, repo)) = org_repo_from_url(&event.url) {
            event.organization = org;
            event.repository = repo;
        }
    }
    event.sha = annotation(keys::SHA);
    event.sha_title = annotation(keys::SHA_TITLE);
    event.sha_url = annotation(keys::SHA_URL);
    event.sender = annotation(keys::SENDER);
    event.base_branch = annotation(keys::BRANCH);
    event.head_branch = annotation(keys::SOURCE_BRANCH);
    event.ghe_url = annotation(keys::GHE_URL);
    event.pull_request_number = pr.annotation(keys::PULL_REQUEST).and_then(|v| v.parse().ok());
    event.installation_id = pr
        .annotation(keys::INSTALLATION_ID)
        .and_then(|v| v.parse().ok());
    event.source_project_id = pr
        .annotation(keys::SOURCE_PROJECT_ID)
        .and_then(|v| v.parse().ok());
    event.target_project_id = pr
        .annotation(keys::TARGET_PROJECT_ID)
        .and_then(|v| v.parse().ok());
    event
}

/// Deletes finished runs of `finished`'s template beyond the newest
/// `max_keep`. Runs still executing are never deleted.
pub async fn cleanup_pipeline_runs(
    kube: &dyn KubeClient,
    repo: &Repository,
    finished: &PipelineRun,
    max_keep: usize,
) -> Result<Vec<String>, KubeError> {
    let Some(template) = finished.metadata.labels.get(keys::ORIGINAL_PRNAME) else {
        debug!(pipelinerun = %finished.metadata.key(), "No original-prname label, skipping cleanup");
        return Ok(Vec::new());
    };
    let selector = LabelSelector::new()
        .equals(keys::REPOSITORY, clean_label_value(repo.name()))
        .equals(keys::ORIGINAL_PRNAME, template.as_str());
    let mut runs = kube
        .list_pipeline_runs(Some(&finished.metadata.namespace), &selector)
        .await?;

    // Unfinished runs first, then newest completion first.
    runs.sort_by_key(|pr| {
        let completed = pr.status.as_ref().and_then(|s| s.completion_time);
        (completed.is_some(), Reverse(completed))
    });

    let mut deleted = Vec::new();
    for (index, run) in runs.iter().enumerate() {
        if !run.is_done() {
            debug!(pipelinerun = %run.metadata.key(), "Skipping cleanup of a running pipelinerun");
            continue;
        }
        if index < max_keep {
            continue;
        }
        match kube
            .delete_pipeline_run(&run.metadata.namespace, &run.metadata.name)
            .await
        {
            Ok(()) => {
                info!(pipelinerun = %run.metadata.key(), max_keep, "Cleaned up old pipelinerun");
                deleted.push(run.metadata.name.clone());
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(deleted)
}

// ============================================================================
// Reconciler
// ============================================================================

/// Provider client and settings bound for one PipelineRun.
struct RunContext {
    provider: Arc<dyn Provider>,
    settings: Settings,
    repo: Repository,
    event: Event,
}

/// Drives managed PipelineRuns to their final state.
pub struct Reconciler {
    kube: Arc<dyn KubeClient>,
    providers: Vec<Arc<dyn Provider>>,
    controller: ControllerInfo,
    queues: Arc<QueueManager>,
    hooks: Vec<Arc<dyn CompletionHook>>,
}

impl Reconciler {
    pub fn new(
        kube: Arc<dyn KubeClient>,
        providers: Vec<Arc<dyn Provider>>,
        controller: ControllerInfo,
        queues: Arc<QueueManager>,
    ) -> Self {
        Self {
            kube,
            providers,
            controller,
            queues,
            hooks: Vec::new(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn queues(&self) -> &Arc<QueueManager> {
        &self.queues
    }

    /// Reconciles every managed PipelineRun in the cluster. Errors are
    /// logged per run; returns the number of runs acted upon.
    pub async fn reconcile_all(&self) -> Result<usize, ReconcileError> {
        let selector = LabelSelector::new().equals(keys::MANAGED_BY, keys::MANAGED_BY_VALUE);
        let runs = self.kube.list_pipeline_runs(None, &selector).await?;

        let mut acted = 0;
        for pr in &runs {
            match self.reconcile(pr).await {
                Ok(ReconcileOutcome::Skipped) | Ok(ReconcileOutcome::Running) => {}
                Ok(_) => acted += 1,
                Err(e) => warn!(
                    pipelinerun = %pr.metadata.key(),
                    error = %e,
                    transient = e.is_transient(),
                    "Failed to reconcile pipelinerun"
                ),
            }
        }
        Ok(acted)
    }

    #[instrument(skip(self, pr), fields(pipelinerun = %pr.metadata.key()))]
    pub async fn reconcile(&self, pr: &PipelineRun) -> Result<ReconcileOutcome, ReconcileError> {
        if !self.controller.owns(pr.annotation(keys::CONTROLLER_INFO)) {
            debug!("PipelineRun belongs to another controller");
            return Ok(ReconcileOutcome::Skipped);
        }

        let state = pr
            .metadata
            .labels
            .get(keys::STATE)
            .map(String::as_str)
            .or_else(|| pr.annotation(keys::STATE))
            .unwrap_or_default();
        if state == keys::state::COMPLETED || state == keys::state::FAILED {
            return Ok(ReconcileOutcome::Skipped);
        }

        if state == keys::state::QUEUED {
            if pr.is_pending() {
                return self.queue_pipeline_run(pr).await;
            }
            if !pr.is_done() {
                return self.report_started(pr).await;
            }
        }

        if !pr.is_done() && !pr.is_cancelled() {
            return Ok(ReconcileOutcome::Running);
        }
        self.report_final_status(pr).await
    }

    /// Deletes stale git auth secrets in every namespace holding a
    /// Repository.
    pub async fn sweep_stale_secrets(&self, now: DateTime<Utc>) -> Result<Vec<String>, ReconcileError> {
        let namespaces: BTreeSet<String> = self
            .kube
            .list_repositories(None)
            .await?
            .iter()
            .map(|r| r.namespace().to_string())
            .collect();

        let mut deleted = Vec::new();
        for namespace in namespaces {
            match secrets::sweep_stale_git_auth_secrets(
                self.kube.as_ref(),
                &namespace,
                Duration::minutes(STALE_SECRET_AGE_MINUTES),
                now,
            )
            .await
            {
                Ok(names) => deleted.extend(names),
                Err(e) => warn!(namespace = %namespace, error = %e, "Failed to sweep git auth secrets"),
            }
        }
        Ok(deleted)
    }

    fn provider_for(&self, pr: &PipelineRun) -> Result<Arc<dyn Provider>, ReconcileError> {
        let name = pr
            .metadata
            .labels
            .get(keys::GIT_PROVIDER)
            .map(String::as_str)
            .or_else(|| pr.annotation(keys::GIT_PROVIDER))
            .unwrap_or_default();
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .cloned()
            .ok_or_else(|| ReconcileError::UnknownProvider {
                provider: name.to_string(),
                pipeline_run: pr.metadata.key(),
            })
    }

    async fn context(&self, pr: &PipelineRun) -> Result<RunContext, ReconcileError> {
        let provider = self.provider_for(pr)?;
        let settings = self.controller.load_settings(self.kube.as_ref()).await?;
        let repo_name =
            pr.annotation(keys::REPOSITORY)
                .ok_or_else(|| ReconcileError::MissingAnnotation {
                    pipeline_run: pr.metadata.key(),
                    annotation: keys::REPOSITORY.to_string(),
                })?;
        let repo = self
            .kube
            .get_repository(&pr.metadata.namespace, repo_name)
            .await?;
        let global = self.controller.global_repository(self.kube.as_ref()).await;

        let mut event = event_from_pipeline_run(pr);
        let merged = secrets::bind_credentials(
            self.kube.as_ref(),
            &self.controller.controller_secret(),
            &mut event,
            &repo,
            global.as_ref(),
        )
        .await?;
        provider.set_client(&mut event, &merged, &settings).await?;

        Ok(RunContext {
            provider,
            settings,
            repo: merged,
            event,
        })
    }

    /// Puts a pending run in its Repository queue and starts whatever
    /// acquired a slot.
    async fn queue_pipeline_run(&self, pr: &PipelineRun) -> Result<ReconcileOutcome, ReconcileError> {
        let ctx = self.context(pr).await?;
        let key = pr.metadata.key();

        let acquired = if ctx.repo.spec.effective_concurrency_limit().is_some() {
            let mut order: Vec<String> = pr
                .annotation(keys::EXECUTION_ORDER)
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
            if !order.contains(&key) {
                order.push(key);
            }
            self.queues.add_list_to_running_queue(&ctx.repo, &order)
        } else {
            info!(pipelinerun = %key, "Repository has no concurrency limit, starting queued pipelinerun");
            vec![key]
        };

        let started = self.start_queued(&ctx, acquired).await;
        Ok(ReconcileOutcome::Queued { started })
    }

    /// Starts `keys` in order. A run that cannot be started gives its slot
    /// to the next one in the queue.
    async fn start_queued(&self, ctx: &RunContext, keys: Vec<String>) -> Vec<String> {
        let mut pending: VecDeque<String> = keys.into();
        let mut started = Vec::new();
        while let Some(key) = pending.pop_front() {
            match concurrency::start_pipeline_run(self.kube.as_ref(), &key).await {
                Ok(run) => {
                    self.post_submitted_status(ctx, &run).await;
                    started.push(key);
                }
                Err(e) => {
                    warn!(pipelinerun = %key, error = %e, "Cannot start queued pipelinerun");
                    if let Some(next) = self.queues.remove_key_and_take_next(&ctx.repo, &key) {
                        pending.push_back(next);
                    }
                }
            }
        }
        started
    }

    /// A queued run left the pending state without us; record it as
    /// started and tell the VCS.
    async fn report_started(&self, pr: &PipelineRun) -> Result<ReconcileOutcome, ReconcileError> {
        let ctx = self.context(pr).await?;
        let started = self
            .kube
            .patch_pipeline_run(
                &pr.metadata.namespace,
                &pr.metadata.name,
                &concurrency::start_patch(),
            )
            .await?;
        self.post_submitted_status(&ctx, &started).await;
        Ok(ReconcileOutcome::Running)
    }

    async fn post_submitted_status(&self, ctx: &RunContext, run: &PipelineRun) {
        let mut event = event_from_pipeline_run(run);
        event.provider = ctx.event.provider.clone();
        let options = status::submitted_status(run, &ctx.settings);
        if let Err(e) = ctx.provider.create_status(&event, &options).await {
            warn!(pipelinerun = %run.metadata.key(), error = %e, "Cannot create in_progress status");
        }
    }

    async fn report_final_status(
        &self,
        pr: &PipelineRun,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let ctx = self.context(pr).await?;
        let kube = self.kube.as_ref();
        let namespace = &pr.metadata.namespace;
        let name = &pr.metadata.name;

        let task_runs = match kube.list_task_runs(namespace, name).await {
            Ok(runs) => runs,
            Err(e) => {
                warn!(error = %e, "Cannot list taskruns, reporting without task table");
                Vec::new()
            }
        };
        let failures = status::failed_tasks(kube, &task_runs, &ctx.settings).await;
        let conclusion = status::conclusion(pr);

        let options = StatusOptions {
            status: RunStatus::Completed,
            conclusion,
            title: status::conclusion_title(conclusion).to_string(),
            summary: format!(
                "{} has completed: {}",
                ctx.settings.application_name, conclusion
            ),
            text: status::task_status_table(
                &task_runs,
                ctx.provider.task_table_format(),
                &ctx.settings,
                pr,
            ),
            details_url: ctx.settings.console_url(namespace, name),
            pipeline_run_name: name.clone(),
            original_pipeline_run_name: pr.original_prname().unwrap_or_default().to_string(),
            tasks: failures.values().cloned().collect(),
            application_name: ctx.settings.application_name.clone(),
        };

        let mut final_state = keys::state::COMPLETED;
        if let Err(e) = ctx.provider.create_status(&ctx.event, &options).await {
            warn!(error = %e, "Cannot create final status");
            emit_repository_event(
                kube,
                &ctx.repo,
                EventSeverity::Warning,
                "RepositoryCreateStatus",
                format!("Cannot create status for {}: {}", name, e),
            )
            .await;
            final_state = keys::state::FAILED;
        }

        let mut entry = status::run_status_entry(pr, &ctx.settings);
        entry.failure_reason = failures;
        status::record_run_status(kube, ctx.repo.namespace(), ctx.repo.name(), entry).await?;

        let patch = json!({
            "metadata": {
                "labels": {keys::STATE: final_state},
                "annotations": {keys::STATE: final_state},
            }
        });
        kube.patch_pipeline_run(namespace, name, &patch).await?;
        info!(state = %final_state, conclusion = %conclusion, "Reported final status");

        let completed = CompletedRun {
            event: &ctx.event,
            repository: &ctx.repo,
            pipeline_run: pr,
            task_runs: &task_runs,
            settings: &ctx.settings,
            provider: ctx.provider.as_ref(),
        };
        for hook in &self.hooks {
            debug!(hook = hook.name(), "Running completion hook");
            hook.on_completed(&completed).await;
        }

        let mut started = Vec::new();
        if ctx.repo.spec.effective_concurrency_limit().is_some() {
            if let Some(next) = self.queues.remove_and_take_item_from_queue(&ctx.repo, pr) {
                started = self.start_queued(&ctx, vec![next]).await;
            }
        }

        let max_keep = ctx.settings.effective_max_keep_runs(
            pr.annotation(keys::MAX_KEEP_RUNS)
                .and_then(|v| v.trim().parse().ok()),
        );
        let deleted = match max_keep {
            Some(max) if max > 0 => match cleanup_pipeline_runs(kube, &ctx.repo, pr, max).await {
                Ok(deleted) => deleted,
                Err(e) => {
                    warn!(error = %e, "Failed to clean up old pipelineruns");
                    Vec::new()
                }
            },
            _ => Vec::new(),
        };

        Ok(ReconcileOutcome::Reported {
            state: final_state.to_string(),
            started,
            deleted,
        })
    }
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;
