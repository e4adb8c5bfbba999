//! # Orchestrator
//!
//! Turns one parsed webhook event into submitted PipelineRuns.
//!
//! The sequence for an event is:
//!
//! 1. Find the Repository for the event URL
//! 2. Bind credentials and validate the payload
//! 3. Check that the sender may run CI
//! 4. Read, render and parse the `.tekton/` directory
//! 5. Match templates, resolve remote tasks and compute parameters
//! 6. Admit each run under the Repository's concurrency policy and submit it
//! 7. Cancel superseded runs
//!
//! Closed pull requests and `/cancel` comments never submit anything; they
//! only cancel. Problems with individual templates are collected in the
//! outcome so the remaining templates still run.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::cel::Activation;
use crate::concurrency::{self, ConcurrencyError};
use crate::customparams::{standard_params, CustomParams, ParamsError};
use crate::event::{event_types, ChangedFiles, Event, TriggerType};
use crate::formatting::clean_label_value;
use crate::keys;
use crate::kube::{emit_repository_event, KubeClient, KubeError};
use crate::matcher::{describe_templates, filter_successful_reruns, MatchError, Matcher};
use crate::provider::{
    CommitStatus, Provider, ProviderError, RunStatus, StatusOptions, TektonFile,
};
use crate::repository::Repository;
use crate::resolve::{check_unique_templates, ResolveError, ResolveOptions, Resolver, TektonTypes};
use crate::resources::EventSeverity;
use crate::secrets::{self, SecretError};
use crate::settings::{ControllerInfo, Settings, SettingsError};
use crate::status::{self, ValidationError, VALIDATION_ERROR_HEADER};
use crate::tekton::PipelineRun;
use crate::templates;

/// Directory of the repository holding the templates.
pub const TEKTON_DIR: &str = ".tekton";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Match(#[from] MatchError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Params(#[from] ParamsError),

    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    #[error("kubernetes error: {0}")]
    Kube(#[from] KubeError),

    #[error("cannot render pipelinerun {name}: {message}")]
    Template { name: String, message: String },

    #[error("creating pipelinerun {name} in namespace {namespace} has failed: {source}")]
    Submission {
        name: String,
        namespace: String,
        #[source]
        source: KubeError,
    },

    #[error("cannot create status for pipelinerun {pipeline_run}: {source}")]
    Status {
        pipeline_run: String,
        #[source]
        source: ProviderError,
    },
}

impl OrchestratorError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Settings(e) => e.is_transient(),
            Self::Secret(e) => e.is_transient(),
            Self::Provider(e) => e.is_transient(),
            Self::Match(e) => e.is_transient(),
            Self::Resolve(e) => e.is_transient(),
            Self::Params(e) => e.is_transient(),
            Self::Concurrency(e) => e.is_transient(),
            Self::Kube(e) => e.is_transient(),
            Self::Submission { source, .. } => source.is_transient(),
            Self::Status { source, .. } => source.is_transient(),
            Self::Template { .. } => false,
        }
    }

    pub fn error_category(&self) -> crate::ErrorCategory {
        match self {
            Self::Settings(e) => e.error_category(),
            Self::Secret(e) => e.error_category(),
            Self::Provider(e) => e.error_category(),
            Self::Match(e) => e.error_category(),
            Self::Resolve(e) => e.error_category(),
            Self::Params(e) => e.error_category(),
            Self::Concurrency(e) => e.error_category(),
            Self::Kube(e) => e.error_category(),
            Self::Submission { source, .. } => source.error_category(),
            Self::Status { source, .. } => source.error_category(),
            Self::Template { .. } => crate::ErrorCategory::Permanent,
        }
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// A template that could not be fully submitted.
///
/// `pipeline_run` is set when the run exists in the cluster despite the
/// error, for example when only the status update failed.
#[derive(Debug)]
pub struct SubmissionFailure {
    pub template: String,
    pub pipeline_run: Option<PipelineRun>,
    pub error: OrchestratorError,
}

/// What happened to one event.
#[derive(Debug, Default)]
pub struct OrchestratorOutcome {
    /// Repository the event was routed to, with the global spec merged in.
    pub repository: Option<Repository>,

    /// Runs that exist in the cluster, in submission order.
    pub pipeline_runs: Vec<PipelineRun>,

    /// Why nothing was submitted, when nothing was.
    pub skipped: Option<String>,

    /// Templates rejected for YAML, annotation or expression errors.
    pub validation_errors: Vec<ValidationError>,

    /// Names of runs asked to cancel.
    pub cancelled: Vec<String>,

    pub failures: Vec<SubmissionFailure>,
}

impl OrchestratorOutcome {
    fn skip(mut self, reason: impl Into<String>) -> Self {
        self.skipped = Some(reason.into());
        self
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs the event pipeline for one controller deployment.
pub struct Orchestrator {
    kube: Arc<dyn KubeClient>,
    controller: ControllerInfo,
}

impl Orchestrator {
    pub fn new(kube: Arc<dyn KubeClient>, controller: ControllerInfo) -> Self {
        Self { kube, controller }
    }

    pub fn controller(&self) -> &ControllerInfo {
        &self.controller
    }

    /// Processes `event`. Errors abort the whole event; per-template
    /// problems are reported in the outcome instead.
    #[instrument(skip_all, fields(event_id = %event.event_id, event_type = %event.event_type, provider = provider.name()))]
    pub async fn run(
        &self,
        provider: &dyn Provider,
        mut event: Event,
    ) -> Result<OrchestratorOutcome, OrchestratorError> {
        let kube = self.kube.as_ref();
        let mut outcome = OrchestratorOutcome::default();

        // 1. Settings and Repository lookup
        let settings = self.controller.load_settings(kube).await?;
        let Some(local) = self.find_repository(&event.url).await? else {
            let message = format!("cannot find a namespace match for {}", event.url);
            warn!(url = %event.url, "No Repository matches the event");
            if event.provider.token.is_some() {
                let options = skipped_status(&settings, "Skipped", &message);
                if let Err(e) = provider.create_status(&event, &options).await {
                    warn!(error = %e, "Cannot create skipped status");
                }
            }
            return Ok(outcome.skip(message));
        };

        // 2. Credentials and payload validation
        let global = self.controller.global_repository(kube).await;
        let repo = secrets::setup_authenticated_client(
            kube,
            provider,
            &settings,
            &self.controller.controller_secret(),
            &mut event,
            &local,
            global.as_ref(),
        )
        .await?;
        outcome.repository = Some(repo.clone());
        info!(repository = %repo.name(), namespace = %repo.namespace(), event = %event.describe(), "Processing event");

        if event.trigger_target == TriggerType::PullRequestClosed {
            outcome.cancelled =
                concurrency::cancel_for_closed_pull_request(kube, &settings, &repo, &event).await?;
            return Ok(outcome.skip("pull request closed"));
        }

        // 3. Commit information and access control
        provider.get_commit_info(&mut event).await?;
        let needs_acl = !matches!(event.trigger_target, TriggerType::Push | TriggerType::Incoming)
            && event.event_type != event_types::INCOMING;
        if needs_acl && !provider.is_allowed(&event, &repo, &settings).await? {
            let message = denied_message(&event);
            info!(sender = %event.sender, "Sender is not allowed to run CI");
            emit_repository_event(
                kube,
                &repo,
                EventSeverity::Normal,
                "RepositoryPermissionDenied",
                message.clone(),
            )
            .await;
            let options = skipped_status(&settings, "Skipped", &message);
            if let Err(e) = provider.create_status(&event, &options).await {
                warn!(error = %e, "Cannot create skipped status");
            }
            return Ok(outcome.skip(message));
        }

        if event.state.cancel_pipeline_runs {
            outcome.cancelled = concurrency::cancel_from_comment(kube, &repo, &event).await?;
            return Ok(outcome.skip("cancel comment"));
        }

        // 4. Templates
        let files = provider.get_tekton_dir(&event, TEKTON_DIR).await?;
        if files.is_empty() {
            let message = format!(
                "cannot locate templates in {}/ directory for this repository in {}",
                TEKTON_DIR, event.head_branch
            );
            info!("{}", message);
            emit_repository_event(
                kube,
                &repo,
                EventSeverity::Normal,
                "RepositoryPipelineRunNotFound",
                message.clone(),
            )
            .await;
            return Ok(outcome.skip(message));
        }

        let matcher = Matcher::new(kube, provider, &repo);
        let changed = self.changed_files_if_needed(&matcher, &event, &repo, &files).await;
        let context = Activation::for_event(&event, &changed);
        let params = match CustomParams::new(kube, &repo, &event, &changed).compute().await {
            Ok(params) => params,
            Err(e) => {
                emit_repository_event(
                    kube,
                    &repo,
                    EventSeverity::Warning,
                    "ParamsError",
                    format!("error processing repository CR custom params: {}", e),
                )
                .await;
                standard_params(&event, repo.namespace())
            }
        };
        let rendered: Vec<TektonFile> = files
            .iter()
            .map(|f| TektonFile {
                path: f.path.clone(),
                content: templates::render(&f.content, &params, &context),
            })
            .collect();

        let types = TektonTypes::parse(&rendered);
        outcome.validation_errors = types.validation_errors.clone();
        check_unique_templates(&types.pipeline_runs)?;
        if types.pipeline_runs.is_empty() {
            self.report_validation_errors(provider, &event, &repo, &outcome.validation_errors)
                .await;
            return Ok(outcome.skip(format!(
                "no valid PipelineRun found in the {}/ directory",
                TEKTON_DIR
            )));
        }

        // 5. Matching
        let matched = matcher
            .match_templates(&types.pipeline_runs, &mut event)
            .await?;
        outcome.validation_errors.extend(matched.validation_errors);
        self.report_validation_errors(provider, &event, &repo, &outcome.validation_errors)
            .await;

        if matched.matches.is_empty() {
            let message = format!(
                "cannot match any PipelineRun to the event:\n{}",
                describe_templates(&types.pipeline_runs)
            );
            info!("{}", message);
            emit_repository_event(
                kube,
                &repo,
                EventSeverity::Normal,
                "RepositoryNoMatch",
                message.clone(),
            )
            .await;
            return Ok(outcome.skip(message));
        }

        let matches = filter_successful_reruns(kube, &event, matched.matches).await?;
        if matches.is_empty() {
            return Ok(outcome.skip("every matched PipelineRun already succeeded for this commit"));
        }

        // 6. Resolution, parameters and decoration
        let mut resolver = Resolver::new(
            provider,
            &settings,
            &types,
            ResolveOptions {
                remote_tasks: settings.remote_tasks,
                generate_name: true,
            },
        )?;
        let mut runs = Vec::new();
        let mut repos: BTreeMap<String, Repository> = BTreeMap::new();
        for m in matches {
            let template = m.pipeline_run.template_name();
            let resolved = match resolver.resolve(&event, m.pipeline_run.clone()).await {
                Ok(pr) => pr,
                Err(e) => {
                    error!(template = %template, error = %e, "Cannot resolve PipelineRun");
                    emit_repository_event(
                        kube,
                        &repo,
                        EventSeverity::Warning,
                        "RepositoryFailedToResolve",
                        format!("cannot resolve {}: {}", template, e),
                    )
                    .await;
                    outcome.failures.push(SubmissionFailure {
                        template,
                        pipeline_run: None,
                        error: e.into(),
                    });
                    continue;
                }
            };

            match self
                .prepare(provider, &settings, &event, &m.repo, &changed, resolved)
                .await
            {
                Ok(pr) => {
                    repos.insert(m.repo.namespace().to_string(), m.repo.clone());
                    runs.push(pr);
                }
                Err(error) => {
                    warn!(template = %template, error = %error, "Cannot prepare PipelineRun");
                    outcome.failures.push(SubmissionFailure {
                        template,
                        pipeline_run: None,
                        error,
                    });
                }
            }
        }

        // 7. Submission, in template name order
        concurrency::sort_for_submission(&mut runs);
        for pr in runs {
            let Some(target) = repos.get(&pr.metadata.namespace) else {
                continue;
            };
            match self
                .submit(provider, &settings, &event, target, pr)
                .await
            {
                Ok(created) => outcome.pipeline_runs.push(created),
                Err(failure) => {
                    if let Some(created) = &failure.pipeline_run {
                        outcome.pipeline_runs.push(created.clone());
                    }
                    outcome.failures.push(failure);
                }
            }
        }

        if let Err(e) = concurrency::record_execution_order(kube, &outcome.pipeline_runs).await {
            warn!(error = %e, "Cannot record execution order of queued PipelineRuns");
        }

        // 8. Supersede older runs
        for created in &outcome.pipeline_runs {
            let target = repos.get(&created.metadata.namespace).unwrap_or(&repo);
            match concurrency::cancel_in_progress_matching(kube, &settings, target, &event, created)
                .await
            {
                Ok(names) => outcome.cancelled.extend(names),
                Err(e) => {
                    warn!(pipelinerun = %created.metadata.name, error = %e, "Cannot cancel in-progress PipelineRuns");
                    emit_repository_event(
                        kube,
                        target,
                        EventSeverity::Warning,
                        concurrency::cancel::EVENT_REASON,
                        e.to_string(),
                    )
                    .await;
                }
            }
        }

        info!(
            submitted = outcome.pipeline_runs.len(),
            failed = outcome.failures.len(),
            cancelled = outcome.cancelled.len(),
            "Event processed"
        );
        Ok(outcome)
    }

    /// Oldest Repository serving `url`, across all namespaces.
    async fn find_repository(&self, url: &str) -> Result<Option<Repository>, KubeError> {
        let mut repos = self.kube.list_repositories(None).await?;
        repos.sort_by_key(|r| r.metadata.creation_timestamp);
        Ok(repos.into_iter().find(|r| r.matches_url(url)))
    }

    /// Changed files are fetched only when a placeholder or a parameter
    /// filter can read them.
    async fn changed_files_if_needed(
        &self,
        matcher: &Matcher<'_>,
        event: &Event,
        repo: &Repository,
        files: &[TektonFile],
    ) -> ChangedFiles {
        let in_placeholders = files.iter().any(|f| {
            templates::placeholders(&f.content)
                .iter()
                .any(|p| p.starts_with("files"))
        });
        let in_params = repo
            .spec
            .params
            .as_ref()
            .is_some_and(|params| params.iter().any(|p| !p.filter.is_empty()));
        if !in_placeholders && !in_params {
            return ChangedFiles::default();
        }
        match matcher.changed_files(event).await {
            Ok(files) => files.clone(),
            Err(e) => {
                warn!(error = %e, "Cannot list changed files");
                ChangedFiles::default()
            }
        }
    }

    async fn report_validation_errors(
        &self,
        provider: &dyn Provider,
        event: &Event,
        repo: &Repository,
        errors: &[ValidationError],
    ) {
        let Some(body) = status::validation_comment(errors) else {
            return;
        };
        if event.pull_request_number.is_some() {
            if let Err(e) = provider
                .create_comment(event, &body, Some(VALIDATION_ERROR_HEADER))
                .await
            {
                warn!(error = %e, "Cannot post validation errors comment");
            }
            return;
        }
        for err in errors {
            emit_repository_event(
                self.kube.as_ref(),
                repo,
                EventSeverity::Warning,
                "PipelineRunValidationErrors",
                format!("{}: {}", err.name, err.error),
            )
            .await;
        }
    }

    /// Parameters, git auth secret name, labels and admission state for one
    /// resolved run.
    async fn prepare(
        &self,
        provider: &dyn Provider,
        settings: &Settings,
        event: &Event,
        repo: &Repository,
        changed: &ChangedFiles,
        resolved: PipelineRun,
    ) -> Result<PipelineRun, OrchestratorError> {
        let mut params = CustomParams::new(self.kube.as_ref(), repo, event, changed)
            .compute()
            .await?;
        let secret_name = settings
            .secret_auto_create
            .then(secrets::git_auth_secret_name);
        if let Some(name) = &secret_name {
            params.insert("git_auth_secret".to_string(), name.clone());
        }

        let context = Activation::for_event(event, changed);
        let mut pr = render_pipeline_run(&resolved, &params, &context)?;
        if let Some(name) = secret_name {
            pr.metadata
                .annotations
                .insert(keys::GIT_AUTH_SECRET.to_string(), name);
        }
        decorate(&mut pr, event, repo, provider.name(), &self.controller);
        pr.metadata.namespace = repo.namespace().to_string();
        concurrency::admit(&mut pr, repo);
        Ok(pr)
    }

    /// Creates the git auth secret and the run, then reports it. A failed
    /// creation removes the secret again.
    #[instrument(skip_all, fields(template = %pr.template_name(), namespace = %repo.namespace()))]
    async fn submit(
        &self,
        provider: &dyn Provider,
        settings: &Settings,
        event: &Event,
        repo: &Repository,
        pr: PipelineRun,
    ) -> Result<PipelineRun, SubmissionFailure> {
        let kube = self.kube.as_ref();
        let template = pr.template_name();
        let namespace = repo.namespace().to_string();
        let fail = |pipeline_run: Option<PipelineRun>, error: OrchestratorError| SubmissionFailure {
            template: template.clone(),
            pipeline_run,
            error,
        };

        let secret = pr.annotation(keys::GIT_AUTH_SECRET).map(str::to_string);
        if let Some(name) = &secret {
            secrets::create_git_auth_secret(kube, event, &namespace, name)
                .await
                .map_err(|e| fail(None, e.into()))?;
        }

        let created = match kube.create_pipeline_run(&pr).await {
            Ok(created) => created,
            Err(source) => {
                if let Some(name) = &secret {
                    if let Err(e) = secrets::delete_git_auth_secret(kube, &namespace, name).await {
                        warn!(secret = %name, error = %e, "Cannot delete git auth secret after failed submission");
                    }
                }
                emit_repository_event(
                    kube,
                    repo,
                    EventSeverity::Warning,
                    "PipelineRunCreateFailure",
                    format!("creating pipelinerun {} in namespace {} has failed: {}", template, namespace, source),
                )
                .await;
                return Err(fail(
                    None,
                    OrchestratorError::Submission {
                        name: template.clone(),
                        namespace: namespace.clone(),
                        source,
                    },
                ));
            }
        };
        info!(
            pipelinerun = %created.metadata.name,
            namespace = %namespace,
            event_type = %event.event_type,
            "PipelineRun has been created"
        );

        let state = created
            .metadata
            .labels
            .get(keys::STATE)
            .cloned()
            .unwrap_or_else(|| keys::state::STARTED.to_string());
        let mut annotations = Map::new();
        annotations.insert(keys::STATE.to_string(), Value::String(state));
        annotations.insert(
            keys::LOG_URL.to_string(),
            Value::String(settings.console_url(&namespace, &created.metadata.name)),
        );
        if let Some(id) = event.installation_id.filter(|id| *id > 0) {
            annotations.insert(keys::INSTALLATION_ID.to_string(), Value::String(id.to_string()));
        }
        let patch = json!({"metadata": {"annotations": annotations}});
        let patched = kube
            .patch_pipeline_run(&namespace, &created.metadata.name, &patch)
            .await;
        let created = match patched {
            Ok(patched) => patched,
            Err(e) => return Err(fail(Some(created), e.into())),
        };

        if let Some(name) = &secret {
            let owned = secrets::set_owner_reference(kube, &namespace, name, &created).await;
            if let Err(e) = owned {
                return Err(fail(Some(created), e.into()));
            }
        }

        let options = status::submitted_status(&created, settings);
        if let Err(source) = provider.create_status(event, &options).await {
            let pipeline_run = created.metadata.name.clone();
            return Err(fail(
                Some(created),
                OrchestratorError::Status {
                    pipeline_run,
                    source,
                },
            ));
        }
        debug!(pipelinerun = %created.metadata.name, status = %options.status.as_str(), "Reported submitted PipelineRun");
        Ok(created)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn denied_message(event: &Event) -> String {
    if event.account_id.is_empty() {
        format!("User {} is not allowed to run CI on this repo.", event.sender)
    } else {
        format!(
            "User: {} AccountID: {} is not allowed to run CI on this repo.",
            event.sender, event.account_id
        )
    }
}

fn skipped_status(settings: &Settings, title: &str, text: &str) -> StatusOptions {
    StatusOptions {
        status: RunStatus::Completed,
        conclusion: CommitStatus::Skipped,
        title: title.to_string(),
        summary: format!("{} is skipping this commit.", settings.application_name),
        text: text.to_string(),
        application_name: settings.application_name.clone(),
        ..Default::default()
    }
}

/// Substitutes placeholders in the inlined run.
fn render_pipeline_run(
    pr: &PipelineRun,
    params: &BTreeMap<String, String>,
    context: &Activation,
) -> Result<PipelineRun, OrchestratorError> {
    let name = pr.template_name();
    let yaml = serde_yaml::to_string(pr).map_err(|e| OrchestratorError::Template {
        name: name.clone(),
        message: e.to_string(),
    })?;
    let rendered = templates::render(&yaml, params, context);
    serde_yaml::from_str(&rendered).map_err(|e| OrchestratorError::Template {
        name,
        message: e.to_string(),
    })
}

/// Labels are sanitised for selectors; annotations keep the raw values.
fn decorate(
    pr: &mut PipelineRun,
    event: &Event,
    repo: &Repository,
    provider: &str,
    controller: &ControllerInfo,
) {
    let labels = [
        (keys::MANAGED_BY, keys::MANAGED_BY_VALUE.to_string()),
        (keys::URL_ORG, clean_label_value(&event.organization)),
        (keys::URL_REPOSITORY, clean_label_value(&event.repository)),
        (keys::SHA, clean_label_value(&event.sha)),
        (keys::REPOSITORY, clean_label_value(repo.name())),
        (keys::EVENT_TYPE, clean_label_value(&event.event_type)),
        (keys::SENDER, clean_label_value(&event.sender)),
        (keys::BRANCH, clean_label_value(&event.base_branch)),
        (keys::GIT_PROVIDER, provider.to_string()),
    ];
    for (key, value) in labels {
        pr.metadata.labels.insert(key.to_string(), value);
    }

    let mut annotations = vec![
        (keys::SHA_TITLE, event.sha_title.clone()),
        (keys::SHA_URL, event.sha_url.clone()),
        (keys::REPO_URL, event.url.clone()),
        (keys::URL_ORG, event.organization.clone()),
        (keys::URL_REPOSITORY, event.repository.clone()),
        (keys::SHA, event.sha.clone()),
        (keys::SENDER, event.sender.clone()),
        (keys::BRANCH, event.base_branch.clone()),
        (keys::SOURCE_BRANCH, event.head_branch.clone()),
        (keys::REPOSITORY, repo.name().to_string()),
        (keys::GIT_PROVIDER, provider.to_string()),
        (keys::CONTROLLER_INFO, controller.annotation_value()),
        (keys::EVENT_TYPE, event.event_type.clone()),
        (keys::TRIGGER_TARGET, event.trigger_target.as_str().to_string()),
    ];
    if !event.head_url.is_empty() {
        annotations.push((keys::SOURCE_REPO_URL, event.head_url.clone()));
    }
    if let Some(id) = event.installation_id.filter(|id| *id > 0) {
        annotations.push((keys::INSTALLATION_ID, id.to_string()));
    }
    if !event.ghe_url.is_empty() {
        annotations.push((keys::GHE_URL, event.ghe_url.clone()));
    }
    if let Some(id) = event.source_project_id.filter(|id| *id != 0) {
        annotations.push((keys::SOURCE_PROJECT_ID, id.to_string()));
    }
    if let Some(id) = event.target_project_id.filter(|id| *id != 0) {
        annotations.push((keys::TARGET_PROJECT_ID, id.to_string()));
    }
    for (key, value) in annotations {
        pr.metadata.annotations.insert(key.to_string(), value);
    }

    if let Some(number) = event.pull_request_number {
        pr.metadata
            .labels
            .insert(keys::PULL_REQUEST.to_string(), number.to_string());
        pr.metadata
            .annotations
            .insert(keys::PULL_REQUEST.to_string(), number.to_string());
    }
    if let Some(value) = pr.annotation(keys::CANCEL_IN_PROGRESS).map(str::to_string) {
        pr.metadata
            .labels
            .insert(keys::CANCEL_IN_PROGRESS.to_string(), value);
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
