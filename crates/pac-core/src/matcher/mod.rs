//! # Template Matcher
//!
//! Decides which `.tekton/` PipelineRun templates run for an event.
//!
//! Each template is evaluated by [`Matcher::evaluate`], which applies the
//! rules in a fixed order and returns at the first decisive one:
//!
//! 1. A template explicitly targeted by name (`/test <name>`, `/retest
//!    <name>`, incoming webhooks) matches; no other template does
//! 2. Templates without annotations are skipped
//! 3. `target-namespace` moves the template to the Repository serving the
//!    same URL in that namespace; none there means skip
//! 4. `on-comment` matching the triggering comment matches
//! 5. Other plain comments are skipped
//! 6. Label events need an `on-label` annotation
//! 7. `on-cel-expression` decides alone when present
//! 8. Otherwise `on-event` and `on-target-branch` must both match, and the
//!    path and label filters must pass
//!
//! Annotation and CEL errors drop the template and are returned as
//! validation errors for the pull request comment.

use std::collections::BTreeMap;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::cel::ast::Expr;
use crate::cel::{Activation, CelError, Program};
use crate::event::{event_types, ChangedFiles, Event, TriggerType};
use crate::glob;
use crate::keys;
use crate::kube::{KubeClient, KubeError};
use crate::provider::{Provider, ProviderError};
use crate::repository::Repository;
use crate::status::ValidationError;
use crate::tekton::PipelineRun;

pub mod annotations;
pub mod retest;

pub use annotations::annotation_values;
pub use retest::filter_successful_reruns;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("invalid annotation {annotation}: {message}")]
    Annotation { annotation: String, message: String },

    #[error(transparent)]
    Cel(#[from] CelError),

    #[error("cannot list changed files: {0}")]
    Files(#[from] ProviderError),

    #[error("kubernetes error: {0}")]
    Kube(#[from] KubeError),
}

impl MatchError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Files(e) => e.is_transient(),
            Self::Kube(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn error_category(&self) -> crate::ErrorCategory {
        match self {
            Self::Annotation { .. } | Self::Cel(_) => crate::ErrorCategory::Permanent,
            Self::Files(e) => e.error_category(),
            Self::Kube(e) => e.error_category(),
        }
    }

    /// Errors caused by the template itself rather than the environment.
    fn is_template_error(&self) -> bool {
        matches!(self, Self::Annotation { .. } | Self::Cel(_))
    }
}

// ============================================================================
// Matches
// ============================================================================

/// A template selected for the event.
#[derive(Debug, Clone)]
pub struct Match {
    pub pipeline_run: PipelineRun,

    /// Repository the run belongs to; differs from the event's Repository
    /// when the template sets `target-namespace`.
    pub repo: Repository,

    /// Criteria that matched, keyed `target-event`, `target-branch`,
    /// `cel`, `comment`, `label`, `path-change`, `target-namespace`,
    /// `max-keep-runs`. `ignored` lists the annotations overridden by
    /// `on-cel-expression`.
    pub config: BTreeMap<String, String>,
}

/// Result of matching a set of templates.
#[derive(Debug, Default)]
pub struct MatchOutcome {
    pub matches: Vec<Match>,

    /// Templates dropped for invalid annotations or expressions.
    pub validation_errors: Vec<ValidationError>,
}

/// Outcome of one template.
#[derive(Debug)]
enum Decision {
    Matched {
        repo: Option<Repository>,
        config: BTreeMap<String, String>,
    },
    Skipped(String),
}

// ============================================================================
// Matcher
// ============================================================================

/// Matches templates for one event.
pub struct Matcher<'a> {
    kube: &'a dyn KubeClient,
    provider: &'a dyn Provider,
    repo: &'a Repository,
    files: OnceCell<ChangedFiles>,
}

impl<'a> Matcher<'a> {
    pub fn new(kube: &'a dyn KubeClient, provider: &'a dyn Provider, repo: &'a Repository) -> Self {
        Self {
            kube,
            provider,
            repo,
            files: OnceCell::new(),
        }
    }

    /// Changed files, fetched from the provider on first use.
    pub async fn changed_files(&self, event: &Event) -> Result<&ChangedFiles, MatchError> {
        Ok(self
            .files
            .get_or_try_init(|| self.provider.get_files(event))
            .await?)
    }

    /// Evaluate every template in order. A matching `on-comment` turns the
    /// event into an `on-comment` event.
    #[instrument(skip_all, fields(event_type = %event.event_type, base_branch = %event.base_branch))]
    pub async fn match_templates(
        &self,
        templates: &[PipelineRun],
        event: &mut Event,
    ) -> Result<MatchOutcome, MatchError> {
        info!(
            url = %event.url,
            target_branch = %event.base_branch,
            source_branch = %event.head_branch,
            target_event = %event.trigger_target,
            "Matching templates to event"
        );

        let mut outcome = MatchOutcome::default();
        for template in templates {
            let name = template.template_name();
            match self.evaluate(template, event).await {
                Ok(Decision::Matched { repo, config }) => {
                    info!(template = %name, config = ?config, "Template matched");
                    outcome.matches.push(Match {
                        pipeline_run: template.clone(),
                        repo: repo.unwrap_or_else(|| self.repo.clone()),
                        config,
                    });
                }
                Ok(Decision::Skipped(reason)) => {
                    debug!(template = %name, reason = %reason, "Template skipped");
                }
                Err(e) if e.is_template_error() => {
                    warn!(template = %name, error = %e, "Template dropped");
                    outcome.validation_errors.push(ValidationError::new(&name, &e));
                }
                Err(e) => return Err(e),
            }
        }

        if outcome.matches.is_empty() {
            warn!(
                event_type = %event.event_type,
                branch = %event.base_branch,
                "No template matched the event"
            );
        }
        Ok(outcome)
    }

    async fn evaluate(
        &self,
        template: &PipelineRun,
        event: &mut Event,
    ) -> Result<Decision, MatchError> {
        let name = template.template_name();
        let annotations = &template.metadata.annotations;
        let mut config = BTreeMap::new();

        if !event.target_pipeline_run.is_empty() {
            if event.target_pipeline_run.trim_end_matches('-') == name {
                config.insert("target-pipelinerun".to_string(), name);
                return Ok(Decision::Matched { repo: None, config });
            }
            return Ok(Decision::Skipped(format!(
                "only {} was requested",
                event.target_pipeline_run
            )));
        }

        if annotations.is_empty() {
            return Ok(Decision::Skipped("template has no annotations".to_string()));
        }

        if let Some(max) = annotations.get(keys::MAX_KEEP_RUNS) {
            config.insert("max-keep-runs".to_string(), max.clone());
        }

        let mut repo = None;
        if let Some(namespace) = annotations.get(keys::TARGET_NAMESPACE) {
            config.insert("target-namespace".to_string(), namespace.clone());
            match self.repository_in_namespace(namespace, &event.url).await? {
                Some(found) => repo = Some(found),
                None => {
                    warn!(
                        template = %name,
                        namespace = %namespace,
                        "No Repository for this URL in the target namespace"
                    );
                    return Ok(Decision::Skipped(format!(
                        "no Repository in target namespace {}",
                        namespace
                    )));
                }
            }
        }

        let is_plain_comment = event.event_type == event_types::NO_OPS_COMMENT
            || event.event_type == event_types::ON_COMMENT;
        if let Some(pattern) = annotations.get(keys::ON_COMMENT) {
            if is_plain_comment && annotations::comment_matches(pattern, &event.trigger_comment)? {
                event.event_type = event_types::ON_COMMENT.to_string();
                config.insert("comment".to_string(), pattern.clone());
                return Ok(Decision::Matched { repo, config });
            }
        }
        if is_plain_comment {
            return Ok(Decision::Skipped(
                "comment does not match on-comment".to_string(),
            ));
        }

        if event.trigger_target == TriggerType::PullRequestLabeled
            && !annotations.contains_key(keys::ON_LABEL)
        {
            return Ok(Decision::Skipped(
                "label event and no on-label annotation".to_string(),
            ));
        }

        if let Some(expression) = annotations.get(keys::ON_CEL_EXPRESSION) {
            let ignored: Vec<&str> = [keys::ON_EVENT, keys::ON_TARGET_BRANCH]
                .into_iter()
                .filter(|key| annotations.contains_key(*key))
                .collect();
            if !ignored.is_empty() {
                warn!(
                    template = %name,
                    ignored = ?ignored,
                    "on-cel-expression takes precedence, ignoring on-event and on-target-branch"
                );
                config.insert("ignored".to_string(), ignored.join(","));
            }
            if !self.cel_matches(expression, event).await? {
                return Ok(Decision::Skipped("CEL expression is false".to_string()));
            }
            config.insert("cel".to_string(), expression.clone());
            return Ok(Decision::Matched { repo, config });
        }

        match self.pair_matches(template, event, &mut config).await? {
            None => Ok(Decision::Matched { repo, config }),
            Some(reason) => Ok(Decision::Skipped(reason)),
        }
    }

    /// `on-event` plus `on-target-branch` and the optional filters.
    /// Returns the reason for skipping, `None` on a match.
    async fn pair_matches(
        &self,
        template: &PipelineRun,
        event: &Event,
        config: &mut BTreeMap<String, String>,
    ) -> Result<Option<String>, MatchError> {
        let annotations = &template.metadata.annotations;
        let (Some(on_event), Some(on_branch)) = (
            annotations.get(keys::ON_EVENT),
            annotations.get(keys::ON_TARGET_BRANCH),
        ) else {
            info!(
                template = %template.template_name(),
                "Skipping template, on-event or on-target-branch is not set"
            );
            return Ok(Some(
                "on-event or on-target-branch is not set".to_string(),
            ));
        };

        let events = annotation_values(keys::ON_EVENT, on_event)?;
        let is_incoming = event.event_type == event_types::INCOMING;
        if !annotations::event_matches(&events, on_event_trigger(event), is_incoming) {
            return Ok(Some(format!("event {} not in on-event", event.trigger_target)));
        }
        let branches = annotation_values(keys::ON_TARGET_BRANCH, on_branch)?;
        if !annotations::branch_matches(&branches, &event.base_branch) {
            return Ok(Some(format!(
                "branch {} not in on-target-branch",
                event.base_branch
            )));
        }
        config.insert("target-event".to_string(), on_event.clone());
        config.insert("target-branch".to_string(), on_branch.clone());

        if let Some(on_label) = annotations.get(keys::ON_LABEL) {
            if event.trigger_target.is_pull_request() {
                let labels = annotation_values(keys::ON_LABEL, on_label)?;
                if !annotations::label_matches(&labels, &event.pull_request_labels) {
                    return Ok(Some("no pull request label matches on-label".to_string()));
                }
                config.insert("label".to_string(), on_label.clone());
            }
        }

        let changes = annotations
            .get(keys::ON_PATH_CHANGE)
            .map(|v| annotation_values(keys::ON_PATH_CHANGE, v))
            .transpose()?
            .unwrap_or_default();
        let ignores = annotations
            .get(keys::ON_PATH_CHANGE_IGNORE)
            .map(|v| annotation_values(keys::ON_PATH_CHANGE_IGNORE, v))
            .transpose()?
            .unwrap_or_default();
        if !changes.is_empty() || !ignores.is_empty() {
            let files = self.changed_files(event).await?;
            if !annotations::paths_match(&changes, &ignores, files) {
                return Ok(Some("no changed file matches the path filters".to_string()));
            }
            config.insert("path-change".to_string(), changes.join(","));
        }

        Ok(None)
    }

    async fn cel_matches(&self, expression: &str, event: &Event) -> Result<bool, MatchError> {
        let mut activation = Activation::for_event(event, &ChangedFiles::default());
        let program = Program::compile(expression, &activation.names())?;
        let expr = program.ast();

        if reads_changed_files(expr) {
            let files = self.changed_files(event).await?;
            activation.insert("files", files);
        }
        if let Some(branch) = compared_branch(expr, "target_branch", &event.base_branch) {
            activation.insert("target_branch", branch);
        }
        if let Some(branch) = compared_branch(expr, "source_branch", &event.head_branch) {
            activation.insert("source_branch", branch);
        }
        Ok(program.evaluate_bool(&activation)?)
    }

    async fn repository_in_namespace(
        &self,
        namespace: &str,
        url: &str,
    ) -> Result<Option<Repository>, MatchError> {
        let mut repos = self.kube.list_repositories(Some(namespace)).await?;
        repos.sort_by_key(|r| r.metadata.creation_timestamp);
        Ok(repos.into_iter().find(|r| r.matches_url(url)))
    }
}

/// Trigger name compared with `on-event`. Comment commands act on the
/// pull request they were posted on.
fn on_event_trigger(event: &Event) -> &'static str {
    match event.trigger_target {
        TriggerType::Retest
        | TriggerType::OkToTest
        | TriggerType::Cancel
        | TriggerType::Comment
        | TriggerType::PullRequestLabeled => TriggerType::PullRequest.as_str(),
        other => other.as_str(),
    }
}

/// Changed files are listed only for expressions reading `files` or
/// calling `pathChanged`.
fn reads_changed_files(expr: &Expr) -> bool {
    expr.references_identifier("files") || expr.references_function("pathChanged")
}

/// `target_branch == "main"` compares against a fully qualified base
/// branch such as `refs/heads/main`. When a literal compared with the
/// variable `name` matches the event's branch, that literal is bound in
/// its place.
fn compared_branch(expr: &Expr, name: &str, actual: &str) -> Option<String> {
    expr.literals_compared_to(name)
        .into_iter()
        .find(|literal| !literal.is_empty() && glob::branch_match(literal, actual))
}

/// One line per template listing its `on-*` annotations, for the log
/// written when nothing matched.
pub fn describe_templates(templates: &[PipelineRun]) -> String {
    const MATCHING: &[&str] = &[
        keys::ON_EVENT,
        keys::ON_TARGET_BRANCH,
        keys::ON_CEL_EXPRESSION,
        keys::ON_COMMENT,
        keys::ON_LABEL,
        keys::ON_PATH_CHANGE,
        keys::ON_PATH_CHANGE_IGNORE,
    ];

    templates
        .iter()
        .map(|t| {
            let found: Vec<String> = MATCHING
                .iter()
                .filter_map(|key| {
                    let value = t.metadata.annotations.get(*key)?;
                    let short = key.rsplit('/').next().unwrap_or(key);
                    Some(format!("{}={}", short, value))
                })
                .collect();
            if found.is_empty() {
                format!("{}: no matching annotations", t.template_name())
            } else {
                format!("{}: {}", t.template_name(), found.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
