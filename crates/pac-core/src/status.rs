//! # Status Reporting
//!
//! Text rendered for the VCS (task tables, validation error comments) and
//! the bounded run history kept on the Repository.

use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

use crate::formatting::{format_span, strip_heads_prefix};
use crate::keys;
use crate::kube::{KubeClient, KubeError, MAX_CONFLICT_RETRIES};
use crate::provider::{CommitStatus, RunStatus, StatusOptions, TaskTableFormat};
use crate::repository::{
    push_run_status, Repository, RepositoryRunStatus, TaskInfo, MAX_RUN_STATUS,
};
use crate::resources::Condition;
use crate::settings::Settings;
use crate::tekton::{PipelineRun, TaskRun};

/// Opening lines of the validation error comment. Later reports replace
/// comments starting with this text.
pub const VALIDATION_ERROR_HEADER: &str =
    "> [!CAUTION]\n> There are some errors in your PipelineRun template.";

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("kubernetes error: {0}")]
    Kube(#[from] KubeError),

    #[error("cannot update status of repository {repository} after {attempts} attempts")]
    ConflictRetriesExhausted { repository: String, attempts: usize },
}

impl StatusError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Kube(e) => e.is_transient(),
            Self::ConflictRetriesExhausted { .. } => true,
        }
    }

    pub fn error_category(&self) -> crate::ErrorCategory {
        match self {
            Self::Kube(e) => e.error_category(),
            Self::ConflictRetriesExhausted { .. } => crate::ErrorCategory::Transient,
        }
    }
}

// ============================================================================
// Validation Errors
// ============================================================================

/// A template rejected before submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// File or template name.
    pub name: String,
    pub error: String,

    /// Kind of document the error was found in, when known.
    pub schema: String,
}

impl ValidationError {
    pub fn new(name: &str, error: &dyn fmt::Display) -> Self {
        Self {
            name: name.to_string(),
            error: error.to_string(),
            schema: String::new(),
        }
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }
}

/// Escape table delimiters and flatten newlines so an error stays in one
/// markdown table cell.
pub fn sanitize_markdown(text: &str) -> String {
    text.replace('|', "\\|").replace(['\n', '\r'], " ")
}

/// Body of the pull request comment listing validation errors, `None`
/// when there is nothing to report.
pub fn validation_comment(errors: &[ValidationError]) -> Option<String> {
    if errors.is_empty() {
        return None;
    }
    let rows: Vec<String> = errors
        .iter()
        .map(|e| format!("| {} | `{}` |", e.name, sanitize_markdown(&e.error)))
        .collect();
    Some(format!(
        "{}\n\n| PipelineRun | Error |\n|------|-------|\n{}",
        VALIDATION_ERROR_HEADER,
        rows.join("\n")
    ))
}

// ============================================================================
// Task Table
// ============================================================================

/// Human word for a `Succeeded` condition.
pub fn condition_word(conditions: &[Condition]) -> &'static str {
    let Some(condition) = crate::resources::succeeded_condition(conditions) else {
        return "Pending";
    };
    if condition.is_true() {
        "Succeeded"
    } else if condition.is_false() {
        if condition.reason.contains("Cancelled") {
            "Cancelled"
        } else {
            "Failed"
        }
    } else if condition.reason == "Pending" || condition.reason == "PipelineRunPending" {
        "Pending"
    } else {
        "Running"
    }
}

/// Conclusion reported for a finished PipelineRun.
pub fn conclusion(pr: &PipelineRun) -> CommitStatus {
    if pr.is_successful() {
        CommitStatus::Success
    } else if pr.is_cancelled() {
        CommitStatus::Cancelled
    } else if pr.is_done() {
        CommitStatus::Failure
    } else {
        CommitStatus::Pending
    }
}

/// Task table of a PipelineRun, rows ordered by task start time.
pub fn task_status_table(
    task_runs: &[TaskRun],
    format: TaskTableFormat,
    settings: &Settings,
    pipeline_run: &PipelineRun,
) -> String {
    let mut runs: Vec<&TaskRun> = task_runs.iter().collect();
    runs.sort_by_key(|tr| tr.status.as_ref().and_then(|s| s.start_time));

    let console = settings.console_url(&pipeline_run.metadata.namespace, &pipeline_run.metadata.name);
    let rows = runs.into_iter().map(|tr| {
        let (word, duration) = match &tr.status {
            Some(s) => (
                condition_word(&s.conditions),
                format_span(s.start_time, s.completion_time),
            ),
            None => ("Pending", format_span(None, None)),
        };
        let name = tr.pipeline_task_name();
        let name = if console.is_empty() {
            name.to_string()
        } else {
            match format {
                TaskTableFormat::Markdown => format!("[{}]({})", name, console),
                TaskTableFormat::Html => format!("<a href=\"{}\">{}</a>", console, name),
            }
        };
        (word, duration, name)
    });

    match format {
        TaskTableFormat::Markdown => {
            let mut out = String::from("Status | Duration | Name\n--- | --- | ---\n");
            for (word, duration, name) in rows {
                out.push_str(&format!("{} | {} | {}\n", word, duration, name));
            }
            out
        }
        TaskTableFormat::Html => {
            let mut out =
                String::from("<table>\n  <tr><th>Status</th><th>Duration</th><th>Name</th></tr>\n");
            for (word, duration, name) in rows {
                out.push_str(&format!(
                    "<tr>\n<td>{}</td>\n<td>{}</td><td>\n\n{}\n\n</td></tr>\n",
                    word, duration, name
                ));
            }
            out.push_str("</table>");
            out
        }
    }
}

// ============================================================================
// Run Status
// ============================================================================

/// Status posted right after a run was submitted: `queued` for pending
/// runs, `in_progress` otherwise.
pub fn submitted_status(pr: &PipelineRun, settings: &Settings) -> StatusOptions {
    let namespace = &pr.metadata.namespace;
    let name = &pr.metadata.name;
    let details_url = settings.console_url(namespace, name);

    let (status, title, text) = if pr.is_pending() {
        (
            RunStatus::Queued,
            "Queued".to_string(),
            format!(
                "PipelineRun <b>{}</b> has been queued in namespace <b>{}</b>",
                name, namespace
            ),
        )
    } else {
        let mut text = format!(
            "Starting PipelineRun <b>{}</b> in namespace <b>{}</b>",
            name, namespace
        );
        if !details_url.is_empty() {
            text.push_str(&format!(
                "<br><br>You can follow the execution on the [{}]({}) PipelineRun viewer",
                settings.console_name(),
                details_url
            ));
        }
        (RunStatus::InProgress, "CI has Started".to_string(), text)
    };

    StatusOptions {
        status,
        conclusion: CommitStatus::Pending,
        title,
        summary: format!("{} is running", settings.application_name),
        text,
        details_url,
        pipeline_run_name: name.clone(),
        original_pipeline_run_name: pr.original_prname().unwrap_or_default().to_string(),
        tasks: Vec::new(),
        application_name: settings.application_name.clone(),
    }
}

/// Title of the final status.
pub fn conclusion_title(conclusion: CommitStatus) -> &'static str {
    match conclusion {
        CommitStatus::Success => "Success",
        CommitStatus::Failure => "Failed",
        CommitStatus::Cancelled => "Cancelled",
        CommitStatus::Skipped => "Skipped",
        CommitStatus::Neutral => "Neutral",
        CommitStatus::Pending => "Pending",
    }
}

/// Failed tasks of a run keyed by TaskRun name. With `error_log_snippet`
/// on, the tail of the first failed step's container log is attached.
pub async fn failed_tasks(
    kube: &dyn KubeClient,
    task_runs: &[TaskRun],
    settings: &Settings,
) -> BTreeMap<String, TaskInfo> {
    let mut failures = BTreeMap::new();
    for tr in task_runs {
        let Some(condition) = tr.succeeded_condition() else {
            continue;
        };
        if !condition.is_false() {
            continue;
        }
        let status = tr.status.clone().unwrap_or_default();
        let mut info = TaskInfo {
            name: tr.pipeline_task_name().to_string(),
            message: condition.message.clone(),
            log_snippet: String::new(),
            reason: condition.reason.clone(),
            completion_time: status.completion_time,
        };

        if settings.error_log_snippet && !status.pod_name.is_empty() {
            let failed_step = status.steps.iter().find(|step| {
                step.terminated
                    .as_ref()
                    .and_then(|t| t.get("exitCode"))
                    .and_then(|c| c.as_i64())
                    .is_some_and(|code| code != 0)
            });
            if let Some(step) = failed_step {
                match kube
                    .get_pod_logs(
                        &tr.metadata.namespace,
                        &status.pod_name,
                        &step.container,
                        Some(settings.error_detection_max_lines),
                    )
                    .await
                {
                    Ok(log) => info.log_snippet = log,
                    Err(e) => debug!(
                        pod = %status.pod_name,
                        container = %step.container,
                        error = %e,
                        "Cannot read failed step log"
                    ),
                }
            }
        }
        failures.insert(tr.metadata.name.clone(), info);
    }
    failures
}

// ============================================================================
// Run History
// ============================================================================

/// History entry for a finished PipelineRun, from the annotations stamped
/// at creation.
pub fn run_status_entry(pr: &PipelineRun, settings: &Settings) -> RepositoryRunStatus {
    let annotation = |key: &str| pr.annotation(key).unwrap_or_default().to_string();
    let status = pr.status.clone().unwrap_or_default();
    RepositoryRunStatus {
        conditions: status.conditions,
        pipeline_run_name: pr.metadata.name.clone(),
        start_time: status.start_time,
        completion_time: status.completion_time,
        sha: annotation(keys::SHA),
        sha_url: annotation(keys::SHA_URL),
        title: annotation(keys::SHA_TITLE),
        log_url: settings.console_url(&pr.metadata.namespace, &pr.metadata.name),
        target_branch: strip_heads_prefix(&annotation(keys::BRANCH)).to_string(),
        event_type: annotation(keys::EVENT_TYPE),
        failure_reason: Default::default(),
    }
}

/// Append `entry` to the Repository history, keeping the newest
/// [`MAX_RUN_STATUS`] entries. An earlier entry for the same PipelineRun is
/// replaced. Conflicting writers are retried on a fresh read.
pub async fn record_run_status(
    kube: &dyn KubeClient,
    namespace: &str,
    name: &str,
    entry: RepositoryRunStatus,
) -> Result<Repository, StatusError> {
    for attempt in 1..=MAX_CONFLICT_RETRIES {
        let mut repo = kube.get_repository(namespace, name).await?;
        repo.status
            .retain(|s| s.pipeline_run_name != entry.pipeline_run_name);
        push_run_status(&mut repo.status, entry.clone(), MAX_RUN_STATUS);

        match kube.update_repository(&repo).await {
            Ok(updated) => {
                info!(
                    repository = %name,
                    pipelinerun = %entry.pipeline_run_name,
                    "Repository status updated"
                );
                return Ok(updated);
            }
            Err(e) if e.is_conflict() => {
                debug!(
                    repository = %name,
                    attempt,
                    max_attempts = MAX_CONFLICT_RETRIES,
                    "Repository changed while updating status, retrying"
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    warn!(repository = %name, "Giving up updating repository status");
    Err(StatusError::ConflictRetriesExhausted {
        repository: name.to_string(),
        attempts: MAX_CONFLICT_RETRIES,
    })
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
