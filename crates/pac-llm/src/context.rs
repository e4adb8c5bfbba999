//! # Analysis Context
//!
//! Builds what an analysis role sees: the CEL variables its `on_cel`
//! filter runs against, and the context sections sent with its prompt.
//!
//! Context sections:
//!
//! | Key | Included when | Content |
//! |-----|---------------|---------|
//! | `pipeline` | always | run name, namespace, condition, timing, event refs |
//! | `commit` | `commit_content` | sha, title, url, author and committer |
//! | `pull_request` | `pr_content` and the event has a PR | number, title, branches |
//! | `errors` | `error_content` and the run failed | condition and failed tasks |
//! | `logs` | `container_logs.enabled` | log tails of failed steps |

use pac_core::cel::{Activation, Value as CelValue};
use pac_core::event::Event;
use pac_core::kube::KubeClient;
use pac_core::provider::Provider;
use pac_core::repository::{ContextItems, Repository};
use pac_core::settings::Settings;
use pac_core::status;
use pac_core::tekton::{PipelineRun, TaskRun};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// Log lines per failed task when a role does not say.
pub const DEFAULT_MAX_LOG_LINES: usize = 50;

/// Log lines attached to failed tasks in the `errors` section.
const ERROR_SNIPPET_LINES: usize = 3;

/// Variables for a role's `on_cel` filter.
///
/// `body` holds `pipelineRun` and `repository` as their serialized
/// resources plus `event` with the event fields; `pac` is empty.
pub fn cel_activation(pr: &PipelineRun, event: &Event, repo: &Repository) -> Activation {
    let mut body = Map::new();
    body.insert(
        "pipelineRun".to_string(),
        serde_json::to_value(pr).unwrap_or(Value::Null),
    );
    body.insert(
        "repository".to_string(),
        serde_json::to_value(repo).unwrap_or(Value::Null),
    );
    body.insert("event".to_string(), event_map(event));

    Activation::new()
        .with("body", CelValue::from(Value::Object(body)))
        .with("pac", &BTreeMap::<String, String>::new())
}

fn event_map(event: &Event) -> Value {
    let mut map = json!({
        "event_type": event.event_type,
        "trigger_target": event.trigger_target.as_str(),
        "sha": event.sha,
        "sha_title": event.sha_title,
        "base_branch": event.base_branch,
        "head_branch": event.head_branch,
        "default_branch": event.default_branch,
        "organization": event.organization,
        "repository": event.repository,
        "url": event.url,
        "sha_url": event.sha_url,
        "head_url": event.head_url,
        "sender": event.sender,
        "target_pipelinerun": event.target_pipeline_run,
    });
    if let (Some(number), Some(obj)) = (event.pull_request_number, map.as_object_mut()) {
        obj.insert("pull_request_number".to_string(), json!(number));
        obj.insert(
            "pull_request_title".to_string(),
            json!(event.pull_request_title),
        );
        obj.insert(
            "pull_request_labels".to_string(),
            json!(event.pull_request_labels),
        );
    }
    if let (false, Some(obj)) = (event.trigger_comment.is_empty(), map.as_object_mut()) {
        obj.insert("trigger_comment".to_string(), json!(event.trigger_comment));
    }
    map
}

/// Cache key of a context configuration; roles sharing one reuse the
/// assembled context.
pub fn cache_key(items: Option<&ContextItems>) -> String {
    let Some(items) = items else {
        return "default".to_string();
    };
    let (logs, max_lines) = match &items.container_logs {
        Some(logs) => (logs.enabled, logs.max_lines),
        None => (false, 0),
    };
    format!(
        "commit:{}-pr:{}-error:{}-logs:{}-{}",
        items.commit_content, items.pr_content, items.error_content, logs, max_lines
    )
}

/// Assembles context sections for a finished run.
pub struct ContextAssembler<'a> {
    kube: &'a dyn KubeClient,
    provider: &'a dyn Provider,
    task_runs: &'a [TaskRun],
}

impl<'a> ContextAssembler<'a> {
    pub fn new(
        kube: &'a dyn KubeClient,
        provider: &'a dyn Provider,
        task_runs: &'a [TaskRun],
    ) -> Self {
        Self {
            kube,
            provider,
            task_runs,
        }
    }

    /// Sections selected by `items`. Without `items` only `pipeline` is
    /// sent. Sections whose data cannot be gathered are left out.
    pub async fn build(
        &self,
        pr: &PipelineRun,
        event: &Event,
        items: Option<&ContextItems>,
    ) -> BTreeMap<String, Value> {
        let mut context = BTreeMap::new();
        context.insert("pipeline".to_string(), pipeline_section(pr, event));

        let Some(items) = items else {
            return context;
        };

        if items.commit_content {
            context.insert("commit".to_string(), self.commit_section(event).await);
        }

        if items.pr_content {
            match pull_request_section(event) {
                Some(section) => {
                    context.insert("pull_request".to_string(), section);
                }
                None => warn!("No pull request information available for analysis context"),
            }
        }

        if items.error_content {
            if let Some(section) = self.error_section(pr).await {
                context.insert("errors".to_string(), section);
            }
        }

        if let Some(logs) = items.container_logs.as_ref().filter(|l| l.enabled) {
            let max_lines = if logs.max_lines == 0 {
                DEFAULT_MAX_LOG_LINES
            } else {
                logs.max_lines
            };
            if let Some(section) = self.logs_section(max_lines).await {
                context.insert("logs".to_string(), section);
            }
        }

        context
    }

    async fn commit_section(&self, event: &Event) -> Value {
        // Enrich a copy; the event itself is shared with the reconciler.
        let mut enriched = event.clone();
        if let Err(e) = self.provider.get_commit_info(&mut enriched).await {
            warn!(
                error = %e,
                "Cannot retrieve commit details, analysis continues with event data"
            );
        }

        let mut commit = Map::new();
        commit.insert("sha".to_string(), json!(enriched.sha));
        commit.insert("message".to_string(), json!(enriched.sha_title));
        if !enriched.sha_url.is_empty() {
            commit.insert("url".to_string(), json!(enriched.sha_url));
        }

        let mut author = Map::new();
        if !enriched.sha_author_name.is_empty() {
            author.insert("name".to_string(), json!(enriched.sha_author_name));
        }
        if !enriched.sha_author_date.is_empty() {
            author.insert("date".to_string(), json!(enriched.sha_author_date));
        }
        if !author.is_empty() {
            commit.insert("author".to_string(), Value::Object(author));
        }
        if !enriched.sha_committer_name.is_empty() {
            commit.insert(
                "committer".to_string(),
                json!({"name": enriched.sha_committer_name}),
            );
        }
        Value::Object(commit)
    }

    async fn error_section(&self, pr: &PipelineRun) -> Option<Value> {
        let condition = pr.succeeded_condition()?;
        if !condition.is_false() {
            return None;
        }

        let mut errors = Map::new();
        errors.insert("condition_reason".to_string(), json!(condition.reason));
        errors.insert("condition_message".to_string(), json!(condition.message));

        let failed = self.failed_tasks(ERROR_SNIPPET_LINES).await;
        if !failed.is_empty() {
            let tasks: Vec<Value> = failed
                .values()
                .map(|task| {
                    let mut entry = json!({
                        "name": task.name,
                        "reason": task.reason,
                        "message": task.message,
                        "log_snippet": task.log_snippet,
                    });
                    if let (Some(time), Some(obj)) = (task.completion_time, entry.as_object_mut())
                    {
                        obj.insert("completion_time".to_string(), json!(time.to_rfc3339()));
                    }
                    entry
                })
                .collect();
            errors.insert("failed_tasks".to_string(), Value::Array(tasks));
        }
        Some(Value::Object(errors))
    }

    async fn logs_section(&self, max_lines: usize) -> Option<Value> {
        let failed = self.failed_tasks(max_lines).await;
        if failed.is_empty() {
            return None;
        }
        let logs: Vec<Value> = failed
            .values()
            .map(|task| {
                json!({
                    "task_name": task.name,
                    "log_lines": task.log_snippet.lines().collect::<Vec<_>>(),
                })
            })
            .collect();
        Some(json!({
            "failed_tasks_logs": logs,
            "max_lines": max_lines,
        }))
    }

    async fn failed_tasks(
        &self,
        max_lines: usize,
    ) -> BTreeMap<String, pac_core::repository::TaskInfo> {
        let settings = Settings {
            error_log_snippet: true,
            error_detection_max_lines: max_lines,
            ..Settings::default()
        };
        status::failed_tasks(self.kube, self.task_runs, &settings).await
    }
}

fn pipeline_section(pr: &PipelineRun, event: &Event) -> Value {
    let mut pipeline = Map::new();
    pipeline.insert("name".to_string(), json!(pr.metadata.name));
    pipeline.insert("namespace".to_string(), json!(pr.metadata.namespace));
    match pr.succeeded_condition() {
        Some(condition) => {
            pipeline.insert("status".to_string(), json!(condition.status));
            pipeline.insert("reason".to_string(), json!(condition.reason));
            pipeline.insert("message".to_string(), json!(condition.message));
        }
        None => {
            pipeline.insert("status".to_string(), json!("unknown"));
        }
    }
    if let Some(status) = &pr.status {
        if let Some(start) = status.start_time {
            pipeline.insert("start_time".to_string(), json!(start.to_rfc3339()));
        }
        if let Some(end) = status.completion_time {
            pipeline.insert("completion_time".to_string(), json!(end.to_rfc3339()));
        }
    }
    pipeline.insert("event_type".to_string(), json!(event.event_type));
    pipeline.insert("sha".to_string(), json!(event.sha));
    pipeline.insert("base_branch".to_string(), json!(event.base_branch));
    pipeline.insert("head_branch".to_string(), json!(event.head_branch));
    Value::Object(pipeline)
}

fn pull_request_section(event: &Event) -> Option<Value> {
    let number = event.pull_request_number.filter(|n| *n > 0)?;
    Some(json!({
        "number": number,
        "title": event.pull_request_title,
        "head_branch": event.head_branch,
        "base_branch": event.base_branch,
    }))
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
