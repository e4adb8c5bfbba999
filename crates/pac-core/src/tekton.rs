//! # Tekton Resources
//!
//! Typed views over the Tekton objects found in `.tekton/` directories and
//! submitted to the cluster.
//!
//! The controller reads and rewrites a small part of each object: names,
//! labels, annotations, task and pipeline references, `spec.status` and the
//! `Succeeded` condition. Every other field is kept in flattened maps so a
//! template round-trips through parsing and serialisation unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::keys;
use crate::resources::{succeeded_condition, Condition, ObjectMeta};

/// API version submitted to the cluster.
pub const TEKTON_API_V1: &str = "tekton.dev/v1";

/// Legacy API version accepted from templates and remote tasks.
pub const TEKTON_API_V1BETA1: &str = "tekton.dev/v1beta1";

/// `spec.status` values understood by Tekton.
pub mod spec_status {
    pub const PENDING: &str = "PipelineRunPending";
    pub const CANCELLED: &str = "Cancelled";
    pub const CANCELLED_RUN_FINALLY: &str = "CancelledRunFinally";
    pub const STOPPED_RUN_FINALLY: &str = "StoppedRunFinally";
}

// ============================================================================
// References
// ============================================================================

/// Reference from a pipeline task to a Task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bundle: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resolver: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskRef {
    /// True when the reference must be inlined from the resolved task set
    /// rather than handed to a Tekton resolver, bundle or cluster task.
    pub fn is_inlinable(&self) -> bool {
        self.bundle.is_empty()
            && self.resolver.is_empty()
            && (self.api_version.is_empty() || self.api_version.starts_with("tekton.dev/"))
            && self.kind != "ClusterTask"
            && (self.kind.is_empty() || self.kind == "Task")
    }
}

/// Reference from a PipelineRun to a Pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRef {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bundle: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resolver: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry of `tasks` or `finally` in a pipeline spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineTask {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_ref: Option<TaskRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_spec: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of a Pipeline, or the inline `pipelineSpec` of a PipelineRun.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<PipelineTask>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finally: Vec<PipelineTask>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// Objects
// ============================================================================

/// A Tekton Task. The spec is opaque to the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Value,
}

/// A Tekton Pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PipelineSpec,
}

/// Specification of a PipelineRun.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_ref: Option<PipelineRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_spec: Option<PipelineSpec>,

    /// Tekton run control: pending, cancelled, stopped.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Observed state of a PipelineRun.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A Tekton PipelineRun.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PipelineRunSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PipelineRunStatus>,
}

impl PipelineRun {
    /// The `Succeeded` condition, when Tekton has reported one.
    pub fn succeeded_condition(&self) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| succeeded_condition(&s.conditions))
    }

    /// True once the run reached a terminal condition.
    pub fn is_done(&self) -> bool {
        self.succeeded_condition()
            .map(|c| !c.is_unknown())
            .unwrap_or(false)
    }

    /// True when the run finished successfully.
    pub fn is_successful(&self) -> bool {
        self.succeeded_condition()
            .map(Condition::is_true)
            .unwrap_or(false)
    }

    /// True when cancellation was requested or reported.
    pub fn is_cancelled(&self) -> bool {
        self.spec.status == spec_status::CANCELLED
            || self
                .succeeded_condition()
                .map(|c| c.reason == "Cancelled" || c.reason == "PipelineRunCancelled")
                .unwrap_or(false)
    }

    /// True when a graceful cancel or stop was requested.
    pub fn is_gracefully_stopped(&self) -> bool {
        self.spec.status == spec_status::CANCELLED_RUN_FINALLY
            || self.spec.status == spec_status::STOPPED_RUN_FINALLY
    }

    /// True while the run waits for the scheduler.
    pub fn is_pending(&self) -> bool {
        self.spec.status == spec_status::PENDING
    }

    /// Template name recorded at resolution time.
    pub fn original_prname(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get(keys::ORIGINAL_PRNAME)
            .or_else(|| self.metadata.labels.get(keys::ORIGINAL_PRNAME))
            .map(String::as_str)
    }

    /// Name of the template: `metadata.name`, or `generateName` with the
    /// trailing dash removed.
    pub fn template_name(&self) -> String {
        if !self.metadata.name.is_empty() {
            return self.metadata.name.clone();
        }
        self.metadata
            .generate_name
            .trim_end_matches('-')
            .to_string()
    }

    /// Value of an annotation, when present.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }
}

/// A Tekton TaskRun, used to build the task status table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRun {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskRunStatus>,
}

/// Observed state of a TaskRun.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pod_name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepState>,
}

/// Per-step state of a TaskRun.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub container: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated: Option<Value>,
}

impl TaskRun {
    /// The `tekton.dev/pipelineTask` label, falling back to the object name.
    pub fn pipeline_task_name(&self) -> &str {
        self.metadata
            .labels
            .get(keys::TEKTON_PIPELINE_TASK)
            .map(String::as_str)
            .unwrap_or(&self.metadata.name)
    }

    pub fn succeeded_condition(&self) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| succeeded_condition(&s.conditions))
    }
}

// ============================================================================
// API Version Conversion
// ============================================================================

/// Converts a `tekton.dev/v1beta1` document into its `tekton.dev/v1` shape.
///
/// Handles the field moves relevant to the objects the controller submits:
/// `serviceAccountName` and `timeout` on PipelineRuns, bundle references on
/// task and pipeline refs.
pub fn convert_v1beta1(mut doc: Value) -> Value {
    if doc.get("apiVersion").and_then(Value::as_str) != Some(TEKTON_API_V1BETA1) {
        return doc;
    }
    let kind = doc
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if let Some(obj) = doc.as_object_mut() {
        obj.insert(
            "apiVersion".to_string(),
            Value::String(TEKTON_API_V1.to_string()),
        );
        if let Some(spec) = obj.get_mut("spec") {
            match kind.as_str() {
                "PipelineRun" => convert_pipeline_run_spec(spec),
                "Pipeline" => {
                    convert_pipeline_tasks(spec);
                }
                _ => {}
            }
        }
    }
    doc
}

fn convert_pipeline_run_spec(spec_value: &mut Value) {
    let Some(spec) = spec_value.as_object_mut() else {
        return;
    };
    if let Some(sa) = spec.remove("serviceAccountName") {
        let template = spec
            .entry("taskRunTemplate")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(t) = template.as_object_mut() {
            t.insert("serviceAccountName".to_string(), sa);
        }
    }
    if let Some(timeout) = spec.remove("timeout") {
        let timeouts = spec
            .entry("timeouts")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(t) = timeouts.as_object_mut() {
            t.insert("pipeline".to_string(), timeout);
        }
    }
    if let Some(pref) = spec.get_mut("pipelineRef") {
        convert_bundle_ref(pref, "pipeline");
    }
    if let Some(pspec) = spec.get_mut("pipelineSpec") {
        convert_pipeline_tasks(pspec);
    }
}

fn convert_pipeline_tasks(spec: &mut Value) -> Option<()> {
    let obj = spec.as_object_mut()?;
    for section in ["tasks", "finally"] {
        if let Some(tasks) = obj.get_mut(section).and_then(Value::as_array_mut) {
            for task in tasks {
                if let Some(tref) = task.get_mut("taskRef") {
                    convert_bundle_ref(tref, "task");
                }
            }
        }
    }
    Some(())
}

fn convert_bundle_ref(reference: &mut Value, kind: &str) {
    let Some(obj) = reference.as_object_mut() else {
        return;
    };
    let Some(bundle) = obj.remove("bundle") else {
        return;
    };
    let name = obj.remove("name").unwrap_or(Value::Null);
    obj.insert("resolver".to_string(), Value::String("bundles".to_string()));
    obj.insert(
        "params".to_string(),
        serde_json::json!([
            {"name": "bundle", "value": bundle},
            {"name": "name", "value": name},
            {"name": "kind", "value": kind},
        ]),
    );
}

#[cfg(test)]
#[path = "tekton_tests.rs"]
mod tests;
