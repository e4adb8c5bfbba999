//! # Remote Resolution
//!
//! Turns the `.tekton/` documents of an event into self-contained
//! PipelineRuns: referenced Pipelines become `pipelineSpec`, referenced
//! Tasks become `taskSpec`.
//!
//! Tasks are taken from, highest precedence first:
//! 1. the PipelineRun's `task` annotations
//! 2. the `task` annotations of the Pipeline it references
//! 3. Tasks found in the `.tekton/` directory
//!
//! Pipelines come from the PipelineRun's `pipeline` annotation, then from
//! the `.tekton/` directory. Remote resources are fetched once per event.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, warn};

use crate::event::Event;
use crate::formatting::clean_label_value;
use crate::keys;
use crate::matcher::MatchError;
use crate::provider::{Provider, TektonFile};
use crate::settings::Settings;
use crate::status::ValidationError;
use crate::tekton::{convert_v1beta1, Pipeline, PipelineRun, PipelineTask, Task};

pub mod hub;
pub mod remote;

pub use hub::{HubClient, HubError};
pub use remote::{RemoteFetcher, RemoteKind};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Annotation(#[from] MatchError),

    #[error("only one pipeline is allowed on remote resolution, we have received multiple of them: {uris:?}")]
    MultiplePipelines { uris: Vec<String> },

    #[error("error getting remote resource \"{uri}\": {message}")]
    Fetch { uri: String, message: String },

    #[error("could not get remote {kind} \"{uri}\": returning empty")]
    Empty { kind: &'static str, uri: String },

    #[error("remote {kind} from uri: {uri} has not been recognized as a tekton {kind}")]
    NotTekton { kind: &'static str, uri: String },

    #[error("remote {kind} from uri: {uri} cannot be parsed: {message}")]
    Parse {
        kind: &'static str,
        uri: String,
        message: String,
    },

    #[error("cannot find referenced task {task} in pipelinerun {pipeline_run}, if it's a remote task make sure to add it in the annotations")]
    UnknownTask { task: String, pipeline_run: String },

    #[error("cannot find pipeline {pipeline} referenced by pipelinerun {pipeline_run}")]
    UnknownPipeline {
        pipeline: String,
        pipeline_run: String,
    },

    #[error("found multiple pipelineruns named {name} in the .tekton directory")]
    DuplicateTemplate { name: String },

    #[error(transparent)]
    Hub(#[from] HubError),
}

impl ResolveError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Hub(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn error_category(&self) -> crate::ErrorCategory {
        if self.is_transient() {
            crate::ErrorCategory::Transient
        } else {
            crate::ErrorCategory::Permanent
        }
    }
}

// ============================================================================
// Document Parsing
// ============================================================================

/// Tekton objects read from the `.tekton/` directory.
#[derive(Debug, Clone, Default)]
pub struct TektonTypes {
    pub pipeline_runs: Vec<PipelineRun>,
    pub pipelines: Vec<Pipeline>,
    pub tasks: Vec<Task>,

    /// Documents that could not be parsed, keyed by file path.
    pub validation_errors: Vec<ValidationError>,
}

/// Splits a YAML stream on `---` separators, dropping documents with only
/// comments or whitespace.
pub fn split_documents(content: &str) -> Vec<String> {
    let mut documents = Vec::new();
    let mut current = String::new();
    for line in content.lines() {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed.starts_with("--- ") {
            documents.push(std::mem::take(&mut current));
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    documents.push(current);

    documents
        .into_iter()
        .filter(|doc| {
            doc.lines().any(|l| {
                let l = l.trim();
                !l.is_empty() && !l.starts_with('#')
            })
        })
        .collect()
}

impl TektonTypes {
    /// Parses every document of `files`. Non-Tekton documents are skipped;
    /// broken ones are recorded as validation errors.
    pub fn parse(files: &[TektonFile]) -> Self {
        let mut types = Self::default();
        for file in files {
            for document in split_documents(&file.content) {
                types.add_document(&file.path, &document);
            }
        }
        types
    }

    fn add_document(&mut self, path: &str, document: &str) {
        let value: Value = match serde_yaml::from_str(document) {
            Ok(v) => v,
            Err(e) => {
                warn!(file = %path, error = %e, "Invalid YAML document");
                self.validation_errors.push(ValidationError::new(path, &e));
                return;
            }
        };

        let api_version = value
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if !api_version.starts_with("tekton.dev/") {
            info!(file = %path, kind = %kind, "Skipping document not looking like a tekton resource");
            return;
        }

        let value = convert_v1beta1(value);
        let invalid = |e: &serde_json::Error| ValidationError::new(path, e).with_schema(&kind);
        match kind.as_str() {
            "PipelineRun" => match serde_json::from_value::<PipelineRun>(value) {
                Ok(pr) if pr.metadata.name.is_empty() && pr.metadata.generate_name.is_empty() => {
                    self.validation_errors.push(
                        ValidationError::new(path, &"PipelineRun has no name or generateName")
                            .with_schema(&kind),
                    );
                }
                Ok(pr) => self.pipeline_runs.push(pr),
                Err(e) => self.validation_errors.push(invalid(&e)),
            },
            "Pipeline" => match serde_json::from_value::<Pipeline>(value) {
                Ok(p) if self.pipeline(&p.metadata.name).is_some() => {
                    warn!(file = %path, pipeline = %p.metadata.name, "Skipping duplicate pipeline");
                }
                Ok(p) => self.pipelines.push(p),
                Err(e) => self.validation_errors.push(invalid(&e)),
            },
            "Task" => match serde_json::from_value::<Task>(value) {
                Ok(t) if self.task(&t.metadata.name).is_some() => {
                    warn!(file = %path, task = %t.metadata.name, "Skipping duplicate task");
                }
                Ok(t) => self.tasks.push(t),
                Err(e) => self.validation_errors.push(invalid(&e)),
            },
            _ => {
                info!(file = %path, kind = %kind, "Skipping tekton document we cannot resolve");
            }
        }
    }

    pub fn pipeline(&self, name: &str) -> Option<&Pipeline> {
        self.pipelines.iter().find(|p| p.metadata.name == name)
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.metadata.name == name)
    }
}

/// Rejects two templates sharing both `name` and `generateName`.
pub fn check_unique_templates(runs: &[PipelineRun]) -> Result<(), ResolveError> {
    let mut seen = BTreeSet::new();
    for run in runs {
        let key = (
            run.metadata.name.as_str(),
            run.metadata.generate_name.as_str(),
        );
        if !seen.insert(key) {
            return Err(ResolveError::DuplicateTemplate {
                name: run.template_name(),
            });
        }
    }
    Ok(())
}

fn first_document(uri: &str, kind: RemoteKind, data: &str) -> Result<Value, ResolveError> {
    let document = split_documents(data).into_iter().next().unwrap_or_default();
    let value: Value = serde_yaml::from_str(&document).map_err(|e| ResolveError::Parse {
        kind: kind.as_str(),
        uri: uri.to_string(),
        message: e.to_string(),
    })?;
    let value = convert_v1beta1(value);

    let api_version = value.get("apiVersion").and_then(Value::as_str).unwrap_or_default();
    let found = value.get("kind").and_then(Value::as_str).unwrap_or_default();
    let expected = match kind {
        RemoteKind::Task => "Task",
        RemoteKind::Pipeline => "Pipeline",
    };
    if !api_version.starts_with("tekton.dev/") || found != expected {
        return Err(ResolveError::NotTekton {
            kind: kind.as_str(),
            uri: uri.to_string(),
        });
    }
    Ok(value)
}

/// Parses remote data as a Task.
pub fn parse_remote_task(uri: &str, data: &str) -> Result<Task, ResolveError> {
    let value = first_document(uri, RemoteKind::Task, data)?;
    serde_json::from_value(value).map_err(|e| ResolveError::Parse {
        kind: "task",
        uri: uri.to_string(),
        message: e.to_string(),
    })
}

/// Parses remote data as a Pipeline.
pub fn parse_remote_pipeline(uri: &str, data: &str) -> Result<Pipeline, ResolveError> {
    let value = first_document(uri, RemoteKind::Pipeline, data)?;
    serde_json::from_value(value).map_err(|e| ResolveError::Parse {
        kind: "pipeline",
        uri: uri.to_string(),
        message: e.to_string(),
    })
}

// ============================================================================
// Resolver
// ============================================================================

/// Behaviour switches of a resolution.
#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    /// Fetch resources named in `task` / `pipeline` annotations.
    pub remote_tasks: bool,

    /// Turn `metadata.name` into `generateName: <name>-`.
    pub generate_name: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            remote_tasks: true,
            generate_name: true,
        }
    }
}

/// Resolves the PipelineRuns of one event, caching fetched resources by URI.
pub struct Resolver<'a> {
    fetcher: RemoteFetcher<'a>,
    local: &'a TektonTypes,
    options: ResolveOptions,
    fetched_tasks: BTreeMap<String, Task>,
    fetched_pipelines: BTreeMap<String, Pipeline>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        provider: &'a dyn Provider,
        settings: &'a Settings,
        local: &'a TektonTypes,
        options: ResolveOptions,
    ) -> Result<Self, ResolveError> {
        Ok(Self {
            fetcher: RemoteFetcher::new(provider, settings)?,
            local,
            options,
            fetched_tasks: BTreeMap::new(),
            fetched_pipelines: BTreeMap::new(),
        })
    }

    /// Inline every Pipeline and Task `pr` references.
    #[instrument(skip_all, fields(pipelinerun = %pr.template_name()))]
    pub async fn resolve(
        &mut self,
        event: &Event,
        mut pr: PipelineRun,
    ) -> Result<PipelineRun, ResolveError> {
        let template = pr.template_name();
        let mut pipeline: Option<Pipeline> = None;
        let mut pipeline_uri = String::new();

        if self.options.remote_tasks {
            if let Some(uri) = remote::pipeline_reference(&pr.metadata.annotations)? {
                pipeline = Some(self.remote_pipeline(event, &uri).await?);
                pipeline_uri = uri;
            }
        }

        let mut pipeline_task_uris = Vec::new();
        let pipeline_ref = pr
            .spec
            .pipeline_ref
            .as_ref()
            .filter(|r| r.resolver.is_empty() && r.bundle.is_empty())
            .map(|r| r.name.clone());
        if let Some(name) = &pipeline_ref {
            let remote_matches = pipeline
                .as_ref()
                .map(|p| &p.metadata.name == name)
                .unwrap_or(false);
            if !remote_matches {
                let local = self.local.pipeline(name).cloned().ok_or_else(|| {
                    ResolveError::UnknownPipeline {
                        pipeline: name.clone(),
                        pipeline_run: template.clone(),
                    }
                })?;
                pipeline = Some(local);
            }
            if let Some(p) = &pipeline {
                let uris = remote::task_references(&p.metadata.annotations)?;
                pipeline_task_uris = remote::absolute_task_uris(&pipeline_uri, uris);
            }
        }

        let mut tasks: BTreeMap<String, Task> = BTreeMap::new();
        if self.options.remote_tasks {
            let mut uris = remote::task_references(&pr.metadata.annotations)?;
            uris.extend(pipeline_task_uris);
            for uri in uris {
                let task = self.remote_task(event, &uri).await?;
                if tasks.contains_key(&task.metadata.name) {
                    debug!(uri = %uri, task = %task.metadata.name, "Task already provided by a higher precedence annotation");
                    continue;
                }
                tasks.insert(task.metadata.name.clone(), task);
            }
        }
        for task in &self.local.tasks {
            if tasks.contains_key(&task.metadata.name) {
                info!(
                    task = %task.metadata.name,
                    "Overriding task from the .tekton directory with an annotation task"
                );
                continue;
            }
            tasks.insert(task.metadata.name.clone(), task.clone());
        }

        if pipeline_ref.is_some() {
            if let Some(mut p) = pipeline {
                inline_tasks(&mut p.spec.tasks, &tasks, &template)?;
                inline_tasks(&mut p.spec.finally, &tasks, &template)?;
                pr.spec.pipeline_ref = None;
                pr.spec.pipeline_spec = Some(p.spec);
            }
        } else if let Some(spec) = pr.spec.pipeline_spec.as_mut() {
            inline_tasks(&mut spec.tasks, &tasks, &template)?;
            inline_tasks(&mut spec.finally, &tasks, &template)?;
        }

        pr.metadata
            .labels
            .insert(keys::ORIGINAL_PRNAME.to_string(), clean_label_value(&template));
        pr.metadata
            .annotations
            .insert(keys::ORIGINAL_PRNAME.to_string(), template.clone());

        if self.options.generate_name && pr.metadata.generate_name.is_empty() {
            pr.metadata.generate_name = format!("{}-", pr.metadata.name);
            pr.metadata.name.clear();
        }
        debug!(pipelinerun = %template, tasks = tasks.len(), "PipelineRun resolved");
        Ok(pr)
    }

    async fn remote_pipeline(&mut self, event: &Event, uri: &str) -> Result<Pipeline, ResolveError> {
        if let Some(p) = self.fetched_pipelines.get(uri) {
            debug!(uri = %uri, "Pipeline already fetched for this event");
            return Ok(p.clone());
        }
        let data = self.fetcher.fetch(event, uri, RemoteKind::Pipeline).await?;
        let pipeline = parse_remote_pipeline(uri, &data)?;
        self.fetched_pipelines.insert(uri.to_string(), pipeline.clone());
        Ok(pipeline)
    }

    async fn remote_task(&mut self, event: &Event, uri: &str) -> Result<Task, ResolveError> {
        if let Some(t) = self.fetched_tasks.get(uri) {
            debug!(uri = %uri, "Task already fetched for this event");
            return Ok(t.clone());
        }
        let data = self.fetcher.fetch(event, uri, RemoteKind::Task).await?;
        let task = parse_remote_task(uri, &data)?;
        self.fetched_tasks.insert(uri.to_string(), task.clone());
        Ok(task)
    }
}

/// Replace inlinable task references with the referenced Task's spec.
fn inline_tasks(
    pipeline_tasks: &mut [PipelineTask],
    tasks: &BTreeMap<String, Task>,
    pipeline_run: &str,
) -> Result<(), ResolveError> {
    for pipeline_task in pipeline_tasks.iter_mut() {
        let Some(task_ref) = &pipeline_task.task_ref else {
            continue;
        };
        if !task_ref.is_inlinable() {
            continue;
        }
        let task = tasks
            .get(&task_ref.name)
            .ok_or_else(|| ResolveError::UnknownTask {
                task: task_ref.name.clone(),
                pipeline_run: pipeline_run.to_string(),
            })?;
        pipeline_task.task_spec = Some(task.spec.clone());
        pipeline_task.task_ref = None;
    }
    Ok(())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
