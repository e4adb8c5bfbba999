//! # Custom Parameters
//!
//! Computes the parameter map substituted into `{{ name }}` placeholders of
//! a PipelineRun. Sources, lowest precedence first:
//!
//! 1. Standard parameters derived from the event
//! 2. `spec.params` of the Repository, with CEL filters and secret references
//! 3. String values of the `params` object of an incoming webhook payload
//! 4. `key=value` arguments of the triggering GitOps comment, for keys that
//!    already exist

use std::collections::{BTreeMap, HashSet};
use tracing::{debug, instrument, warn};

use crate::cel::{Activation, CelError, Program};
use crate::event::{ChangedFiles, Event, TriggerType};
use crate::formatting::strip_heads_prefix;
use crate::kube::{emit_repository_event, KubeClient, KubeError};
use crate::opscomments;
use crate::repository::Repository;
use crate::resources::EventSeverity;

/// Errors that abort parameter computation for a PipelineRun.
#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("there is an error on the cel filter of param {name}: {source}")]
    Filter {
        name: String,
        #[source]
        source: CelError,
    },

    #[error("cannot read secret {secret} for param {name}: {source}")]
    Secret {
        name: String,
        secret: String,
        #[source]
        source: KubeError,
    },

    #[error("secret {secret} has no key {key} for param {name}")]
    MissingSecretKey {
        name: String,
        secret: String,
        key: String,
    },
}

impl ParamsError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Secret { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    pub fn error_category(&self) -> crate::ErrorCategory {
        match self {
            Self::Filter { .. } => crate::ErrorCategory::Permanent,
            Self::Secret { source, .. } => source.error_category(),
            Self::MissingSecretKey { .. } => crate::ErrorCategory::Configuration,
        }
    }
}

/// Parameters derived from the event alone.
///
/// Branches lose their `refs/heads/` prefix; `refs/tags/` is kept on the
/// branch and the tag name is exposed as `git_tag`.
pub fn standard_params(event: &Event, target_namespace: &str) -> BTreeMap<String, String> {
    let repo_url = if event.clone_url.is_empty() {
        event.url.clone()
    } else {
        event.clone_url.clone()
    };
    let git_tag = event
        .base_branch
        .strip_prefix("refs/tags/")
        .unwrap_or_default()
        .to_string();
    let event_title = if event.trigger_target == TriggerType::Push {
        event.sha_title.clone()
    } else {
        event.pull_request_title.clone()
    };
    let trigger_comment = event
        .trigger_comment
        .replace("\r\n", "\\n")
        .replace('\n', "\\n");

    let mut params = BTreeMap::new();
    let mut set = |key: &str, value: String| {
        params.insert(key.to_string(), value);
    };
    set("revision", event.sha.clone());
    set("repo_url", repo_url);
    set("repo_owner", event.organization.to_lowercase());
    set("repo_name", event.repository.to_lowercase());
    set("target_branch", strip_heads_prefix(&event.base_branch).to_string());
    set("source_branch", strip_heads_prefix(&event.head_branch).to_string());
    set("source_url", event.head_url.clone());
    set("target_url", event.url.clone());
    set("sender", event.sender.to_lowercase());
    set("target_namespace", target_namespace.to_string());
    set("event_type", event.event_type.clone());
    set("event", event.trigger_target.as_str().to_string());
    set("event_title", event_title);
    set("git_tag", git_tag);
    set("trigger_comment", trigger_comment);
    set("pull_request_labels", event.pull_request_labels.join("\\n"));
    set(
        "pull_request_number",
        event
            .pull_request_number
            .map(|n| n.to_string())
            .unwrap_or_default(),
    );
    params
}

/// Computes parameters for one Repository and event.
pub struct CustomParams<'a> {
    kube: &'a dyn KubeClient,
    repo: &'a Repository,
    event: &'a Event,
    files: &'a ChangedFiles,
}

impl<'a> CustomParams<'a> {
    pub fn new(
        kube: &'a dyn KubeClient,
        repo: &'a Repository,
        event: &'a Event,
        files: &'a ChangedFiles,
    ) -> Self {
        Self {
            kube,
            repo,
            event,
            files,
        }
    }

    /// Produce the final parameter map. Standard parameters with empty
    /// values are omitted.
    #[instrument(skip(self), fields(repository = %self.repo.name()))]
    pub async fn compute(&self) -> Result<BTreeMap<String, String>, ParamsError> {
        let standard = standard_params(self.event, self.repo.namespace());
        let mut params = self.repository_params(&standard).await?;

        for (key, value) in &standard {
            if !value.is_empty() && !params.contains_key(key) {
                params.insert(key.clone(), value.clone());
            }
        }

        self.apply_incoming_params(&mut params).await;
        self.apply_comment_arguments(&mut params);
        Ok(params)
    }

    async fn repository_params(
        &self,
        standard: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, ParamsError> {
        let mut params = BTreeMap::new();
        let Some(declared) = &self.repo.spec.params else {
            return Ok(params);
        };

        let activation = Activation::for_params(self.event, standard, self.files);
        let mut matched_filters: HashSet<&str> = HashSet::new();

        for (index, param) in declared.iter().enumerate() {
            if param.name.is_empty() {
                self.emit(
                    EventSeverity::Warning,
                    "ParamsFilterSkipped",
                    format!(
                        "no name has been set in params[{}] of repo {}",
                        index,
                        self.repo.name()
                    ),
                )
                .await;
                continue;
            }

            if !param.filter.is_empty() {
                if matched_filters.contains(param.name.as_str()) {
                    self.emit(
                        EventSeverity::Warning,
                        "ParamsFilterSkipped",
                        format!(
                            "skipping params name {}, filter has already been matched previously",
                            param.name
                        ),
                    )
                    .await;
                    continue;
                }

                let matched = Program::compile(&param.filter, &activation.names())
                    .and_then(|p| p.evaluate_bool(&activation));
                match matched {
                    Err(source) => {
                        self.emit(
                            EventSeverity::Warning,
                            "ParamsFilterError",
                            format!(
                                "there is an error on the cel filter: {}: {}",
                                param.name, source
                            ),
                        )
                        .await;
                        return Err(ParamsError::Filter {
                            name: param.name.clone(),
                            source,
                        });
                    }
                    Ok(false) => {
                        debug!(param = %param.name, "skipping param, filter condition is false");
                        continue;
                    }
                    Ok(true) => {
                        matched_filters.insert(param.name.as_str());
                    }
                }
            }

            if param.secret_ref.is_some() && !param.value.is_empty() {
                warn!(param = %param.name, "param has both a value and a secret_ref, using the value");
                self.emit(
                    EventSeverity::Normal,
                    "ParamsFilterUsedValue",
                    format!(
                        "repo {}, param name {} has a value and secretref, picking value",
                        self.repo.name(),
                        param.name
                    ),
                )
                .await;
            }

            if !param.value.is_empty() {
                params.insert(param.name.clone(), param.value.clone());
            } else if let Some(secret_ref) = &param.secret_ref {
                let secret = self
                    .kube
                    .get_secret(self.repo.namespace(), &secret_ref.name)
                    .await
                    .map_err(|source| ParamsError::Secret {
                        name: param.name.clone(),
                        secret: secret_ref.name.clone(),
                        source,
                    })?;
                let value =
                    secret
                        .value(&secret_ref.key)
                        .ok_or_else(|| ParamsError::MissingSecretKey {
                            name: param.name.clone(),
                            secret: secret_ref.name.clone(),
                            key: secret_ref.key.clone(),
                        })?;
                params.insert(param.name.clone(), value);
            }
        }

        Ok(params)
    }

    async fn apply_incoming_params(&self, params: &mut BTreeMap<String, String>) {
        let Some(request) = &self.event.request else {
            return;
        };
        let Ok(payload) = serde_json::from_slice::<serde_json::Value>(&request.payload) else {
            return;
        };
        let Some(incoming) = payload.get("params").and_then(|p| p.as_object()) else {
            return;
        };

        for (key, value) in incoming {
            match value.as_str() {
                Some(s) => {
                    params.insert(key.clone(), s.to_string());
                }
                None => {
                    self.emit(
                        EventSeverity::Warning,
                        "IncomingParamsNotString",
                        format!(
                            "cannot convert incoming param key: {} value: {} as string",
                            key, value
                        ),
                    )
                    .await;
                }
            }
        }
    }

    fn apply_comment_arguments(&self, params: &mut BTreeMap<String, String>) {
        if self.event.trigger_comment.is_empty() {
            return;
        }
        for (key, value) in opscomments::comment_arguments(&self.event.trigger_comment) {
            if let Some(existing) = params.get_mut(&key) {
                debug!(param = %key, "overriding param from comment argument");
                *existing = value;
            }
        }
    }

    async fn emit(&self, severity: EventSeverity, reason: &str, message: String) {
        emit_repository_event(self.kube, self.repo, severity, reason, message).await;
    }
}

#[cfg(test)]
#[path = "customparams_tests.rs"]
mod tests;
