//! # Remote Fetching
//!
//! Retrieval of the YAML behind a `task` or `pipeline` annotation value.
//!
//! Fetch order for one URI:
//! 1. The provider, when the URI points at its own web UI
//! 2. `http(s)://` URLs through a plain GET
//! 3. `<catalog>://name[:version]` through the named hub catalog
//! 4. Paths containing `/` from the repository at the event's commit, or
//!    from the local filesystem when the event has no commit
//! 5. Bare names from the default hub catalog
//!
//! Pipelines are never looked up on a hub.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

use crate::event::Event;
use crate::keys;
use crate::matcher::annotation_values;
use crate::provider::{Provider, ProviderError};
use crate::settings::{Settings, DEFAULT_CATALOG_ID};

use super::hub::{HubClient, HubError};
use super::ResolveError;

/// Timeout of plain HTTP fetches.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Kind of resource a URI is expected to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    Task,
    Pipeline,
}

impl RemoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Pipeline => "pipeline",
        }
    }
}

fn task_annotation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!("^{}/task(-[0-9]+)?$", regex::escape(keys::GROUP_NAME)))
            .expect("task annotation regex is valid")
    })
}

fn pipeline_annotation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            "^{}/pipeline(-[0-9]+)?$",
            regex::escape(keys::GROUP_NAME)
        ))
        .expect("pipeline annotation regex is valid")
    })
}

fn values_from_annotations<'a>(
    annotations: impl IntoIterator<Item = (&'a String, &'a String)>,
    pattern: &Regex,
) -> Result<Vec<String>, ResolveError> {
    let mut out = Vec::new();
    for (key, value) in annotations {
        if !pattern.is_match(key) {
            continue;
        }
        out.extend(annotation_values(key, value)?);
    }
    Ok(out)
}

/// URIs listed in `task` and `task-N` annotations, in key order.
pub fn task_references<'a>(
    annotations: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> Result<Vec<String>, ResolveError> {
    values_from_annotations(annotations, task_annotation_regex())
}

/// The URI of the `pipeline` annotation. More than one is an error.
pub fn pipeline_reference<'a>(
    annotations: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> Result<Option<String>, ResolveError> {
    let mut values = values_from_annotations(annotations, pipeline_annotation_regex())?;
    if values.len() > 1 {
        return Err(ResolveError::MultiplePipelines { uris: values });
    }
    Ok(values.pop())
}

/// Task URIs of a remote pipeline's annotations, made absolute against the
/// pipeline's own URL when it was fetched over HTTP.
pub fn absolute_task_uris(pipeline_uri: &str, tasks: Vec<String>) -> Vec<String> {
    let lowered = pipeline_uri.to_ascii_lowercase();
    if !lowered.starts_with("http://") && !lowered.starts_with("https://") {
        return tasks;
    }
    let Ok(base) = url::Url::parse(pipeline_uri) else {
        return tasks;
    };

    tasks
        .into_iter()
        .map(|task| {
            if let Ok(parsed) = url::Url::parse(&task) {
                if parsed.has_host() {
                    return task;
                }
            }
            base.join(&task)
                .map(|u| u.to_string())
                .unwrap_or(task)
        })
        .collect()
}

/// Fetches remote resources for one event.
pub struct RemoteFetcher<'a> {
    provider: &'a dyn Provider,
    settings: &'a Settings,
    http: reqwest::Client,
    hub: HubClient,
}

impl<'a> RemoteFetcher<'a> {
    pub fn new(provider: &'a dyn Provider, settings: &'a Settings) -> Result<Self, ResolveError> {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent("pipelines-as-code")
            .build()
            .map_err(|e| ResolveError::Fetch {
                uri: String::new(),
                message: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self {
            provider,
            settings,
            hub: HubClient::with_http(http.clone()),
            http,
        })
    }

    /// Raw YAML behind `uri`. An empty body is an error.
    pub async fn fetch(
        &self,
        event: &Event,
        uri: &str,
        kind: RemoteKind,
    ) -> Result<String, ResolveError> {
        let data = self.fetch_raw(event, uri, kind).await?;
        if data.trim().is_empty() {
            return Err(ResolveError::Empty {
                kind: kind.as_str(),
                uri: uri.to_string(),
            });
        }
        Ok(data)
    }

    async fn fetch_raw(
        &self,
        event: &Event,
        uri: &str,
        kind: RemoteKind,
    ) -> Result<String, ResolveError> {
        let from_hub = kind == RemoteKind::Task;
        let fetch_error = |message: String| ResolveError::Fetch {
            uri: uri.to_string(),
            message,
        };

        if let Some(data) = self
            .provider
            .get_task_uri(event, uri)
            .await
            .map_err(|e| fetch_error(e.to_string()))?
        {
            info!(uri = %uri, provider = %self.provider.name(), "Fetched remote resource through provider API");
            return Ok(data);
        }

        let lowered = uri.to_ascii_lowercase();
        if lowered.starts_with("https://") || lowered.starts_with("http://") {
            let data = self.get_url(uri).await.map_err(fetch_error)?;
            info!(uri = %uri, "Fetched remote resource from URL");
            return Ok(data);
        }

        if from_hub {
            if let Some((catalog_id, reference)) = uri.split_once("://") {
                let Some(catalog) = self.settings.catalog(catalog_id) else {
                    warn!(catalog = %catalog_id, uri = %uri, "Custom catalog is not configured");
                    return Ok(String::new());
                };
                return Ok(self
                    .hub
                    .get_resource(catalog, reference, kind.as_str())
                    .await?);
            }
        }

        if uri.contains('/') {
            if !event.sha.is_empty() {
                let data = self
                    .provider
                    .get_file_inside_repo(event, uri, "")
                    .await
                    .map_err(|e| match e {
                        ProviderError::NotFound { .. } => ResolveError::Fetch {
                            uri: uri.to_string(),
                            message: "file not found inside repository".to_string(),
                        },
                        other => fetch_error(other.to_string()),
                    })?;
                info!(uri = %uri, "Fetched remote resource inside repository");
                return Ok(data);
            }
            return read_local_file(uri).await;
        }

        if from_hub {
            let catalog = self
                .settings
                .default_catalog()
                .ok_or_else(|| HubError::Client {
                    message: format!("catalog '{}' is not configured", DEFAULT_CATALOG_ID),
                })?;
            return Ok(self.hub.get_resource(catalog, uri, kind.as_str()).await?);
        }

        Err(fetch_error("cannot find the resource anywhere".to_string()))
    }

    async fn get_url(&self, uri: &str) -> Result<String, String> {
        let response = self
            .http
            .get(uri)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("cannot get remote resource: {}", status));
        }
        response.text().await.map_err(|e| e.to_string())
    }
}

/// Reads a task from the working directory, for runs without a commit.
/// A missing file yields empty data.
async fn read_local_file(path: &str) -> Result<String, ResolveError> {
    if !Path::new(path).exists() {
        warn!(path = %path, "Could not find remote task inside repository");
        return Ok(String::new());
    }
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ResolveError::Fetch {
            uri: path.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
#[path = "remote_tests.rs"]
mod tests;
