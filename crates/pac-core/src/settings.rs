//! # Controller Settings
//!
//! Runtime settings read from the controller ConfigMap on every event.
//!
//! Keys mirror the ConfigMap the controller is deployed with; unknown keys
//! are ignored and missing keys take their defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::event::TriggerType;
use crate::kube::{KubeClient, KubeError};
use crate::repository::Repository;
use crate::secrets::ControllerSecret;

pub const DEFAULT_APPLICATION_NAME: &str = "Pipelines as Code CI";
pub const DEFAULT_HUB_URL: &str = "https://api.hub.tekton.dev/v1";
pub const DEFAULT_HUB_CATALOG_NAME: &str = "tekton";
pub const DEFAULT_ERROR_DETECTION_LINES: usize = 50;

/// Identifier of the catalog configured by `hub-url` / `hub-catalog-name`.
pub const DEFAULT_CATALOG_ID: &str = "default";

/// A Tekton Hub (or Artifact Hub compatible) catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubCatalog {
    /// Name used in `<id>://task` references.
    pub id: String,
    /// Catalog name in the hub API path.
    pub name: String,
    pub url: String,
}

/// Error type for settings parsing
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid URL for '{key}': {url}")]
    InvalidUrl { key: String, url: String },

    #[error("Cannot read ConfigMap {namespace}/{name}: {source}")]
    ConfigMap {
        namespace: String,
        name: String,
        #[source]
        source: KubeError,
    },
}

impl SettingsError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConfigMap { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    pub fn error_category(&self) -> crate::ErrorCategory {
        match self {
            Self::ConfigMap { source, .. } if source.is_transient() => {
                crate::ErrorCategory::Transient
            }
            _ => crate::ErrorCategory::Configuration,
        }
    }
}

/// Controller settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub application_name: String,
    pub secret_auto_create: bool,
    pub secret_github_app_token_scoped: bool,
    pub secret_github_app_scope_extra_repos: Vec<String>,
    pub remote_tasks: bool,
    /// Default catalog first, then the numbered catalogs in key order.
    pub hub_catalogs: Vec<HubCatalog>,
    pub tekton_dashboard_url: String,
    pub custom_console_name: String,
    pub custom_console_url: String,
    pub custom_console_url_pr_details: String,
    pub custom_console_url_pr_tasklog: String,
    pub enable_cancel_in_progress_on_pull_requests: bool,
    pub enable_cancel_in_progress_on_push: bool,
    pub max_keep_run_upper_limit: Option<usize>,
    pub default_max_keep_runs: Option<usize>,
    pub remember_ok_to_test: bool,
    pub error_log_snippet: bool,
    pub error_detection_max_lines: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
            secret_auto_create: true,
            secret_github_app_token_scoped: true,
            secret_github_app_scope_extra_repos: Vec::new(),
            remote_tasks: true,
            hub_catalogs: vec![HubCatalog {
                id: DEFAULT_CATALOG_ID.to_string(),
                name: DEFAULT_HUB_CATALOG_NAME.to_string(),
                url: DEFAULT_HUB_URL.to_string(),
            }],
            tekton_dashboard_url: String::new(),
            custom_console_name: String::new(),
            custom_console_url: String::new(),
            custom_console_url_pr_details: String::new(),
            custom_console_url_pr_tasklog: String::new(),
            enable_cancel_in_progress_on_pull_requests: false,
            enable_cancel_in_progress_on_push: false,
            max_keep_run_upper_limit: None,
            default_max_keep_runs: None,
            remember_ok_to_test: true,
            error_log_snippet: true,
            error_detection_max_lines: DEFAULT_ERROR_DETECTION_LINES,
        }
    }
}

impl Settings {
    /// Builds settings from ConfigMap data, applying defaults.
    pub fn from_config_map(data: &BTreeMap<String, String>) -> Result<Self, SettingsError> {
        let mut settings = Self::default();

        let get = |key: &str| data.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        if let Some(v) = get("application-name") {
            settings.application_name = v.to_string();
        }
        if let Some(v) = get("secret-auto-create") {
            settings.secret_auto_create = parse_bool("secret-auto-create", v)?;
        }
        if let Some(v) = get("secret-github-app-token-scoped") {
            settings.secret_github_app_token_scoped =
                parse_bool("secret-github-app-token-scoped", v)?;
        }
        if let Some(v) = get("secret-github-app-scope-extra-repos") {
            settings.secret_github_app_scope_extra_repos = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = get("remote-tasks") {
            settings.remote_tasks = parse_bool("remote-tasks", v)?;
        }

        let hub_url = get("hub-url").unwrap_or(DEFAULT_HUB_URL);
        validate_url("hub-url", hub_url)?;
        settings.hub_catalogs = vec![HubCatalog {
            id: DEFAULT_CATALOG_ID.to_string(),
            name: get("hub-catalog-name")
                .unwrap_or(DEFAULT_HUB_CATALOG_NAME)
                .to_string(),
            url: hub_url.trim_end_matches('/').to_string(),
        }];
        settings.hub_catalogs.extend(parse_catalogs(data)?);

        if let Some(v) = get("tekton-dashboard-url") {
            validate_url("tekton-dashboard-url", v)?;
            settings.tekton_dashboard_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("custom-console-name") {
            settings.custom_console_name = v.to_string();
        }
        if let Some(v) = get("custom-console-url") {
            validate_url("custom-console-url", v)?;
            settings.custom_console_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("custom-console-url-pr-details") {
            settings.custom_console_url_pr_details = v.to_string();
        }
        if let Some(v) = get("custom-console-url-pr-tasklog") {
            settings.custom_console_url_pr_tasklog = v.to_string();
        }
        if let Some(v) = get("enable-cancel-in-progress-on-pull-requests") {
            settings.enable_cancel_in_progress_on_pull_requests =
                parse_bool("enable-cancel-in-progress-on-pull-requests", v)?;
        }
        if let Some(v) = get("enable-cancel-in-progress-on-push") {
            settings.enable_cancel_in_progress_on_push =
                parse_bool("enable-cancel-in-progress-on-push", v)?;
        }
        if let Some(v) = get("max-keep-run-upper-limit") {
            settings.max_keep_run_upper_limit = Some(parse_usize("max-keep-run-upper-limit", v)?);
        }
        if let Some(v) = get("default-max-keep-runs") {
            settings.default_max_keep_runs = Some(parse_usize("default-max-keep-runs", v)?);
        }
        if let Some(v) = get("remember-ok-to-test") {
            settings.remember_ok_to_test = parse_bool("remember-ok-to-test", v)?;
        }
        if let Some(v) = get("error-log-snippet") {
            settings.error_log_snippet = parse_bool("error-log-snippet", v)?;
        }
        if let Some(v) = get("error-detection-max-number-of-lines") {
            settings.error_detection_max_lines =
                parse_usize("error-detection-max-number-of-lines", v)?;
        }

        Ok(settings)
    }

    /// Catalog registered under `id`.
    pub fn catalog(&self, id: &str) -> Option<&HubCatalog> {
        self.hub_catalogs.iter().find(|c| c.id == id)
    }

    /// The catalog used for bare task names.
    pub fn default_catalog(&self) -> Option<&HubCatalog> {
        self.catalog(DEFAULT_CATALOG_ID)
    }

    /// Whether the global cancel-in-progress switch covers this trigger.
    pub fn cancel_in_progress_enabled_for(&self, trigger: TriggerType) -> bool {
        match trigger {
            TriggerType::Push => self.enable_cancel_in_progress_on_push,
            t if t.is_pull_request() => self.enable_cancel_in_progress_on_pull_requests,
            _ => false,
        }
    }

    /// Effective `max-keep-runs` given the template's annotation value.
    pub fn effective_max_keep_runs(&self, annotation: Option<usize>) -> Option<usize> {
        let wanted = annotation.or(self.default_max_keep_runs)?;
        match self.max_keep_run_upper_limit {
            Some(limit) if limit > 0 && wanted > limit => Some(limit),
            _ => Some(wanted),
        }
    }

    /// Link to a PipelineRun in the configured console, empty when no console
    /// is configured.
    pub fn console_url(&self, namespace: &str, pipelinerun: &str) -> String {
        if !self.custom_console_url_pr_details.is_empty() {
            return self
                .custom_console_url_pr_details
                .replace("{{ namespace }}", namespace)
                .replace("{{namespace}}", namespace)
                .replace("{{ pr }}", pipelinerun)
                .replace("{{pr}}", pipelinerun);
        }
        if !self.custom_console_url.is_empty() {
            return format!(
                "{}/#/namespaces/{}/pipelineruns/{}",
                self.custom_console_url, namespace, pipelinerun
            );
        }
        if !self.tekton_dashboard_url.is_empty() {
            return format!(
                "{}/#/namespaces/{}/pipelineruns/{}",
                self.tekton_dashboard_url, namespace, pipelinerun
            );
        }
        String::new()
    }

    /// Display name of the configured console.
    pub fn console_name(&self) -> &str {
        if !self.custom_console_name.is_empty() {
            &self.custom_console_name
        } else if !self.tekton_dashboard_url.is_empty() {
            "Tekton Dashboard"
        } else {
            "Kubernetes"
        }
    }
}

// ============================================================================
// Controller Identity
// ============================================================================

pub const DEFAULT_CONTROLLER_NAME: &str = "default";
pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "pipelines-as-code";
pub const DEFAULT_CONTROLLER_SECRET: &str = "pipelines-as-code-secret";
pub const DEFAULT_CONTROLLER_CONFIGMAP: &str = "pipelines-as-code";
pub const DEFAULT_GLOBAL_REPOSITORY: &str = "pipelines-as-code";

/// Where a controller deployment keeps its secret, its ConfigMap and the
/// global Repository. Stamped on every PipelineRun it creates so that
/// several controllers can share a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerInfo {
    pub name: String,

    #[serde(skip)]
    pub namespace: String,

    pub secret: String,

    pub configmap: String,

    #[serde(rename = "gRepo")]
    pub global_repository: String,
}

impl Default for ControllerInfo {
    fn default() -> Self {
        Self {
            name: DEFAULT_CONTROLLER_NAME.to_string(),
            namespace: DEFAULT_CONTROLLER_NAMESPACE.to_string(),
            secret: DEFAULT_CONTROLLER_SECRET.to_string(),
            configmap: DEFAULT_CONTROLLER_CONFIGMAP.to_string(),
            global_repository: DEFAULT_GLOBAL_REPOSITORY.to_string(),
        }
    }
}

impl ControllerInfo {
    pub fn controller_secret(&self) -> ControllerSecret {
        ControllerSecret {
            namespace: self.namespace.clone(),
            name: self.secret.clone(),
        }
    }

    /// JSON form recorded in the `controller-info` annotation.
    pub fn annotation_value(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// True when a `controller-info` annotation names this controller. Runs
    /// without the annotation belong to everybody.
    pub fn owns(&self, annotation: Option<&str>) -> bool {
        let Some(raw) = annotation else {
            return true;
        };
        match serde_json::from_str::<ControllerInfo>(raw) {
            Ok(other) => other.name == self.name,
            Err(e) => {
                debug!(error = %e, "Ignoring unparseable controller-info annotation");
                true
            }
        }
    }

    /// Settings from the controller ConfigMap. A missing ConfigMap yields
    /// the defaults.
    pub async fn load_settings(&self, kube: &dyn KubeClient) -> Result<Settings, SettingsError> {
        match kube.get_config_map(&self.namespace, &self.configmap).await {
            Ok(cm) => Settings::from_config_map(&cm.data),
            Err(e) if e.is_not_found() => {
                warn!(
                    namespace = %self.namespace,
                    configmap = %self.configmap,
                    "Controller ConfigMap not found, using default settings"
                );
                Ok(Settings::default())
            }
            Err(source) => Err(SettingsError::ConfigMap {
                namespace: self.namespace.clone(),
                name: self.configmap.clone(),
                source,
            }),
        }
    }

    /// The global Repository, when one is deployed.
    pub async fn global_repository(&self, kube: &dyn KubeClient) -> Option<Repository> {
        match kube
            .get_repository(&self.namespace, &self.global_repository)
            .await
        {
            Ok(repo) => Some(repo),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                warn!(error = %e, "Cannot read global repository");
                None
            }
        }
    }
}

fn parse_catalogs(data: &BTreeMap<String, String>) -> Result<Vec<HubCatalog>, SettingsError> {
    let mut indexes: Vec<u32> = data
        .keys()
        .filter_map(|k| k.strip_prefix("catalog-"))
        .filter_map(|rest| rest.split_once('-'))
        .filter_map(|(n, _)| n.parse().ok())
        .collect();
    indexes.sort_unstable();
    indexes.dedup();

    let mut catalogs = Vec::new();
    for n in indexes {
        let field = |f: &str| {
            data.get(&format!("catalog-{}-{}", n, f))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };
        let (id, name, url) = (field("id"), field("name"), field("url"));
        if id.is_empty() || url.is_empty() {
            return Err(SettingsError::InvalidValue {
                key: format!("catalog-{}", n),
                message: "catalog needs both an id and a url".to_string(),
            });
        }
        validate_url(&format!("catalog-{}-url", n), &url)?;
        catalogs.push(HubCatalog {
            id,
            name: if name.is_empty() {
                DEFAULT_HUB_CATALOG_NAME.to_string()
            } else {
                name
            },
            url: url.trim_end_matches('/').to_string(),
        });
    }
    Ok(catalogs)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, SettingsError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" => Ok(true),
        "false" | "no" => Ok(false),
        other => Err(SettingsError::InvalidValue {
            key: key.to_string(),
            message: format!("expected true/false/yes/no, got '{}'", other),
        }),
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize, SettingsError> {
    value.parse().map_err(|_| SettingsError::InvalidValue {
        key: key.to_string(),
        message: format!("expected a non-negative integer, got '{}'", value),
    })
}

fn validate_url(key: &str, value: &str) -> Result<(), SettingsError> {
    match url::Url::parse(value) {
        Ok(u) if u.scheme() == "http" || u.scheme() == "https" => Ok(()),
        _ => Err(SettingsError::InvalidUrl {
            key: key.to_string(),
            url: value.to_string(),
        }),
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
