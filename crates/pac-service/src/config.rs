//! # Service Configuration
//!
//! Process-level settings of the controller binary. Sources, in order:
//!
//! 1. `config/pac.yaml` (optional), or the file named by `PAC_CONFIG_FILE`
//!    (required when set)
//! 2. environment variables prefixed `PAC__` with `__` as the nesting
//!    separator, e.g. `PAC__SERVER__PORT=9090`
//! 3. the deployment variables `CONFIG_LOGGING_NAME`,
//!    `PAC_CONTROLLER_SECRET` and `PAC_CONTROLLER_CONFIGMAP`
//!
//! Every field has a default, so an unconfigured environment produces a
//! usable configuration.

use pac_api::ServerConfig;
use pac_core::settings::{
    ControllerInfo, DEFAULT_CONTROLLER_CONFIGMAP, DEFAULT_CONTROLLER_NAME,
    DEFAULT_CONTROLLER_NAMESPACE, DEFAULT_CONTROLLER_SECRET, DEFAULT_GLOBAL_REPOSITORY,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const CONFIG_FILE_ENV: &str = "PAC_CONFIG_FILE";
pub const DEFAULT_CONFIG_FILE: &str = "config/pac";
pub const ENV_PREFIX: &str = "PAC";

pub const LOGGING_NAME_ENV: &str = "CONFIG_LOGGING_NAME";
pub const CONTROLLER_SECRET_ENV: &str = "PAC_CONTROLLER_SECRET";
pub const CONTROLLER_CONFIGMAP_ENV: &str = "PAC_CONTROLLER_CONFIGMAP";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter level when `RUST_LOG` is unset
    pub level: String,

    /// `text` or `json`
    pub format: String,

    /// Logger name recorded on the root span
    pub name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            name: "pipelinesascode".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn log_format(&self) -> Result<LogFormat, ConfigError> {
        match self.format.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::invalid(format!(
                "logging.format must be 'text' or 'json', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub name: String,

    /// Namespace holding the controller secret, ConfigMap and global
    /// Repository. Falls back to `kube.namespace` when empty.
    pub namespace: String,

    pub secret: String,
    pub configmap: String,
    pub global_repository: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_CONTROLLER_NAME.to_string(),
            namespace: String::new(),
            secret: DEFAULT_CONTROLLER_SECRET.to_string(),
            configmap: DEFAULT_CONTROLLER_CONFIGMAP.to_string(),
            global_repository: DEFAULT_GLOBAL_REPOSITORY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubeConfig {
    /// API server URL; empty means the in-cluster service address
    pub api_url: String,

    /// Bearer token file; empty means the service account token
    pub token_file: String,

    /// Namespace the controller is deployed in
    pub namespace: String,

    /// Keep every resource in process memory instead of talking to a
    /// cluster. Meant for local runs.
    pub in_memory: bool,
}

impl Default for KubeConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            token_file: String::new(),
            namespace: DEFAULT_CONTROLLER_NAMESPACE.to_string(),
            in_memory: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Delay between two reconcile passes
    pub interval_seconds: u64,

    /// Delay between two polls of a scheduled Repository queue
    pub scheduler_poll_seconds: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            scheduler_poll_seconds: 10,
        }
    }
}

impl ReconcilerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn scheduler_poll(&self) -> Duration {
        Duration::from_secs(self.scheduler_poll_seconds)
    }
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub controller: ControllerConfig,
    pub kube: KubeConfig,
    pub reconciler: ReconcilerConfig,
}

impl ServiceConfig {
    /// Loads the configuration from the default file locations and the
    /// process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var(CONFIG_FILE_ENV)
            .ok()
            .filter(|path| !path.is_empty());
        Self::load_from(explicit.as_deref())
    }

    /// Loads the configuration with `path` as the required file, or the
    /// optional default file when `None`.
    pub fn load_from(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => config::File::with_name(path)
                .required(true)
                .format(config::FileFormat::Yaml),
            None => config::File::with_name(DEFAULT_CONFIG_FILE)
                .required(false)
                .format(config::FileFormat::Yaml),
        };

        let mut loaded: ServiceConfig = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.apply_env_overrides();
        Ok(loaded)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(name) = non_empty_env(LOGGING_NAME_ENV) {
            self.logging.name = name;
        }
        if let Some(secret) = non_empty_env(CONTROLLER_SECRET_ENV) {
            self.controller.secret = secret;
        }
        if let Some(configmap) = non_empty_env(CONTROLLER_CONFIGMAP_ENV) {
            self.controller.configmap = configmap;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate().map_err(ConfigError::invalid)?;
        if self.controller.secret.trim().is_empty() {
            return Err(ConfigError::invalid("controller.secret must not be empty"));
        }
        if self.controller.configmap.trim().is_empty() {
            return Err(ConfigError::invalid(
                "controller.configmap must not be empty",
            ));
        }
        if self.reconciler.interval_seconds == 0 {
            return Err(ConfigError::invalid(
                "reconciler.interval_seconds must be greater than 0",
            ));
        }
        if self.reconciler.scheduler_poll_seconds == 0 {
            return Err(ConfigError::invalid(
                "reconciler.scheduler_poll_seconds must be greater than 0",
            ));
        }
        self.logging.log_format()?;
        Ok(())
    }

    /// Controller identity handed to the orchestrator and the reconciler.
    pub fn controller_info(&self) -> ControllerInfo {
        let namespace = if self.controller.namespace.is_empty() {
            self.kube.namespace.clone()
        } else {
            self.controller.namespace.clone()
        };
        ControllerInfo {
            name: self.controller.name.clone(),
            namespace,
            secret: self.controller.secret.clone(),
            configmap: self.controller.configmap.clone(),
            global_repository: self.controller.global_repository.clone(),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
