//! # Provider Contract
//!
//! Capabilities every VCS integration exposes to the orchestrator: payload
//! detection and parsing, signature validation, authenticated API access,
//! repository content, access control and status reporting.
//!
//! Concrete providers live in `pac-providers`. Credentials bound to an
//! event travel in [`Event::provider`], so a provider instance can be shared
//! between concurrent events.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;

use crate::event::{ChangedFiles, Event};
use crate::repository::{Repository, TaskInfo};
use crate::settings::Settings;

pub mod scripted;

pub use scripted::ScriptedProvider;

// ============================================================================
// Requests
// ============================================================================

/// A webhook HTTP request as received by the controller.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    /// Headers with lowercased names.
    pub headers: BTreeMap<String, String>,

    /// Query string parameters.
    pub query: BTreeMap<String, String>,

    /// Body, kept verbatim for signature validation.
    pub body: Bytes,
}

impl WebhookRequest {
    pub fn new(headers: BTreeMap<String, String>, body: impl Into<Bytes>) -> Self {
        Self {
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
            query: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_query(mut self, query: BTreeMap<String, String>) -> Self {
        self.query = query;
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn json(&self) -> Result<serde_json::Value, ProviderError> {
        serde_json::from_slice(&self.body).map_err(|e| ProviderError::InvalidPayload {
            message: format!("invalid JSON body: {}", e),
        })
    }
}

/// Outcome of [`Provider::detect`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detection {
    /// The payload belongs to this provider and should be processed.
    pub matched: bool,

    /// The payload is a pull request comment carrying a GitOps command.
    pub is_gitops_comment: bool,

    /// Why an owned payload is ignored, for logging.
    pub skip_reason: Option<String>,
}

impl Detection {
    pub fn matched() -> Self {
        Self {
            matched: true,
            ..Default::default()
        }
    }

    pub fn gitops_comment() -> Self {
        Self {
            matched: true,
            is_gitops_comment: true,
            skip_reason: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            matched: false,
            is_gitops_comment: false,
            skip_reason: Some(reason.into()),
        }
    }
}

// ============================================================================
// Status
// ============================================================================

/// Lifecycle stage of a reported run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunStatus {
    Queued,
    #[default]
    InProgress,
    Completed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

/// Conclusion of a reported run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitStatus {
    #[default]
    Pending,
    Success,
    Failure,
    Neutral,
    Skipped,
    Cancelled,
}

impl CommitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Neutral => "neutral",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CommitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a provider needs to render an external status.
#[derive(Debug, Clone, Default)]
pub struct StatusOptions {
    pub status: RunStatus,
    pub conclusion: CommitStatus,
    pub title: String,
    pub summary: String,

    /// Markdown body, usually the task status table.
    pub text: String,

    /// Link to the run in a console, empty when none is configured.
    pub details_url: String,

    pub pipeline_run_name: String,
    pub original_pipeline_run_name: String,
    pub tasks: Vec<TaskInfo>,

    /// Prefix of the check or status context name.
    pub application_name: String,
}

/// Markup used by a provider for the task status table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskTableFormat {
    #[default]
    Markdown,
    Html,
}

/// A file of the `.tekton/` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TektonFile {
    pub path: String,
    pub content: String,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid payload: {message}")]
    InvalidPayload { message: String },

    #[error("invalid signature: {message}")]
    InvalidSignature { message: String },

    #[error("unsupported event: {event_type}")]
    UnsupportedEvent { event_type: String },

    #[error("authentication failed: {message}")]
    Authentication { message: String },

    #[error("not found: {resource}")]
    NotFound { resource: String },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl ProviderError {
    /// Maps an HTTP status from a provider API.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Authentication { message },
            404 => Self::NotFound { resource: message },
            _ => Self::Api { status, message },
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn error_category(&self) -> crate::ErrorCategory {
        match self {
            Self::InvalidSignature { .. } | Self::Authentication { .. } => {
                crate::ErrorCategory::Security
            }
            Self::Configuration { .. } => crate::ErrorCategory::Configuration,
            _ if self.is_transient() => crate::ErrorCategory::Transient,
            _ => crate::ErrorCategory::Permanent,
        }
    }
}

// ============================================================================
// Provider Trait
// ============================================================================

/// A VCS integration.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short name recorded on PipelineRuns (`github`, `gitlab`, ...).
    fn name(&self) -> &'static str;

    /// Decide from headers and a body sniff whether this provider owns the
    /// request. Must not call remote APIs.
    fn detect(&self, request: &WebhookRequest) -> Result<Detection, ProviderError>;

    /// Build an event from an owned request.
    async fn parse_payload(&self, request: &WebhookRequest) -> Result<Event, ProviderError>;

    /// Check the webhook signature against `event.provider.webhook_secret`.
    fn validate(&self, event: &Event) -> Result<(), ProviderError>;

    /// Bind API credentials to the event. GitHub Apps exchange the
    /// installation id for a token here, scoped as `settings` requires.
    async fn set_client(
        &self,
        event: &mut Event,
        repo: &Repository,
        settings: &Settings,
    ) -> Result<(), ProviderError>;

    /// Fill `sha_title`, `sha_url` and author fields.
    async fn get_commit_info(&self, event: &mut Event) -> Result<(), ProviderError>;

    /// YAML files under `path` at the event's revision, sorted by path.
    async fn get_tekton_dir(
        &self,
        event: &Event,
        path: &str,
    ) -> Result<Vec<TektonFile>, ProviderError>;

    async fn get_file_inside_repo(
        &self,
        event: &Event,
        path: &str,
        branch: &str,
    ) -> Result<String, ProviderError>;

    async fn get_files(&self, event: &Event) -> Result<ChangedFiles, ProviderError>;

    /// Whether the sender may trigger CI for this event.
    async fn is_allowed(
        &self,
        event: &Event,
        repo: &Repository,
        settings: &Settings,
    ) -> Result<bool, ProviderError>;

    async fn create_status(
        &self,
        event: &Event,
        options: &StatusOptions,
    ) -> Result<(), ProviderError>;

    /// Post a comment on the pull request. With a `dedup_key`, earlier
    /// comments starting with the key are replaced.
    async fn create_comment(
        &self,
        event: &Event,
        body: &str,
        dedup_key: Option<&str>,
    ) -> Result<(), ProviderError>;

    /// Resolve a task URI through the provider API when it points at this
    /// provider. `None` means the URI is not handled here.
    async fn get_task_uri(&self, event: &Event, uri: &str)
        -> Result<Option<String>, ProviderError>;

    /// Markup for the task status table.
    fn task_table_format(&self) -> TaskTableFormat {
        TaskTableFormat::Markdown
    }

    /// Providers with check runs render task details natively.
    fn supports_check_runs(&self) -> bool {
        false
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
