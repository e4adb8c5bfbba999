//! # Event Model
//!
//! The provider-neutral description of a single webhook delivery.
//!
//! An [`Event`] is produced by a provider's payload parser, enriched by the
//! orchestrator (commit information, credentials) and consumed by every
//! later stage: matching, parameter computation, resolution and status
//! reporting. It lives for the duration of one webhook request.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{EventId, SecretValue};

// ============================================================================
// Trigger Types
// ============================================================================

/// Normalised trigger of an event, used for `on-event` matching and for the
/// branch scope of cancel-in-progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Push,
    PullRequest,
    PullRequestClosed,
    PullRequestLabeled,
    Incoming,
    Comment,
    #[serde(rename = "retest-comment")]
    Retest,
    #[serde(rename = "ok-to-test-comment")]
    OkToTest,
    #[serde(rename = "cancel-comment")]
    Cancel,
    CheckRunRerequested,
    CheckSuiteRerequested,
    #[default]
    None,
}

impl TriggerType {
    /// Wire name of the trigger, as used in `on-event` annotations.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::PullRequest => "pull_request",
            Self::PullRequestClosed => "pull_request_closed",
            Self::PullRequestLabeled => "pull_request_labeled",
            Self::Incoming => "incoming",
            Self::Comment => "comment",
            Self::Retest => "retest-comment",
            Self::OkToTest => "ok-to-test-comment",
            Self::Cancel => "cancel-comment",
            Self::CheckRunRerequested => "check_run",
            Self::CheckSuiteRerequested => "check_suite",
            Self::None => "",
        }
    }

    /// Inverse of [`TriggerType::as_str`]; unknown names map to `None`.
    pub fn from_wire(name: &str) -> Self {
        match name {
            "push" => Self::Push,
            "pull_request" => Self::PullRequest,
            "pull_request_closed" => Self::PullRequestClosed,
            "pull_request_labeled" => Self::PullRequestLabeled,
            "incoming" => Self::Incoming,
            "comment" => Self::Comment,
            "retest-comment" => Self::Retest,
            "ok-to-test-comment" => Self::OkToTest,
            "cancel-comment" => Self::Cancel,
            "check_run" => Self::CheckRunRerequested,
            "check_suite" => Self::CheckSuiteRerequested,
            _ => Self::None,
        }
    }

    /// True for triggers that originate from a pull or merge request.
    pub fn is_pull_request(&self) -> bool {
        matches!(
            self,
            Self::PullRequest
                | Self::PullRequestClosed
                | Self::PullRequestLabeled
                | Self::Retest
                | Self::OkToTest
                | Self::Cancel
                | Self::Comment
        )
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known values of [`Event::event_type`].
///
/// Provider parsers set the event type to the provider's own name for the
/// webhook (normalised to these values where one exists); the ops-comment
/// parser replaces it with one of the comment event types.
pub mod event_types {
    pub const PUSH: &str = "push";
    pub const PULL_REQUEST: &str = "pull_request";
    pub const INCOMING: &str = "incoming";
    pub const ON_COMMENT: &str = "on-comment";
    pub const NO_OPS_COMMENT: &str = "no-ops-comment";
    pub const TEST_ALL_COMMENT: &str = "test-all-comment";
    pub const TEST_COMMENT: &str = "test-comment";
    pub const RETEST_ALL_COMMENT: &str = "retest-all-comment";
    pub const RETEST_COMMENT: &str = "retest-comment";
    pub const CANCEL_ALL_COMMENT: &str = "cancel-all-comment";
    pub const CANCEL_COMMENT: &str = "cancel-comment";
    pub const OK_TO_TEST_COMMENT: &str = "ok-to-test-comment";

    /// GitLab merge request event name.
    pub const MERGE_REQUEST: &str = "Merge_Request";

    /// All comment-derived event types.
    pub const COMMENT_TYPES: &[&str] = &[
        TEST_ALL_COMMENT,
        TEST_COMMENT,
        RETEST_ALL_COMMENT,
        RETEST_COMMENT,
        CANCEL_ALL_COMMENT,
        CANCEL_COMMENT,
        OK_TO_TEST_COMMENT,
        ON_COMMENT,
        NO_OPS_COMMENT,
    ];

    /// Returns true when the event type is one of the comment event types.
    pub fn is_comment(event_type: &str) -> bool {
        COMMENT_TYPES.contains(&event_type)
    }
}

// ============================================================================
// Provider Credentials
// ============================================================================

/// Credentials and endpoint bound to an event once the secret resolver ran.
#[derive(Clone, Default)]
pub struct ProviderCredentials {
    /// API token used by the provider client and the git auth secret.
    pub token: Option<SecretValue>,

    /// Shared secret used to validate the webhook signature.
    pub webhook_secret: Option<SecretValue>,

    /// API base URL, empty for the public SaaS endpoint.
    pub url: String,

    /// User name for providers that need one (Bitbucket).
    pub user: String,
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "<REDACTED>"),
            )
            .field("url", &self.url)
            .field("user", &self.user)
            .finish()
    }
}

/// Control-plane state derived from ops comments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventState {
    /// A `/cancel` comment was issued.
    pub cancel_pipeline_runs: bool,

    /// Name given to `/cancel <name>`, empty for "cancel all".
    pub target_cancel_pipeline_run: String,
}

/// Raw request data retained for incoming webhooks.
#[derive(Debug, Clone, Default)]
pub struct IncomingRequest {
    /// Lowercased request headers.
    pub headers: BTreeMap<String, String>,

    /// Request body.
    pub payload: Bytes,
}

/// Files touched by the commit or pull request behind an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFiles {
    pub all: Vec<String>,
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub renamed: Vec<String>,
}

impl ChangedFiles {
    /// True when no file of any category is present.
    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
            && self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.renamed.is_empty()
    }
}

// ============================================================================
// Event
// ============================================================================

/// A single VCS webhook delivery in provider-neutral form.
#[derive(Debug, Clone, Default)]
pub struct Event {
    /// Correlation identifier for logs.
    pub event_id: EventId,

    /// Provider event name, or one of the comment event types.
    pub event_type: String,

    pub trigger_target: TriggerType,

    /// Commit the PipelineRuns run against.
    pub sha: String,
    pub sha_title: String,
    pub sha_url: String,
    pub sha_author_name: String,
    pub sha_author_date: String,
    pub sha_committer_name: String,

    /// Branch (or tag ref) the changes come from.
    pub head_branch: String,

    /// Branch (or tag ref) the changes are targeted at.
    pub base_branch: String,
    pub default_branch: String,

    pub organization: String,
    pub repository: String,

    /// Browser URL of the target repository.
    pub url: String,

    /// Browser URL of the source repository (forks).
    pub head_url: String,

    /// Clone URL, preferred over `url` for the `repo_url` parameter.
    pub clone_url: String,

    pub sender: String,

    /// Provider account identifier of the sender (Bitbucket).
    pub account_id: String,

    /// GitHub App installation, when the event came through an App.
    pub installation_id: Option<i64>,

    /// GitHub Enterprise host, when applicable.
    pub ghe_url: String,

    pub pull_request_number: Option<u64>,
    pub pull_request_title: String,
    pub pull_request_labels: Vec<String>,

    /// Full text of the comment that triggered the event.
    pub trigger_comment: String,

    /// Template requested by `/test <name>`, `/retest <name>` or an incoming
    /// webhook.
    pub target_pipeline_run: String,

    /// GitLab project identifiers.
    pub source_project_id: Option<i64>,
    pub target_project_id: Option<i64>,

    pub provider: ProviderCredentials,

    /// Lowercased request headers.
    pub headers: BTreeMap<String, String>,

    /// Raw webhook body, kept verbatim for signature checks and CEL `body`.
    pub payload: Bytes,

    /// Present for incoming webhooks only.
    pub request: Option<IncomingRequest>,

    pub state: EventState,
}

impl Event {
    /// Creates an empty event of the given type and trigger.
    pub fn new(event_type: impl Into<String>, trigger_target: TriggerType) -> Self {
        Self {
            event_type: event_type.into(),
            trigger_target,
            ..Default::default()
        }
    }

    /// Parses the raw payload as JSON, returning `Null` for empty or invalid
    /// bodies.
    pub fn payload_json(&self) -> serde_json::Value {
        if self.payload.is_empty() {
            return serde_json::Value::Null;
        }
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }

    /// Pull request number rendered for labels and parameters, empty when
    /// the event is not PR-derived.
    pub fn pull_request_number_string(&self) -> String {
        self.pull_request_number
            .map(|n| n.to_string())
            .unwrap_or_default()
    }

    /// Tag name when the base branch is a tag ref.
    pub fn git_tag(&self) -> String {
        self.base_branch
            .strip_prefix("refs/tags/")
            .map(str::to_string)
            .unwrap_or_default()
    }

    /// Short description used in log fields.
    pub fn describe(&self) -> String {
        format!(
            "{}/{} {} ({})",
            self.organization, self.repository, self.event_type, self.sha
        )
    }
}
