//! # Incoming Webhooks
//!
//! Lets an external system trigger a named PipelineRun on a branch without a
//! VCS event. The caller names the Repository, the branch, the template and
//! a shared secret; the Repository declares which branches and parameters
//! are accepted under `spec.incoming`.
//!
//! The request is accepted either as query parameters (legacy, the secret
//! ends up in access logs) or as a JSON body:
//!
//! ```json
//! {"repository": "app", "branch": "main", "pipelinerun": "deploy",
//!  "secret": "...", "params": {"env": "prod"}}
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument, warn};

use crate::event::{event_types, Event, IncomingRequest, TriggerType};
use crate::formatting::org_repo_from_url;
use crate::glob;
use crate::kube::{KubeClient, KubeError};
use crate::provider::WebhookRequest;
use crate::repository::{Incoming, Repository};

/// Secret key read when the rule does not name one.
pub const DEFAULT_SECRET_KEY: &str = "secret";

/// Sender recorded on incoming events.
pub const INCOMING_SENDER: &str = "incoming";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum IncomingError {
    #[error("missing required fields: [{}]", .fields.join(", "))]
    MissingFields { fields: Vec<String> },

    #[error("invalid incoming request body: {message}")]
    InvalidBody { message: String },

    #[error("repository {name} not found")]
    RepositoryNotFound { name: String },

    #[error("multiple repositories named {name} exist, specify a namespace")]
    RepositoryNameConflict { name: String },

    #[error("repository {repository} has no incoming webhooks configured")]
    NotConfigured { repository: String },

    #[error("branch '{branch}' has not matched any rules in repo incoming webhooks spec")]
    NoMatchingRule { branch: String },

    #[error("cannot read incoming secret {secret}: {source}")]
    Secret {
        secret: String,
        #[source]
        source: KubeError,
    },

    #[error("secret {secret} has an empty value for key {key}")]
    EmptySecret { secret: String, key: String },

    #[error("incoming webhook secret does not match")]
    SecretMismatch,

    #[error("param {name} is not allowed in incoming webhook CR")]
    ParamNotAllowed { name: String },

    #[error("no supported Git provider has been detected for type {type_}")]
    UnsupportedProvider { type_: String },

    #[error("kubernetes error: {0}")]
    Kube(#[from] KubeError),
}

impl IncomingError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Secret { source, .. } | Self::Kube(source) => source.is_transient(),
            _ => false,
        }
    }

    pub fn error_category(&self) -> crate::ErrorCategory {
        match self {
            Self::SecretMismatch => crate::ErrorCategory::Security,
            Self::EmptySecret { .. } | Self::UnsupportedProvider { .. } => {
                crate::ErrorCategory::Configuration
            }
            Self::Secret { source, .. } | Self::Kube(source) => source.error_category(),
            _ => crate::ErrorCategory::Permanent,
        }
    }

    /// HTTP status the API layer answers with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::SecretMismatch => 401,
            Self::RepositoryNotFound { .. } => 404,
            Self::Secret { source, .. } | Self::Kube(source) if source.is_transient() => 503,
            Self::Secret { .. } | Self::Kube(_) | Self::EmptySecret { .. } => 500,
            _ => 400,
        }
    }
}

// ============================================================================
// Request
// ============================================================================

/// Fields an incoming trigger carries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncomingPayload {
    #[serde(default)]
    pub repository: String,

    #[serde(default)]
    pub namespace: String,

    #[serde(default)]
    pub branch: String,

    #[serde(default)]
    pub pipelinerun: String,

    #[serde(default)]
    pub secret: String,

    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl IncomingPayload {
    /// Reads the payload from the query string, falling back to the JSON
    /// body when the query does not carry every required field.
    pub fn from_request(request: &WebhookRequest) -> Result<Self, IncomingError> {
        let query = |name: &str| request.query.get(name).cloned().unwrap_or_default();
        let from_query = Self {
            repository: query("repository"),
            namespace: query("namespace"),
            branch: query("branch"),
            pipelinerun: query("pipelinerun"),
            secret: query("secret"),
            params: BTreeMap::new(),
        };

        let payload = if from_query.missing_fields().is_empty() {
            warn!(
                repository = %from_query.repository,
                "[SECURITY] incoming webhook credentials passed as query parameters, use a JSON body instead"
            );
            let mut payload = from_query;
            // Params can only come from a body, even in legacy mode.
            if let Some(body) = Self::parse_body(request)? {
                payload.params = body.params;
            }
            payload
        } else {
            Self::parse_body(request)?.unwrap_or_default()
        };

        let missing = payload.missing_fields();
        if !missing.is_empty() {
            return Err(IncomingError::MissingFields {
                fields: missing.into_iter().map(str::to_string).collect(),
            });
        }
        Ok(payload)
    }

    fn parse_body(request: &WebhookRequest) -> Result<Option<Self>, IncomingError> {
        if request.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let is_json = request
            .header("content-type")
            .map(|ct| ct.starts_with("application/json"))
            .unwrap_or(false);
        if !is_json {
            return Err(IncomingError::InvalidBody {
                message: "content type must be application/json".to_string(),
            });
        }
        serde_json::from_slice(&request.body)
            .map(Some)
            .map_err(|e| IncomingError::InvalidBody {
                message: e.to_string(),
            })
    }

    fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("repository", &self.repository),
            ("branch", &self.branch),
            ("pipelinerun", &self.pipelinerun),
            ("secret", &self.secret),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// An accepted incoming trigger.
#[derive(Debug, Clone)]
pub struct IncomingTrigger {
    pub event: Event,
    pub repository: Repository,
    pub rule: Incoming,

    /// Provider handling the event: `github`, `gitlab`, `gitea`,
    /// `bitbucket-cloud` or `bitbucket-datacenter`.
    pub provider: &'static str,
}

/// Finds the Repository named by the request. A name shared across
/// namespaces needs the namespace to disambiguate.
pub async fn find_repository(
    kube: &dyn KubeClient,
    name: &str,
    namespace: &str,
) -> Result<Repository, IncomingError> {
    let scope = (!namespace.is_empty()).then_some(namespace);
    let mut candidates: Vec<Repository> = kube
        .list_repositories(scope)
        .await?
        .into_iter()
        .filter(|r| r.name() == name)
        .collect();

    match candidates.len() {
        0 => Err(IncomingError::RepositoryNotFound {
            name: name.to_string(),
        }),
        1 => Ok(candidates.remove(0)),
        _ => Err(IncomingError::RepositoryNameConflict {
            name: name.to_string(),
        }),
    }
}

/// First rule with a target glob matching `branch`.
pub fn matching_rule<'a>(branch: &str, rules: &'a [Incoming]) -> Option<&'a Incoming> {
    rules
        .iter()
        .find(|rule| rule.targets.iter().any(|t| glob::matches(t, branch)))
}

/// Provider for the Repository's `git_provider.type`; an empty type means
/// a GitHub App installation.
pub fn provider_kind(repo: &Repository) -> Result<&'static str, IncomingError> {
    let type_ = repo
        .spec
        .git_provider
        .as_ref()
        .map(|g| g.type_.as_str())
        .unwrap_or_default();
    match type_ {
        "" | "github" => Ok("github"),
        "gitlab" => Ok("gitlab"),
        "gitea" | "forgejo" => Ok("gitea"),
        "bitbucket-cloud" => Ok("bitbucket-cloud"),
        "bitbucket-datacenter" | "bitbucket-server" => Ok("bitbucket-datacenter"),
        other => Err(IncomingError::UnsupportedProvider {
            type_: other.to_string(),
        }),
    }
}

/// Authenticates an incoming request and turns it into an event.
#[instrument(skip(kube, request))]
pub async fn resolve(
    kube: &dyn KubeClient,
    request: &WebhookRequest,
) -> Result<IncomingTrigger, IncomingError> {
    let payload = IncomingPayload::from_request(request)?;
    let repository = find_repository(kube, &payload.repository, &payload.namespace).await?;

    let rules = repository
        .spec
        .incoming
        .as_deref()
        .filter(|rules| !rules.is_empty())
        .ok_or_else(|| IncomingError::NotConfigured {
            repository: repository.name().to_string(),
        })?;
    let rule = matching_rule(&payload.branch, rules)
        .ok_or_else(|| IncomingError::NoMatchingRule {
            branch: payload.branch.clone(),
        })?
        .clone();

    verify_secret(kube, &repository, &rule, &payload.secret).await?;

    for name in payload.params.keys() {
        if !rule.params.contains(name) {
            return Err(IncomingError::ParamNotAllowed { name: name.clone() });
        }
    }

    let provider = provider_kind(&repository)?;
    let event = build_event(&repository, &payload, request);
    debug!(
        repository = %repository.name(),
        branch = %payload.branch,
        pipelinerun = %payload.pipelinerun,
        "Accepted incoming webhook"
    );

    Ok(IncomingTrigger {
        event,
        repository,
        rule,
        provider,
    })
}

async fn verify_secret(
    kube: &dyn KubeClient,
    repo: &Repository,
    rule: &Incoming,
    provided: &str,
) -> Result<(), IncomingError> {
    let key = if rule.secret.key.is_empty() {
        DEFAULT_SECRET_KEY
    } else {
        rule.secret.key.as_str()
    };
    let secret = kube
        .get_secret(repo.namespace(), &rule.secret.name)
        .await
        .map_err(|source| IncomingError::Secret {
            secret: rule.secret.name.clone(),
            source,
        })?;
    let expected = secret.value(key).unwrap_or_default();
    if expected.is_empty() {
        return Err(IncomingError::EmptySecret {
            secret: rule.secret.name.clone(),
            key: key.to_string(),
        });
    }

    if bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
        Ok(())
    } else {
        warn!(repository = %repo.name(), "Incoming webhook secret mismatch");
        Err(IncomingError::SecretMismatch)
    }
}

fn build_event(repo: &Repository, payload: &IncomingPayload, request: &WebhookRequest) -> Event {
    let mut event = Event::new(event_types::INCOMING, TriggerType::Push);
    event.target_pipeline_run = payload.pipelinerun.clone();
    event.head_branch = payload.branch.clone();
    event.base_branch = payload.branch.clone();
    event.url = repo.spec.url.clone();
    event.sender = INCOMING_SENDER.to_string();
    if let Some((org, name)) = org_repo_from_url(&repo.spec.url) {
        event.organization = org;
        event.repository = name;
    }

    // Credentials must not reach CEL or templates through `body`.
    let body = serde_json::json!({ "params": payload.params });
    let body = bytes::Bytes::from(body.to_string());
    event.headers = request.headers.clone();
    event.payload = body.clone();
    event.request = Some(IncomingRequest {
        headers: request.headers.clone(),
        payload: body,
    });
    event
}

#[cfg(test)]
#[path = "incoming_tests.rs"]
mod tests;
