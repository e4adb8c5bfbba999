//! # Secrets
//!
//! Binding of provider credentials to an event, and the short-lived git
//! auth secrets handed to PipelineRuns.
//!
//! Credential lookup happens before the Repository is merged with the
//! global one: the namespace of a secret follows the Repository that
//! declares it. GitHub App installs read their webhook secret from the
//! controller's own secret instead of the Repository.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

use crate::event::{event_types, Event};
use crate::formatting::{clean_label_value, random_suffix};
use crate::keys;
use crate::kube::{emit_repository_event, KubeClient, KubeError, LabelSelector, MAX_CONFLICT_RETRIES};
use crate::provider::{Provider, ProviderError};
use crate::repository::{Repository, RepositorySpec};
use crate::resources::{EventSeverity, ObjectMeta, OwnerReference, Secret};
use crate::settings::Settings;
use crate::SecretValue;

/// Key of the API token when the Repository does not name one.
pub const DEFAULT_PROVIDER_TOKEN_KEY: &str = "provider.token";

/// Key of the webhook secret when the Repository does not name one.
pub const DEFAULT_WEBHOOK_SECRET_KEY: &str = "webhook.secret";

/// User written into git credentials when the provider has none.
pub const DEFAULT_GIT_USER: &str = "git";

/// Name prefix of auto-created git auth secrets.
pub const GIT_AUTH_SECRET_PREFIX: &str = "pac-gitauth-";

/// Age after which an unowned git auth secret is considered stale.
pub const STALE_SECRET_AGE_MINUTES: i64 = 10;

const SECRET_URL_ANNOTATION: &str = "pipelinesascode.tekton.dev/url";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("cannot get secret {namespace}/{name}: {source}")]
    Lookup {
        namespace: String,
        name: String,
        #[source]
        source: KubeError,
    },

    #[error("could not validate payload, check your webhook secret?: {0}")]
    Validation(#[source] ProviderError),

    #[error("failed to set client: {0}")]
    Client(#[source] ProviderError),

    #[error("cannot parse url {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("cannot create git auth secret {name}: {source}")]
    Create {
        name: String,
        #[source]
        source: KubeError,
    },

    #[error("kubernetes error: {0}")]
    Kube(#[from] KubeError),
}

impl SecretError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Lookup { source, .. } | Self::Create { source, .. } => source.is_transient(),
            Self::Kube(e) => e.is_transient(),
            Self::Client(e) => e.is_transient(),
            Self::Validation(_) | Self::InvalidUrl { .. } => false,
        }
    }

    pub fn error_category(&self) -> crate::ErrorCategory {
        match self {
            Self::Validation(_) => crate::ErrorCategory::Security,
            Self::Client(e) => e.error_category(),
            Self::Lookup { source, .. } if source.is_not_found() => {
                crate::ErrorCategory::Configuration
            }
            Self::Lookup { source, .. } | Self::Create { source, .. } => source.error_category(),
            Self::Kube(e) => e.error_category(),
            Self::InvalidUrl { .. } => crate::ErrorCategory::Permanent,
        }
    }
}

// ============================================================================
// Authenticated client setup
// ============================================================================

/// Where the controller keeps its own credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSecret {
    pub namespace: String,
    pub name: String,
}

/// Namespace that holds the provider secret of `repo`.
///
/// A Repository that does not name a secret borrows the global one, and
/// with it the global Repository's namespace.
pub fn secret_namespace(repo: &Repository, global: Option<&Repository>) -> String {
    let local_has_secret = repo
        .spec
        .git_provider
        .as_ref()
        .is_some_and(|gp| gp.secret.is_some());
    match global {
        Some(g)
            if !local_has_secret
                && g.spec
                    .git_provider
                    .as_ref()
                    .is_some_and(|gp| gp.secret.is_some()) =>
        {
            g.namespace().to_string()
        }
        _ => repo.namespace().to_string(),
    }
}

/// Binds credentials to `event`, validates the payload and hands the
/// event to the provider client.
///
/// Returns the Repository with the global spec merged in. Calling it twice
/// with the same inputs binds the same credentials.
#[instrument(skip_all, fields(repository = %repo.name(), event_type = %event.event_type))]
pub async fn setup_authenticated_client(
    kube: &dyn KubeClient,
    provider: &dyn Provider,
    settings: &Settings,
    controller: &ControllerSecret,
    event: &mut Event,
    repo: &Repository,
    global: Option<&Repository>,
) -> Result<Repository, SecretError> {
    let merged = bind_credentials(kube, controller, event, repo, global).await?;

    if event.event_type != event_types::INCOMING {
        if let Err(e) = provider.validate(event) {
            let dirty = event
                .provider
                .webhook_secret
                .as_ref()
                .is_some_and(SecretValue::has_trailing_whitespace);
            if dirty {
                let message = "we have failed to validate the payload with the webhook secret,\n\
                    it seems that we have detected a \\n or a space at the end of your webhook secret,\n\
                    is that what you want? make sure you use -n when generating the secret, eg: echo -n secret|base64";
                warn!(repository = %repo.name(), "Webhook secret ends with whitespace");
                emit_repository_event(
                    kube,
                    repo,
                    EventSeverity::Warning,
                    "RepositorySecretValidation",
                    message,
                )
                .await;
            }
            return Err(SecretError::Validation(e));
        }
    }

    provider
        .set_client(event, &merged, settings)
        .await
        .map_err(SecretError::Client)?;
    Ok(merged)
}

/// Reads the token and webhook secret for `event` without validating the
/// payload. Returns the Repository with the global spec merged in.
///
/// Used directly when acting on a run long after its webhook was handled.
pub async fn bind_credentials(
    kube: &dyn KubeClient,
    controller: &ControllerSecret,
    event: &mut Event,
    repo: &Repository,
    global: Option<&Repository>,
) -> Result<Repository, SecretError> {
    let secret_ns = secret_namespace(repo, global);
    let mut merged = repo.clone();
    if let Some(g) = global {
        merged.spec = RepositorySpec::merge(&repo.spec, &g.spec);
    }

    if event.installation_id.unwrap_or(0) > 0 {
        match controller_webhook_secret(kube, controller).await {
            Ok(secret) if !secret.is_empty() => {
                event.provider.webhook_secret = Some(SecretValue::from_string(secret));
            }
            Ok(_) => debug!("Controller webhook secret is empty"),
            Err(e) => warn!(error = %e, "Cannot read controller webhook secret"),
        }
    } else {
        secret_from_repository(kube, event, &merged, &secret_ns).await?;
    }
    Ok(merged)
}

/// Webhook secret of GitHub App installs, surrounding whitespace removed.
async fn controller_webhook_secret(
    kube: &dyn KubeClient,
    controller: &ControllerSecret,
) -> Result<String, SecretError> {
    let secret = kube
        .get_secret(&controller.namespace, &controller.name)
        .await
        .map_err(|source| SecretError::Lookup {
            namespace: controller.namespace.clone(),
            name: controller.name.clone(),
            source,
        })?;
    Ok(secret
        .value(DEFAULT_WEBHOOK_SECRET_KEY)
        .map(|s| s.trim().to_string())
        .unwrap_or_default())
}

/// Reads token and webhook secret named by the Repository's git provider.
async fn secret_from_repository(
    kube: &dyn KubeClient,
    event: &mut Event,
    repo: &Repository,
    namespace: &str,
) -> Result<(), SecretError> {
    let Some(git_provider) = repo.spec.git_provider.as_ref() else {
        debug!(repository = %repo.name(), "Repository has no git provider configuration");
        return Ok(());
    };
    if !git_provider.url.is_empty() {
        event.provider.url = git_provider.url.clone();
    }
    let Some(secret_ref) = git_provider.secret.as_ref() else {
        return Ok(());
    };

    let token_key = non_empty_or(&secret_ref.key, DEFAULT_PROVIDER_TOKEN_KEY);
    let token = read_secret_key(kube, namespace, &secret_ref.name, token_key).await?;
    if token.is_empty() {
        return Ok(());
    }
    event.provider.token = Some(SecretValue::from_string(token));
    event.provider.user = git_provider.user.clone();

    let Some(webhook_ref) = git_provider.webhook_secret.as_ref() else {
        return Ok(());
    };
    let webhook_key = non_empty_or(&webhook_ref.key, DEFAULT_WEBHOOK_SECRET_KEY);
    let webhook_secret = read_secret_key(kube, namespace, &webhook_ref.name, webhook_key).await?;
    if !webhook_secret.is_empty() {
        event.provider.webhook_secret = Some(SecretValue::from_string(webhook_secret));
    }

    info!(
        apiurl = %git_provider.url,
        user = %git_provider.user,
        token_secret = %secret_ref.name,
        token_key = %token_key,
        webhook_secret = %webhook_ref.name,
        "Using git provider credentials from repository"
    );
    Ok(())
}

fn non_empty_or<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() {
        default
    } else {
        value
    }
}

async fn read_secret_key(
    kube: &dyn KubeClient,
    namespace: &str,
    name: &str,
    key: &str,
) -> Result<String, SecretError> {
    let secret = kube
        .get_secret(namespace, name)
        .await
        .map_err(|source| SecretError::Lookup {
            namespace: namespace.to_string(),
            name: name.to_string(),
            source,
        })?;
    Ok(secret.value(key).unwrap_or_default())
}

// ============================================================================
// Git auth secrets
// ============================================================================

/// Fresh git auth secret name, `pac-gitauth-` and six random characters.
pub fn git_auth_secret_name() -> String {
    format!("{}{}", GIT_AUTH_SECRET_PREFIX, random_suffix(6))
}

/// Builds the basic-auth secret used by git-clone steps.
pub fn make_git_auth_secret(
    event: &Event,
    namespace: &str,
    name: &str,
) -> Result<Secret, SecretError> {
    let clone_url = if event.clone_url.is_empty() {
        event.url.as_str()
    } else {
        event.clone_url.as_str()
    };
    let parsed = url::Url::parse(clone_url).map_err(|e| SecretError::InvalidUrl {
        url: clone_url.to_string(),
        message: e.to_string(),
    })?;
    let host = match parsed.port() {
        Some(port) => format!("{}:{}", parsed.host_str().unwrap_or_default(), port),
        None => parsed.host_str().unwrap_or_default().to_string(),
    };

    let user = non_empty_or(&event.provider.user, DEFAULT_GIT_USER);
    let raw_token = event
        .provider
        .token
        .as_ref()
        .map(|t| t.expose_secret().to_string())
        .unwrap_or_default();
    let token: String = url::form_urlencoded::byte_serialize(raw_token.as_bytes()).collect();

    let base_url = format!("{}://{}", parsed.scheme(), host);
    let mut data = BTreeMap::new();
    data.insert(
        ".gitconfig".to_string(),
        format!("\n\t[credential \"{}\"]\n\thelper=store\n\t", base_url),
    );
    data.insert(
        ".git-credentials".to_string(),
        format!("{}://{}:{}@{}{}", parsed.scheme(), user, token, host, parsed.path()),
    );
    data.insert("git-provider-token".to_string(), token);

    let mut meta = ObjectMeta::named(namespace, name);
    meta.labels
        .insert(keys::MANAGED_BY.to_string(), keys::MANAGED_BY_VALUE.to_string());
    meta.labels
        .insert(keys::URL_ORG.to_string(), clean_label_value(&event.organization));
    meta.labels.insert(
        keys::URL_REPOSITORY.to_string(),
        clean_label_value(&event.repository),
    );
    meta.annotations
        .insert(SECRET_URL_ANNOTATION.to_string(), clone_url.to_string());
    meta.annotations
        .insert(keys::SHA.to_string(), event.sha.clone());
    meta.annotations
        .insert(keys::URL_ORG.to_string(), event.organization.clone());
    meta.annotations
        .insert(keys::URL_REPOSITORY.to_string(), event.repository.clone());

    Ok(Secret::new(meta, data))
}

/// Creates the git auth secret for `event` in `namespace` and returns its
/// name. An existing secret of the same name is kept.
#[instrument(skip_all, fields(namespace = %namespace))]
pub async fn create_git_auth_secret(
    kube: &dyn KubeClient,
    event: &Event,
    namespace: &str,
    name: &str,
) -> Result<String, SecretError> {
    let secret = make_git_auth_secret(event, namespace, name)?;
    match kube.create_secret(&secret).await {
        Ok(_) => {
            info!(secret = %name, namespace = %namespace, "Secret has been generated");
            Ok(name.to_string())
        }
        Err(e) if e.is_already_exists() => {
            warn!(secret = %name, namespace = %namespace, "Secret already exists, reusing it");
            Ok(name.to_string())
        }
        Err(source) => Err(SecretError::Create {
            name: name.to_string(),
            source,
        }),
    }
}

/// Deletes a git auth secret; a missing secret is not an error.
pub async fn delete_git_auth_secret(
    kube: &dyn KubeClient,
    namespace: &str,
    name: &str,
) -> Result<(), SecretError> {
    match kube.delete_secret(namespace, name).await {
        Ok(()) => {
            info!(secret = %name, namespace = %namespace, "Secret has been deleted");
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(SecretError::Kube(e)),
    }
}

/// Makes the PipelineRun the owner of its git auth secret so both are
/// garbage-collected together.
pub async fn set_owner_reference(
    kube: &dyn KubeClient,
    namespace: &str,
    name: &str,
    owner: &crate::tekton::PipelineRun,
) -> Result<(), SecretError> {
    let reference = OwnerReference {
        api_version: owner.api_version.clone(),
        kind: "PipelineRun".to_string(),
        name: owner.metadata.name.clone(),
        uid: owner.metadata.uid.clone(),
    };

    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut secret = kube.get_secret(namespace, name).await?;
        secret.metadata.owner_references = vec![reference.clone()];
        match kube.update_secret(&secret).await {
            Ok(_) => {
                debug!(secret = %name, pipelinerun = %owner.metadata.name, "Set secret owner");
                return Ok(());
            }
            Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => continue,
            Err(e) => return Err(SecretError::Kube(e)),
        }
    }
}

/// Deletes git auth secrets in `namespace` that no PipelineRun owns and
/// that are older than `max_age`. Returns the deleted names.
pub async fn sweep_stale_git_auth_secrets(
    kube: &dyn KubeClient,
    namespace: &str,
    max_age: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<String>, SecretError> {
    let selector = LabelSelector::new().equals(keys::MANAGED_BY, keys::MANAGED_BY_VALUE);
    let secrets = kube.list_secrets(namespace, &selector).await?;

    let mut deleted = Vec::new();
    for secret in secrets {
        let meta = &secret.metadata;
        if !meta.name.starts_with(GIT_AUTH_SECRET_PREFIX) || !meta.owner_references.is_empty() {
            continue;
        }
        let Some(created) = meta.creation_timestamp else {
            continue;
        };
        if now - created < max_age {
            continue;
        }
        match kube.delete_secret(namespace, &meta.name).await {
            Ok(()) => {
                info!(secret = %meta.name, namespace = %namespace, "Deleted stale git auth secret");
                deleted.push(meta.name.clone());
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(secret = %meta.name, error = %e, "Failed to delete stale git auth secret"),
        }
    }
    Ok(deleted)
}

#[cfg(test)]
#[path = "secrets_tests.rs"]
mod tests;
