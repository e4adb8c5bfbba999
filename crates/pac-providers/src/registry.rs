//! # Provider Registry
//!
//! Holds the provider integrations of a controller and routes each webhook
//! to the one that recognises it.

use pac_core::provider::{Detection, Provider, ProviderError, WebhookRequest};
use std::sync::Arc;
use tracing::debug;

use crate::bitbucket_cloud::BitbucketCloudProvider;
use crate::bitbucket_datacenter::BitbucketDataCenterProvider;
use crate::gitea::GiteaProvider;
use crate::github::{AppTokenSource, GitHubProvider};
use crate::gitlab::GitLabProvider;

/// Result of routing a webhook.
#[derive(Clone)]
pub struct Routed {
    pub provider: Arc<dyn Provider>,
    pub detection: Detection,
}

impl std::fmt::Debug for Routed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Routed")
            .field("provider", &self.provider.name())
            .field("detection", &self.detection)
            .finish()
    }
}

/// Ordered set of providers; the first one claiming a request wins.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every supported provider. GitHub App support is enabled when an
    /// app token source is given.
    pub fn with_defaults(app: Option<AppTokenSource>) -> Self {
        let github = match app {
            Some(source) => GitHubProvider::new().with_app(source),
            None => GitHubProvider::new(),
        };
        Self::new()
            .register(Arc::new(github))
            .register(Arc::new(GiteaProvider::new()))
            .register(Arc::new(GitLabProvider::new()))
            .register(Arc::new(BitbucketCloudProvider::new()))
            .register(Arc::new(BitbucketDataCenterProvider::new()))
    }

    /// Adds a provider. A provider with the same name is replaced.
    pub fn register(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.retain(|p| p.name() != provider.name());
        self.providers.push(provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    pub fn providers(&self) -> Vec<Arc<dyn Provider>> {
        self.providers.clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Finds the provider owning `request`.
    ///
    /// A provider that recognises the request but declines to process it
    /// still owns it: the returned detection carries the skip reason.
    /// `None` means no provider recognised the request at all.
    pub fn detect(&self, request: &WebhookRequest) -> Result<Option<Routed>, ProviderError> {
        for provider in &self.providers {
            let detection = provider.detect(request)?;
            if detection.matched || detection.skip_reason.is_some() {
                debug!(
                    provider = provider.name(),
                    matched = detection.matched,
                    "Webhook routed to provider"
                );
                return Ok(Some(Routed {
                    provider: Arc::clone(provider),
                    detection,
                }));
            }
        }
        Ok(None)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
