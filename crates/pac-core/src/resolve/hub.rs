//! # Hub Client
//!
//! Lookup of tasks published on a Tekton Hub compatible catalog.
//!
//! A resource reference is `name` or `name:version`. The hub API describes
//! the resource (latest version, or the requested one) and the YAML is then
//! downloaded from the version's raw URL.

use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::settings::HubCatalog;

/// Timeout of every hub request.
pub const HUB_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("could not fetch remote {kind} {resource}, hub API returned: {message}")]
    Api {
        kind: String,
        resource: String,
        message: String,
    },

    #[error("hub response for {kind} {resource} is missing a version")]
    MissingVersion { kind: String, resource: String },

    #[error("failed to create hub HTTP client: {message}")]
    Client { message: String },
}

impl HubError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Api { message, .. } if message.starts_with("transport"))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionData {
    #[serde(default)]
    version: String,
    #[serde(default, rename = "rawURL")]
    raw_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceData {
    #[serde(default)]
    latest_version: Option<VersionData>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Client for hub catalogs.
#[derive(Debug, Clone)]
pub struct HubClient {
    http: reqwest::Client,
}

impl HubClient {
    pub fn new() -> Result<Self, HubError> {
        let http = reqwest::Client::builder()
            .timeout(HUB_TIMEOUT)
            .user_agent("pipelines-as-code")
            .build()
            .map_err(|e| HubError::Client {
                message: e.to_string(),
            })?;
        Ok(Self { http })
    }

    /// Shares an existing HTTP client.
    pub fn with_http(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// YAML of `resource` (`name` or `name:version`) of `kind` in `catalog`.
    pub async fn get_resource(
        &self,
        catalog: &HubCatalog,
        resource: &str,
        kind: &str,
    ) -> Result<String, HubError> {
        let api_error = |message: String| HubError::Api {
            kind: kind.to_string(),
            resource: resource.to_string(),
            message,
        };

        let raw_url = match resource.rsplit_once(':') {
            Some((name, version)) => {
                let url = format!(
                    "{}/resource/{}/{}/{}/{}",
                    catalog.url, catalog.name, kind, name, version
                );
                let body = self.get(&url).await.map_err(api_error)?;
                let envelope: Envelope<VersionData> = serde_json::from_str(&body)
                    .map_err(|e| api_error(format!("invalid response: {}", e)))?;
                if envelope.data.raw_url.is_empty() {
                    format!("{}/raw", url)
                } else {
                    envelope.data.raw_url
                }
            }
            None => {
                let url = format!(
                    "{}/resource/{}/{}/{}",
                    catalog.url, catalog.name, kind, resource
                );
                let body = self.get(&url).await.map_err(api_error)?;
                let envelope: Envelope<ResourceData> = serde_json::from_str(&body)
                    .map_err(|e| api_error(format!("invalid response: {}", e)))?;
                let latest = envelope
                    .data
                    .latest_version
                    .ok_or_else(|| HubError::MissingVersion {
                        kind: kind.to_string(),
                        resource: resource.to_string(),
                    })?;
                if !latest.raw_url.is_empty() {
                    latest.raw_url
                } else if !latest.version.is_empty() {
                    format!("{}/{}/raw", url, latest.version)
                } else {
                    return Err(HubError::MissingVersion {
                        kind: kind.to_string(),
                        resource: resource.to_string(),
                    });
                }
            }
        };

        debug!(catalog = %catalog.id, raw_url = %raw_url, "Downloading hub resource");
        let data = self.get(&raw_url).await.map_err(api_error)?;
        info!(
            catalog = %catalog.id,
            hub_url = %catalog.url,
            resource = %resource,
            "Fetched {} from hub", kind
        );
        Ok(data)
    }

    async fn get(&self, url: &str) -> Result<String, String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| format!("transport error: {}", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("{} returned {}", url, status));
        }
        response
            .text()
            .await
            .map_err(|e| format!("transport error: {}", e))
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
