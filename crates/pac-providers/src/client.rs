//! # REST Client
//!
//! Thin JSON-over-HTTP client shared by the provider integrations.
//!
//! Each call builds its request against a base URL with the credentials
//! bound to the event, maps non-success responses to [`ProviderError`] and
//! follows `Link: rel="next"` headers for list endpoints.

use pac_core::provider::ProviderError;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, LINK, USER_AGENT};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// User agent sent with every API call.
pub const DEFAULT_USER_AGENT: &str = "pipelines-as-code";

/// Request timeout for provider API calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on followed `next` links.
const MAX_PAGES: usize = 20;

/// How a request authenticates.
#[derive(Clone, Default)]
pub enum Auth {
    #[default]
    None,
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// `Authorization: token <token>`, used by Gitea.
    Token(String),
    /// A custom header carrying the token, e.g. GitLab's `PRIVATE-TOKEN`.
    Header { name: &'static str, value: String },
    /// HTTP basic authentication.
    Basic { user: String, password: String },
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::None => "None",
            Self::Bearer(_) => "Bearer(<REDACTED>)",
            Self::Token(_) => "Token(<REDACTED>)",
            Self::Header { .. } => "Header(<REDACTED>)",
            Self::Basic { .. } => "Basic(<REDACTED>)",
        };
        f.write_str(kind)
    }
}

/// JSON client bound to one API base URL and one set of credentials.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    auth: Auth,
    accept: &'static str,
}

impl ApiClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, auth: Auth) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            accept: "application/json",
        }
    }

    /// Overrides the `Accept` header.
    pub fn with_accept(mut self, accept: &'static str) -> Self {
        self.accept = accept;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for `path`; absolute inputs are kept as they are.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, self.url(path))
            .header(USER_AGENT, DEFAULT_USER_AGENT)
            .header(ACCEPT, self.accept)
            .timeout(DEFAULT_TIMEOUT);
        match &self.auth {
            Auth::None => builder,
            Auth::Bearer(token) => builder.header(AUTHORIZATION, format!("Bearer {}", token)),
            Auth::Token(token) => builder.header(AUTHORIZATION, format!("token {}", token)),
            Auth::Header { name, value } => builder.header(*name, value.as_str()),
            Auth::Basic { user, password } => builder.basic_auth(user, Some(password)),
        }
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response, ProviderError> {
        let response = builder.send().await.map_err(|e| ProviderError::Transport {
            message: format!("{}: {}", what, e),
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unable to read error body".to_string());
        debug!(status = status.as_u16(), request = %what, "Provider API call failed");
        Err(ProviderError::from_status(
            status.as_u16(),
            format!("{}: {}", what, body.trim()),
        ))
    }

    async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, ProviderError> {
        response.json::<T>().await.map_err(|e| ProviderError::InvalidPayload {
            message: format!("cannot decode response of {}: {}", what, e),
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let what = format!("GET {}", path);
        let response = self.send(self.request(Method::GET, path), &what).await?;
        Self::decode(response, &what).await
    }

    pub async fn get_json_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let what = format!("GET {}", path);
        let response = self
            .send(self.request(Method::GET, path).query(query), &what)
            .await?;
        Self::decode(response, &what).await
    }

    pub async fn get_text(&self, path: &str) -> Result<String, ProviderError> {
        let what = format!("GET {}", path);
        let response = self.send(self.request(Method::GET, path), &what).await?;
        response.text().await.map_err(|e| ProviderError::Transport {
            message: format!("{}: {}", what, e),
        })
    }

    /// Every page of a list endpoint, following `Link` headers.
    pub async fn get_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ProviderError> {
        let mut items = Vec::new();
        let mut next = Some(path.to_string());
        let mut pages = 0;
        while let Some(current) = next.take() {
            let what = format!("GET {}", current);
            let response = self
                .send(self.request(Method::GET, &current), &what)
                .await?;
            next = next_link(response.headers());
            let mut page: Vec<T> = Self::decode(response, &what).await?;
            items.append(&mut page);
            pages += 1;
            if pages >= MAX_PAGES {
                break;
            }
        }
        Ok(items)
    }

    pub async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, ProviderError> {
        let what = format!("{} {}", method, path);
        let response = self
            .send(self.request(method, path).json(body), &what)
            .await?;
        Self::decode(response, &what).await
    }

    /// Sends a JSON body and ignores the response body.
    pub async fn send_json_unit<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<(), ProviderError> {
        let what = format!("{} {}", method, path);
        self.send(self.request(method, path).json(body), &what)
            .await
            .map(|_| ())
    }

    /// Membership style probe: `true` on 2xx, `false` on 404.
    pub async fn exists(&self, path: &str) -> Result<bool, ProviderError> {
        let what = format!("GET {}", path);
        match self.send(self.request(Method::GET, path), &what).await {
            Ok(_) => Ok(true),
            Err(ProviderError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn delete(&self, path: &str) -> Result<(), ProviderError> {
        let what = format!("DELETE {}", path);
        self.send(self.request(Method::DELETE, path), &what)
            .await
            .map(|_| ())
    }
}

/// Target of the `rel="next"` entry of a `Link` header.
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| p.trim() == "rel=\"next\"");
        if is_next {
            Some(target.trim_start_matches('<').trim_end_matches('>').to_string())
        } else {
            None
        }
    })
}

/// Builds the shared HTTP client used by all providers.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
