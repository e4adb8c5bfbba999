//! # GitHub App Authentication
//!
//! RS256 JWT generation and installation token exchange.
//!
//! The application id and private key live in the controller secret under
//! `github-application-id` and `github-private-key`; they are read for each
//! event so a rotated key is picked up without a restart.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use pac_core::kube::KubeClient;
use pac_core::provider::ProviderError;
use pac_core::secrets::ControllerSecret;
use pac_core::SecretValue;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::client::{ApiClient, Auth};

pub const APPLICATION_ID_KEY: &str = "github-application-id";
pub const PRIVATE_KEY_KEY: &str = "github-private-key";

/// GitHub rejects JWTs valid for more than ten minutes.
const JWT_LIFETIME_MINUTES: i64 = 10;

/// Backdating of `iat` against clock drift.
const JWT_CLOCK_DRIFT_SECONDS: i64 = 60;

/// Identity of the GitHub App.
#[derive(Debug, Clone)]
pub struct AppCredentials {
    pub app_id: i64,
    pub private_key: SecretValue,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct JwtClaims {
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// Signs an app JWT valid from `now` (backdated) for ten minutes.
pub fn generate_jwt(credentials: &AppCredentials, now: DateTime<Utc>) -> Result<String, ProviderError> {
    let claims = JwtClaims {
        iat: (now - Duration::seconds(JWT_CLOCK_DRIFT_SECONDS)).timestamp(),
        exp: (now + Duration::minutes(JWT_LIFETIME_MINUTES) - Duration::seconds(JWT_CLOCK_DRIFT_SECONDS))
            .timestamp(),
        iss: credentials.app_id.to_string(),
    };
    let key = EncodingKey::from_rsa_pem(credentials.private_key.expose_secret().as_bytes())
        .map_err(|e| ProviderError::Configuration {
            message: format!("invalid GitHub App private key: {}", e),
        })?;
    encode(&Header::new(Algorithm::RS256), &claims, &key).map_err(|e| {
        ProviderError::Authentication {
            message: format!("failed to sign GitHub App JWT: {}", e),
        }
    })
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    #[serde(skip_serializing_if = "<[i64]>::is_empty")]
    repository_ids: &'a [i64],
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// Loads app credentials from the controller secret.
#[derive(Clone)]
pub struct AppTokenSource {
    kube: Arc<dyn KubeClient>,
    secret: ControllerSecret,
}

impl AppTokenSource {
    pub fn new(kube: Arc<dyn KubeClient>, secret: ControllerSecret) -> Self {
        Self { kube, secret }
    }

    pub async fn credentials(&self) -> Result<AppCredentials, ProviderError> {
        let secret = self
            .kube
            .get_secret(&self.secret.namespace, &self.secret.name)
            .await
            .map_err(|e| ProviderError::Configuration {
                message: format!(
                    "cannot read GitHub App secret {}/{}: {}",
                    self.secret.namespace, self.secret.name, e
                ),
            })?;
        let app_id = secret
            .value(APPLICATION_ID_KEY)
            .unwrap_or_default()
            .trim()
            .parse::<i64>()
            .map_err(|e| ProviderError::Configuration {
                message: format!("could not parse the github application_id number from secret: {}", e),
            })?;
        let private_key = secret.value(PRIVATE_KEY_KEY).unwrap_or_default();
        if private_key.is_empty() {
            return Err(ProviderError::Configuration {
                message: format!("secret {} has no {} key", self.secret.name, PRIVATE_KEY_KEY),
            });
        }
        Ok(AppCredentials {
            app_id,
            private_key: SecretValue::from_string(private_key),
        })
    }

    /// Exchanges the installation id for a token, optionally limited to
    /// `repository_ids`.
    #[instrument(skip(self, http), fields(installation_id = installation_id))]
    pub async fn installation_token(
        &self,
        http: &reqwest::Client,
        api_url: &str,
        installation_id: i64,
        repository_ids: &[i64],
    ) -> Result<SecretValue, ProviderError> {
        let credentials = self.credentials().await?;
        let jwt = generate_jwt(&credentials, Utc::now())?;
        let client = ApiClient::new(http.clone(), api_url, Auth::Bearer(jwt))
            .with_accept("application/vnd.github+json");

        let response: TokenResponse = client
            .send_json(
                Method::POST,
                &format!("/app/installations/{}/access_tokens", installation_id),
                &TokenRequest { repository_ids },
            )
            .await?;
        debug!(scoped_repositories = repository_ids.len(), "Installation token issued");
        Ok(SecretValue::from_string(response.token))
    }
}

#[cfg(test)]
#[path = "app_tests.rs"]
mod tests;
