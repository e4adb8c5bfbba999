//! # Kubernetes REST Client
//!
//! [`KubeClient`] over the Kubernetes REST API using `reqwest`.
//!
//! Only the endpoints the controller needs are implemented. Authentication
//! uses a bearer token, normally the in-cluster service account token.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::path::Path;
use tracing::{debug, instrument};

use super::{KubeClient, KubeError, LabelSelector};
use crate::keys;
use crate::repository::Repository;
use crate::resources::{ConfigMap, EventSeverity, RepositoryEvent, Secret};
use crate::tekton::{PipelineRun, TaskRun};
use crate::SecretValue;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const REPOSITORY_API: &str = "/apis/pipelinesascode.tekton.dev/v1alpha1";
const TEKTON_API: &str = "/apis/tekton.dev/v1";
const CORE_API: &str = "/api/v1";

/// Connection settings for [`HttpKubeClient`].
#[derive(Clone)]
pub struct KubeHttpConfig {
    /// API server base URL, e.g. `https://kubernetes.default.svc`.
    pub api_url: String,
    pub token: Option<SecretValue>,
    /// PEM bundle of the API server CA.
    pub ca_cert_pem: Option<Vec<u8>>,
}

impl fmt::Debug for KubeHttpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeHttpConfig")
            .field("api_url", &self.api_url)
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .field("ca_cert_pem", &self.ca_cert_pem.as_ref().map(|c| c.len()))
            .finish()
    }
}

impl KubeHttpConfig {
    /// Builds the configuration from the in-cluster service account.
    ///
    /// `api_url` and `token_file` override the defaults when non-empty.
    pub fn in_cluster(api_url: &str, token_file: &str) -> Result<Self, KubeError> {
        let api_url = if api_url.is_empty() {
            let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
                KubeError::Invalid {
                    message: "KUBERNETES_SERVICE_HOST is not set".to_string(),
                }
            })?;
            let port =
                std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
            format!("https://{}:{}", host, port)
        } else {
            api_url.trim_end_matches('/').to_string()
        };

        let token_path = if token_file.is_empty() {
            Path::new(SERVICE_ACCOUNT_DIR).join("token")
        } else {
            Path::new(token_file).to_path_buf()
        };
        let token = std::fs::read_to_string(&token_path)
            .ok()
            .map(|t| SecretValue::from_string(t.trim().to_string()));
        let ca_cert_pem = std::fs::read(Path::new(SERVICE_ACCOUNT_DIR).join("ca.crt")).ok();

        Ok(Self {
            api_url,
            token,
            ca_cert_pem,
        })
    }
}

#[derive(Deserialize)]
struct List<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ObjectReference<'a> {
    api_version: &'a str,
    kind: &'a str,
    namespace: &'a str,
    name: &'a str,
}

/// REST implementation of [`KubeClient`].
pub struct HttpKubeClient {
    http: reqwest::Client,
    config: KubeHttpConfig,
}

impl HttpKubeClient {
    pub fn new(config: KubeHttpConfig) -> Result<Self, KubeError> {
        let mut builder = reqwest::Client::builder().user_agent("pipelines-as-code");
        if let Some(pem) = &config.ca_cert_pem {
            let cert = reqwest::Certificate::from_pem(pem).map_err(|e| KubeError::Invalid {
                message: format!("invalid CA certificate: {}", e),
            })?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder.build().map_err(|e| KubeError::Transport {
            message: e.to_string(),
        })?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url, path)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match &self.config.token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<reqwest::Response, KubeError> {
        let response = builder.send().await.map_err(|e| KubeError::Transport {
            message: e.to_string(),
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(status = %status, kind = %kind, name = %name, "Kubernetes API error");
        Err(match status {
            StatusCode::NOT_FOUND => KubeError::not_found(kind, namespace, name),
            StatusCode::CONFLICT if body.contains("AlreadyExists") => {
                KubeError::already_exists(kind, namespace, name)
            }
            StatusCode::CONFLICT => KubeError::conflict(kind, namespace, name),
            StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => {
                KubeError::Invalid { message: body }
            }
            _ => KubeError::Transport {
                message: format!("{}: {}", status, body),
            },
        })
    }

    async fn json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, KubeError> {
        response.json::<T>().await.map_err(|e| KubeError::Invalid {
            message: format!("cannot decode API response: {}", e),
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<T, KubeError> {
        let response = self
            .send(self.request(Method::GET, path), kind, namespace, name)
            .await?;
        Self::json(response).await
    }

    async fn list<T: DeserializeOwned>(
        &self,
        path: &str,
        selector: &LabelSelector,
        kind: &str,
    ) -> Result<Vec<T>, KubeError> {
        let mut builder = self.request(Method::GET, path);
        if !selector.is_empty() {
            builder = builder.query(&[("labelSelector", selector.to_query_string())]);
        }
        let response = self.send(builder, kind, "", "").await?;
        Ok(Self::json::<List<T>>(response).await?.items)
    }

    async fn write<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<T, KubeError> {
        let response = self
            .send(self.request(method, path).json(body), kind, namespace, name)
            .await?;
        Self::json(response).await
    }

    async fn delete(&self, path: &str, kind: &str, namespace: &str, name: &str) -> Result<(), KubeError> {
        self.send(self.request(Method::DELETE, path), kind, namespace, name)
            .await?;
        Ok(())
    }
}

fn repositories_path(namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("{}/namespaces/{}/repositories", REPOSITORY_API, ns),
        None => format!("{}/repositories", REPOSITORY_API),
    }
}

fn pipeline_runs_path(namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("{}/namespaces/{}/pipelineruns", TEKTON_API, ns),
        None => format!("{}/pipelineruns", TEKTON_API),
    }
}

fn core_path(namespace: &str, resource: &str) -> String {
    format!("{}/namespaces/{}/{}", CORE_API, namespace, resource)
}

#[async_trait]
impl KubeClient for HttpKubeClient {
    async fn list_repositories(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<Repository>, KubeError> {
        self.list(&repositories_path(namespace), &LabelSelector::new(), "Repository")
            .await
    }

    async fn get_repository(&self, namespace: &str, name: &str) -> Result<Repository, KubeError> {
        let path = format!("{}/{}", repositories_path(Some(namespace)), name);
        self.get(&path, "Repository", namespace, name).await
    }

    #[instrument(skip(self, repo), fields(repository = %repo.name()))]
    async fn update_repository(&self, repo: &Repository) -> Result<Repository, KubeError> {
        let path = format!("{}/{}", repositories_path(Some(repo.namespace())), repo.name());
        self.write(Method::PUT, &path, repo, "Repository", repo.namespace(), repo.name())
            .await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, KubeError> {
        let path = format!("{}/{}", core_path(namespace, "secrets"), name);
        self.get(&path, "Secret", namespace, name).await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, KubeError> {
        let ns = &secret.metadata.namespace;
        self.write(
            Method::POST,
            &core_path(ns, "secrets"),
            secret,
            "Secret",
            ns,
            &secret.metadata.name,
        )
        .await
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret, KubeError> {
        let ns = &secret.metadata.namespace;
        let path = format!("{}/{}", core_path(ns, "secrets"), secret.metadata.name);
        self.write(Method::PUT, &path, secret, "Secret", ns, &secret.metadata.name)
            .await
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), KubeError> {
        let path = format!("{}/{}", core_path(namespace, "secrets"), name);
        self.delete(&path, "Secret", namespace, name).await
    }

    async fn list_secrets(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Secret>, KubeError> {
        self.list(&core_path(namespace, "secrets"), selector, "Secret")
            .await
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, KubeError> {
        let path = format!("{}/{}", core_path(namespace, "configmaps"), name);
        self.get(&path, "ConfigMap", namespace, name).await
    }

    async fn create_pipeline_run(&self, pr: &PipelineRun) -> Result<PipelineRun, KubeError> {
        let ns = &pr.metadata.namespace;
        let name = if pr.metadata.name.is_empty() {
            &pr.metadata.generate_name
        } else {
            &pr.metadata.name
        };
        self.write(
            Method::POST,
            &pipeline_runs_path(Some(ns)),
            pr,
            "PipelineRun",
            ns,
            name,
        )
        .await
    }

    async fn get_pipeline_run(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PipelineRun, KubeError> {
        let path = format!("{}/{}", pipeline_runs_path(Some(namespace)), name);
        self.get(&path, "PipelineRun", namespace, name).await
    }

    async fn list_pipeline_runs(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<PipelineRun>, KubeError> {
        self.list(&pipeline_runs_path(namespace), selector, "PipelineRun")
            .await
    }

    async fn patch_pipeline_run(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<PipelineRun, KubeError> {
        let path = format!("{}/{}", pipeline_runs_path(Some(namespace)), name);
        let builder = self
            .request(Method::PATCH, &path)
            .header("Content-Type", "application/merge-patch+json")
            .body(patch.to_string());
        let response = self.send(builder, "PipelineRun", namespace, name).await?;
        Self::json(response).await
    }

    async fn delete_pipeline_run(&self, namespace: &str, name: &str) -> Result<(), KubeError> {
        let path = format!("{}/{}", pipeline_runs_path(Some(namespace)), name);
        self.delete(&path, "PipelineRun", namespace, name).await
    }

    async fn list_task_runs(
        &self,
        namespace: &str,
        pipeline_run: &str,
    ) -> Result<Vec<TaskRun>, KubeError> {
        let path = format!("{}/namespaces/{}/taskruns", TEKTON_API, namespace);
        let selector = LabelSelector::new().equals(keys::TEKTON_PIPELINE_RUN, pipeline_run);
        self.list(&path, &selector, "TaskRun").await
    }

    async fn get_pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        tail_lines: Option<usize>,
    ) -> Result<String, KubeError> {
        let path = format!("{}/{}/log", core_path(namespace, "pods"), pod);
        let mut builder = self
            .request(Method::GET, &path)
            .query(&[("container", container)]);
        if let Some(n) = tail_lines {
            builder = builder.query(&[("tailLines", n.to_string())]);
        }
        let response = self.send(builder, "Pod", namespace, pod).await?;
        response.text().await.map_err(|e| KubeError::Transport {
            message: e.to_string(),
        })
    }

    async fn emit_event(&self, event: &RepositoryEvent) -> Result<(), KubeError> {
        let now = Utc::now();
        let body = json!({
            "apiVersion": "v1",
            "kind": "Event",
            "metadata": {
                "generateName": format!("{}.", event.repository),
                "namespace": event.namespace,
            },
            "involvedObject": ObjectReference {
                api_version: keys::REPOSITORY_API_VERSION,
                kind: "Repository",
                namespace: &event.namespace,
                name: &event.repository,
            },
            "type": match event.severity {
                EventSeverity::Normal => "Normal",
                EventSeverity::Warning => "Warning",
            },
            "reason": event.reason,
            "message": event.message,
            "firstTimestamp": now,
            "lastTimestamp": now,
            "count": 1,
            "source": {"component": "pipelines-as-code"},
        });
        let _: Value = self
            .write(
                Method::POST,
                &core_path(&event.namespace, "events"),
                &body,
                "Event",
                &event.namespace,
                &event.repository,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
