//! End-to-end test of a signed GitHub push webhook
//!
//! The GitHub API is served by a wiremock server reached through the
//! Repository's git provider URL.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine as _;
use common::{template, TestHarness, REPO_URL};
use pac_core::keys;
use pac_core::repository::{GitProvider, SecretRef};
use pac_core::resources::{ObjectMeta, Secret};
use pac_core::secrets::{DEFAULT_PROVIDER_TOKEN_KEY, DEFAULT_WEBHOOK_SECRET_KEY};
use pac_core::{MemoryKubeClient, Repository};
use pac_providers::github::{EVENT_HEADER, SIGNATURE_256_HEADER};
use pac_providers::signature::hmac_sha256_hex;
use pac_providers::GitHubProvider;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WEBHOOK_SECRET: &str = "shhh";
const SHA: &str = "abc123";

fn push_payload() -> serde_json::Value {
    serde_json::json!({
        "ref": "refs/heads/main",
        "before": "0000001",
        "after": SHA,
        "head_commit": {
            "id": SHA,
            "message": "Fix the build\n\nLonger description",
            "url": format!("{}/commit/{}", REPO_URL, SHA)
        },
        "pusher": {"name": "octocat"},
        "sender": {"login": "octocat"},
        "repository": {
            "id": 7,
            "name": "app",
            "html_url": REPO_URL,
            "clone_url": format!("{}.git", REPO_URL),
            "default_branch": "main",
            "owner": {"login": "org", "id": 1}
        }
    })
}

/// Cluster holding a Repository whose GitHub credentials live in a Secret.
fn cluster(api_server: &MockServer) -> Arc<MemoryKubeClient> {
    let kube = Arc::new(MemoryKubeClient::new());
    let mut repo = Repository::new("ci", "app", REPO_URL);
    repo.spec.git_provider = Some(GitProvider {
        url: api_server.uri(),
        secret: Some(SecretRef {
            name: "github-creds".to_string(),
            key: String::new(),
        }),
        webhook_secret: Some(SecretRef {
            name: "github-creds".to_string(),
            key: String::new(),
        }),
        ..Default::default()
    });
    kube.insert_repository(repo);
    kube.insert_secret(Secret::new(
        ObjectMeta::named("ci", "github-creds"),
        [
            (DEFAULT_PROVIDER_TOKEN_KEY.to_string(), "ghp_token".to_string()),
            (DEFAULT_WEBHOOK_SECRET_KEY.to_string(), WEBHOOK_SECRET.to_string()),
        ]
        .into(),
    ));
    kube
}

async fn mount_repository_api(server: &MockServer) {
    let encoded = base64::engine::general_purpose::STANDARD
        .encode(template("push-build", "push", ""));

    Mock::given(method("GET"))
        .and(path(format!("/api/v3/repos/org/app/git/commits/{}", SHA)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sha": SHA,
            "html_url": format!("{}/commit/{}", REPO_URL, SHA),
            "message": "Fix the build\n\nLonger description",
            "author": {"name": "Ada", "date": "2024-01-01T00:00:00Z"},
            "committer": {"name": "GitHub", "date": "2024-01-01T00:00:00Z"}
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v3/repos/org/app/git/trees/{}", SHA)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tree": [{"path": ".tekton", "type": "tree", "sha": "t1"}]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/repos/org/app/git/trees/t1"))
        .and(query_param("recursive", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tree": [{"path": "push.yaml", "type": "blob", "sha": "b1"}]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/repos/org/app/git/blobs/b1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": encoded, "encoding": "base64"
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/api/v3/repos/org/app/statuses/{}", SHA)))
        .respond_with(ResponseTemplate::new(201))
        .mount(server)
        .await;
}

fn signed_push(secret: &str) -> Request<Body> {
    let body = push_payload().to_string();
    let digest = hmac_sha256_hex(secret, body.as_bytes()).unwrap();
    Request::builder()
        .method("POST")
        .uri("/")
        .header(EVENT_HEADER, "push")
        .header(SIGNATURE_256_HEADER, format!("sha256={}", digest))
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

/// Verify that a signed push fetches the templates over the GitHub API,
/// creates the run and posts a commit status.
#[tokio::test]
async fn test_signed_push_creates_pipeline_run() {
    // Arrange
    let server = MockServer::start().await;
    mount_repository_api(&server).await;
    let h = TestHarness::with_kube(cluster(&server), vec![Arc::new(GitHubProvider::new())]);

    // Act
    let (status, body) = h.send(signed_push(WEBHOOK_SECRET)).await;

    // Assert
    assert_eq!(status, StatusCode::OK, "body: {}", body);
    assert_eq!(body["status"], "processed");
    assert_eq!(body["provider"], "github");
    let run = h.run_named("push-build-");
    assert_eq!(run.metadata.labels[keys::EVENT_TYPE], "push");
    assert_eq!(run.metadata.labels[keys::GIT_PROVIDER], "github");
    assert_eq!(run.annotation(keys::SHA), Some(SHA));

    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().any(|r| r.method.as_str() == "POST"
        && r.url.path() == format!("/api/v3/repos/org/app/statuses/{}", SHA)));
}

/// Verify that a payload signed with another secret is refused before any
/// API call is made.
#[tokio::test]
async fn test_push_with_wrong_signature_is_unauthorized() {
    let server = MockServer::start().await;
    mount_repository_api(&server).await;
    let h = TestHarness::with_kube(cluster(&server), vec![Arc::new(GitHubProvider::new())]);

    let (status, body) = h.send(signed_push("not-the-secret")).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], 401);
    assert!(h.kube.pipeline_runs().is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}
