//! Tests for the GitHub provider.

use super::*;
use pac_core::event::TriggerType;
use pac_core::kube::MemoryKubeClient;
use pac_core::repository::{Policy, RepositorySettings};
use pac_core::resources::{ObjectMeta, Secret};
use pac_core::secrets::ControllerSecret;
use pac_core::SecretValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "webhook-secret";

fn provider(server: &MockServer) -> GitHubProvider {
    GitHubProvider::new().with_api_url(server.uri())
}

fn event() -> Event {
    let mut event = Event::new("pull_request", TriggerType::PullRequest);
    event.organization = "org".to_string();
    event.repository = "app".to_string();
    event.sha = "abc123".to_string();
    event.base_branch = "main".to_string();
    event.default_branch = "main".to_string();
    event.sender = "contributor".to_string();
    event.pull_request_number = Some(7);
    event.provider.token = Some(SecretValue::from_string("ghp_token".to_string()));
    event
}

fn status(status: RunStatus, conclusion: CommitStatus) -> StatusOptions {
    StatusOptions {
        status,
        conclusion,
        title: "Success".to_string(),
        summary: "All tasks passed".to_string(),
        text: "| task | status |".to_string(),
        pipeline_run_name: "pr-build-x1y2z".to_string(),
        original_pipeline_run_name: "pr-build".to_string(),
        application_name: "Pipelines as Code CI".to_string(),
        ..Default::default()
    }
}

fn signed_event(body: &str, secret: &str) -> Event {
    let mut event = event();
    let digest = signature::hmac_sha256_hex(secret, body.as_bytes()).unwrap();
    event
        .headers
        .insert(SIGNATURE_256_HEADER.to_string(), format!("sha256={}", digest));
    event.payload = bytes::Bytes::from(body.to_string());
    event.provider.webhook_secret = Some(SecretValue::from_string(SECRET.to_string()));
    event
}

// ============================================================================
// Endpoints
// ============================================================================

#[test]
fn test_enterprise_api_url() {
    assert_eq!(enterprise_api_url("github.com"), PUBLIC_API_URL);
    assert_eq!(enterprise_api_url("https://github.com/"), PUBLIC_API_URL);
    assert_eq!(
        enterprise_api_url("ghe.example.com"),
        "https://ghe.example.com/api/v3"
    );
    assert_eq!(
        enterprise_api_url("https://ghe.example.com/api/v3/"),
        "https://ghe.example.com/api/v3"
    );
}

#[test]
fn test_check_name_prefixes_application() {
    let options = status(RunStatus::InProgress, CommitStatus::Pending);
    let event_level = StatusOptions {
        application_name: "Pipelines as Code CI".to_string(),
        ..Default::default()
    };

    assert_eq!(check_name(&options), "Pipelines as Code CI / pr-build");
    assert_eq!(check_name(&event_level), "Pipelines as Code CI");
}

#[test]
fn test_commit_state_mapping() {
    let state = |c| commit_state(&status(RunStatus::Completed, c));

    assert_eq!(state(CommitStatus::Skipped), "success");
    assert_eq!(state(CommitStatus::Neutral), "success");
    assert_eq!(state(CommitStatus::Cancelled), "failure");
    assert_eq!(state(CommitStatus::Pending), "pending");
}

// ============================================================================
// Signature
// ============================================================================

#[test]
fn test_validate_accepts_valid_signature() {
    let event = signed_event("{\"action\":\"opened\"}", SECRET);

    assert!(GitHubProvider::new().validate(&event).is_ok());
}

#[test]
fn test_validate_rejects_wrong_secret() {
    let event = signed_event("{\"action\":\"opened\"}", "another-secret");

    let err = GitHubProvider::new().validate(&event).unwrap_err();

    assert!(matches!(err, ProviderError::InvalidSignature { .. }));
}

#[test]
fn test_validate_requires_signature() {
    let mut event = event();
    event.provider.webhook_secret = Some(SecretValue::from_string(SECRET.to_string()));

    let err = GitHubProvider::new().validate(&event).unwrap_err();

    assert!(err.to_string().contains("no signature has been detected"));
}

#[test]
fn test_validate_falls_back_to_sha1_header() {
    let mut event = signed_event("payload", SECRET);
    event.headers.remove(SIGNATURE_256_HEADER);
    event
        .headers
        .insert(SIGNATURE_HEADER.to_string(), "sha1=deadbeef".to_string());

    let err = GitHubProvider::new().validate(&event).unwrap_err();

    assert!(matches!(err, ProviderError::InvalidSignature { .. }));
}

// ============================================================================
// Parsing
// ============================================================================

#[tokio::test]
async fn test_parse_payload_records_request_and_enterprise_host() {
    let body = serde_json::json!({
        "ref": "refs/heads/main",
        "after": "abc",
        "pusher": {"name": "octocat"},
        "head_commit": {"id": "abc", "message": "msg", "url": ""},
        "repository": {"name": "app", "owner": {"login": "org"}, "html_url": "https://ghe.example.com/org/app"}
    });
    let mut headers = BTreeMap::new();
    headers.insert(EVENT_HEADER.to_string(), "push".to_string());
    headers.insert(ENTERPRISE_HOST_HEADER.to_string(), "ghe.example.com".to_string());
    let request = WebhookRequest::new(headers, serde_json::to_vec(&body).unwrap());

    let event = GitHubProvider::new().parse_payload(&request).await.unwrap();

    assert_eq!(event.ghe_url, "ghe.example.com");
    assert_eq!(event.headers.get(EVENT_HEADER).unwrap(), "push");
    assert_eq!(event.payload, request.body);
    assert_eq!(event.sha, "abc");
}

// ============================================================================
// Client Binding
// ============================================================================

#[tokio::test]
async fn test_set_client_completes_comment_event_from_pull_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app/pulls/7"))
        .and(header("authorization", "Bearer ghp_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "number": 7,
            "title": "Feature",
            "html_url": "https://github.com/org/app/pull/7",
            "user": {"login": "author"},
            "head": {"ref": "feature", "sha": "fff111", "repo": {"html_url": "https://github.com/fork/app"}},
            "base": {"ref": "main", "sha": "000", "repo": {"html_url": "https://github.com/org/app", "default_branch": "main"}}
        })))
        .expect(1)
        .mount(&server)
        .await;
    let mut event = event();
    event.sha.clear();
    event.base_branch.clear();
    event.sender = "reviewer".to_string();
    let repo = Repository::new("ci", "app", "https://github.com/org/app");

    provider(&server)
        .set_client(&mut event, &repo, &Settings::default())
        .await
        .unwrap();

    assert_eq!(event.sha, "fff111");
    assert_eq!(event.base_branch, "main");
    assert_eq!(event.head_branch, "feature");
    assert_eq!(event.pull_request_title, "Feature");
    assert_eq!(event.sender, "reviewer");
}

/// Verify that App installs mint a token scoped to the event's repository.
#[tokio::test]
async fn test_set_client_mints_scoped_installation_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/app/installations/42/access_tokens"))
        .and(body_json(serde_json::json!({})))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"token": "ghs_all"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app"))
        .and(header("authorization", "Bearer ghs_all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 77})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/app/installations/42/access_tokens"))
        .and(body_json(serde_json::json!({"repository_ids": [77]})))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"token": "ghs_scoped"})))
        .expect(1)
        .mount(&server)
        .await;

    let kube = Arc::new(MemoryKubeClient::new());
    let mut data = BTreeMap::new();
    data.insert(app::APPLICATION_ID_KEY.to_string(), "1".to_string());
    data.insert(
        app::PRIVATE_KEY_KEY.to_string(),
        include_str!("../../testdata/github-app-key.pem").to_string(),
    );
    kube.insert_secret(Secret::new(
        ObjectMeta::named("pipelines-as-code", "pipelines-as-code-secret"),
        data,
    ));
    let source = AppTokenSource::new(
        kube,
        ControllerSecret {
            namespace: "pipelines-as-code".to_string(),
            name: "pipelines-as-code-secret".to_string(),
        },
    );
    let provider = provider(&server).with_app(source);
    let mut event = event();
    event.provider.token = None;
    event.installation_id = Some(42);
    let repo = Repository::new("ci", "app", "https://github.com/org/app");

    provider
        .set_client(&mut event, &repo, &Settings::default())
        .await
        .unwrap();

    assert_eq!(event.provider.token.unwrap().expose_secret(), "ghs_scoped");
    assert!(provider.supports_check_runs());
}

// ============================================================================
// Repository Content
// ============================================================================

#[tokio::test]
async fn test_get_tekton_dir_reads_yaml_blobs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app/git/trees/abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tree": [
                {"path": "README.md", "type": "blob", "sha": "r1"},
                {"path": ".tekton", "type": "tree", "sha": "t1"}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app/git/trees/t1"))
        .and(query_param("recursive", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tree": [
                {"path": "push.yaml", "type": "blob", "sha": "b2"},
                {"path": "notes.txt", "type": "blob", "sha": "b3"},
                {"path": "nested", "type": "tree", "sha": "t2"},
                {"path": "nested/pr.yml", "type": "blob", "sha": "b1"}
            ]
        })))
        .mount(&server)
        .await;
    // "kind: PipelineRun\n" with a line break inside the base64 text
    Mock::given(method("GET"))
        .and(path("/repos/org/app/git/blobs/b1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": "a2luZDogUGlw\nZWxpbmVSdW4K", "encoding": "base64"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app/git/blobs/b2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": "a2luZDogUGlwZWxpbmVSdW4K", "encoding": "base64"
        })))
        .mount(&server)
        .await;

    let files = provider(&server).get_tekton_dir(&event(), ".tekton").await.unwrap();

    let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec![".tekton/nested/pr.yml", ".tekton/push.yaml"]);
    assert_eq!(files[0].content, "kind: PipelineRun\n");
}

#[tokio::test]
async fn test_get_tekton_dir_without_directory_is_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app/git/trees/abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"tree": []})))
        .mount(&server)
        .await;

    let files = provider(&server).get_tekton_dir(&event(), ".tekton").await.unwrap();

    assert!(files.is_empty());
}

#[tokio::test]
async fn test_get_file_inside_repo_uses_branch_reference() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app/contents/OWNERS"))
        .and(query_param("ref", "main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "type": "file", "content": "YXBwcm92ZXJzOiBbXQo=", "encoding": "base64"
        })))
        .mount(&server)
        .await;

    let content = provider(&server)
        .get_file_inside_repo(&event(), "OWNERS", "main")
        .await
        .unwrap();

    assert_eq!(content, "approvers: []\n");
}

#[tokio::test]
async fn test_get_file_inside_repo_rejects_directories() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app/contents/docs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{"name": "a.md"}])))
        .mount(&server)
        .await;

    let err = provider(&server)
        .get_file_inside_repo(&event(), "docs", "")
        .await
        .unwrap_err();

    assert!(err.to_string().contains("is a directory"));
}

#[tokio::test]
async fn test_get_commit_info_sets_title_and_author() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app/git/commits/abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sha": "abc123",
            "html_url": "https://github.com/org/app/commit/abc123",
            "message": "Fix the build\n\nDetails follow",
            "author": {"name": "Ada", "date": "2024-01-01T00:00:00Z"},
            "committer": {"name": "GitHub", "date": "2024-01-01T00:00:00Z"}
        })))
        .mount(&server)
        .await;
    let mut event = event();

    provider(&server).get_commit_info(&mut event).await.unwrap();

    assert_eq!(event.sha_title, "Fix the build");
    assert_eq!(event.sha_url, "https://github.com/org/app/commit/abc123");
    assert_eq!(event.sha_author_name, "Ada");
    assert_eq!(event.sha_committer_name, "GitHub");
}

#[tokio::test]
async fn test_get_files_of_pull_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app/pulls/7/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"filename": "src/new.rs", "status": "added"},
            {"filename": "src/lib.rs", "status": "modified"},
            {"filename": "old.txt", "status": "removed"},
            {"filename": "moved.rs", "status": "renamed"}
        ])))
        .mount(&server)
        .await;

    let files = provider(&server).get_files(&event()).await.unwrap();

    assert_eq!(files.all.len(), 4);
    assert_eq!(files.added, vec!["src/new.rs"]);
    assert_eq!(files.modified, vec!["src/lib.rs"]);
    assert_eq!(files.deleted, vec!["old.txt"]);
    assert_eq!(files.renamed, vec!["moved.rs"]);
}

// ============================================================================
// Access Control
// ============================================================================

#[tokio::test]
async fn test_organization_owner_is_allowed_without_api_calls() {
    let server = MockServer::start().await;
    let mut event = event();
    event.sender = "org".to_string();
    let repo = Repository::new("ci", "app", "https://github.com/org/app");

    let allowed = provider(&server)
        .is_allowed(&event, &repo, &Settings::default())
        .await
        .unwrap();

    assert!(allowed);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_collaborator_is_allowed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app/collaborators/contributor"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    let repo = Repository::new("ci", "app", "https://github.com/org/app");

    let allowed = provider(&server)
        .is_allowed(&event(), &repo, &Settings::default())
        .await
        .unwrap();

    assert!(allowed);
}

#[tokio::test]
async fn test_unknown_sender_is_denied() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app/issues/7/comments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;
    let repo = Repository::new("ci", "app", "https://github.com/org/app");

    let allowed = provider(&server)
        .is_allowed(&event(), &repo, &Settings::default())
        .await
        .unwrap();

    assert!(!allowed);
}

/// Verify that an /ok-to-test from a collaborator lets the sender in.
#[tokio::test]
async fn test_ok_to_test_from_collaborator_allows_sender() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app/issues/7/comments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"id": 1, "body": "/ok-to-test", "user": {"login": "contributor"}},
            {"id": 2, "body": "/ok-to-test", "user": {"login": "maintainer"}}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app/collaborators/maintainer"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    let repo = Repository::new("ci", "app", "https://github.com/org/app");

    let allowed = provider(&server)
        .is_allowed(&event(), &repo, &Settings::default())
        .await
        .unwrap();

    assert!(allowed);
}

#[tokio::test]
async fn test_ok_to_test_ignored_when_not_remembered() {
    let server = MockServer::start().await;
    let repo = Repository::new("ci", "app", "https://github.com/org/app");
    let settings = Settings {
        remember_ok_to_test: false,
        ..Settings::default()
    };

    let allowed = provider(&server).is_allowed(&event(), &repo, &settings).await.unwrap();

    assert!(!allowed);
}

#[tokio::test]
async fn test_policy_team_member_is_allowed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orgs/org/teams/ci-admins/memberships/contributor"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"state": "active"})))
        .mount(&server)
        .await;
    let mut repo = Repository::new("ci", "app", "https://github.com/org/app");
    repo.spec.settings = Some(RepositorySettings {
        policy: Some(Policy {
            pull_request: vec!["ci-admins".to_string()],
            ..Default::default()
        }),
        ..Default::default()
    });

    let allowed = provider(&server)
        .is_allowed(&event(), &repo, &Settings::default())
        .await
        .unwrap();

    assert!(allowed);
}

// ============================================================================
// Status Reporting
// ============================================================================

#[tokio::test]
async fn test_webhook_install_creates_commit_status_and_comment() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/repos/org/app/statuses/abc123"))
        .and(body_partial_json(serde_json::json!({
            "state": "success",
            "context": "Pipelines as Code CI / pr-build"
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/org/app/issues/7/comments"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    provider(&server)
        .create_status(&event(), &status(RunStatus::Completed, CommitStatus::Success))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_app_install_updates_existing_check_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app/commits/abc123/check-runs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "check_runs": [
                {"id": 5, "external_id": "other"},
                {"id": 6, "external_id": "pr-build-x1y2z"}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/repos/org/app/check-runs/6"))
        .and(body_partial_json(serde_json::json!({
            "status": "completed",
            "conclusion": "failure",
            "output": {"title": "Success", "summary": "All tasks passed"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 6})))
        .expect(1)
        .mount(&server)
        .await;
    let mut event = event();
    event.installation_id = Some(42);

    provider(&server)
        .create_status(&event, &status(RunStatus::Completed, CommitStatus::Failure))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_app_install_creates_missing_check_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app/commits/abc123/check-runs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"check_runs": []})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/org/app/check-runs"))
        .and(body_partial_json(serde_json::json!({
            "head_sha": "abc123",
            "external_id": "pr-build-x1y2z",
            "status": "in_progress"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 9})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/repos/org/app/check-runs/9"))
        .and(body_partial_json(serde_json::json!({"status": "in_progress"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 9})))
        .expect(1)
        .mount(&server)
        .await;
    let mut event = event();
    event.installation_id = Some(42);

    provider(&server)
        .create_status(&event, &status(RunStatus::InProgress, CommitStatus::Pending))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_comment_dedup_deletes_previous_comment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app/issues/7/comments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"id": 11, "body": "<!-- pac-error -->\nold", "user": {"login": "bot"}},
            {"id": 12, "body": "unrelated", "user": {"login": "someone"}}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/repos/org/app/issues/comments/11"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/org/app/issues/7/comments"))
        .and(body_json(serde_json::json!({"body": "<!-- pac-error -->\nnew"})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    provider(&server)
        .create_comment(&event(), "<!-- pac-error -->\nnew", Some("<!-- pac-error -->"))
        .await
        .unwrap();
}

// ============================================================================
// Remote Tasks
// ============================================================================

#[tokio::test]
async fn test_get_task_uri_fetches_blob_urls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/other/tasks/contents/task/git-clone.yaml"))
        .and(query_param("ref", "v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": "a2luZDogVGFzawo=", "encoding": "base64"
        })))
        .mount(&server)
        .await;

    let content = provider(&server)
        .get_task_uri(&event(), "https://github.com/other/tasks/blob/v1/task/git-clone.yaml")
        .await
        .unwrap();

    assert_eq!(content.as_deref(), Some("kind: Task\n"));
}

#[tokio::test]
async fn test_get_task_uri_ignores_foreign_hosts() {
    let result = GitHubProvider::new()
        .get_task_uri(&event(), "https://gitlab.com/other/tasks/-/raw/main/task.yaml")
        .await
        .unwrap();

    assert!(result.is_none());
}
