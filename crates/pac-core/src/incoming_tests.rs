//! Tests for incoming webhook resolution.

use super::*;
use crate::kube::MemoryKubeClient;
use crate::repository::{GitProvider, SecretRef};
use crate::resources::{ObjectMeta, Secret};
use serde_json::json;

fn rule(targets: &[&str], params: &[&str]) -> Incoming {
    Incoming {
        type_: "webhook-url".to_string(),
        secret: SecretRef {
            name: "incoming-secret".to_string(),
            key: String::new(),
        },
        params: params.iter().map(|s| s.to_string()).collect(),
        targets: targets.iter().map(|s| s.to_string()).collect(),
    }
}

fn seeded(rules: Vec<Incoming>) -> MemoryKubeClient {
    let kube = MemoryKubeClient::new();
    let mut repo = Repository::new("ci", "app", "https://github.com/owner/app");
    repo.spec.incoming = Some(rules);
    kube.insert_repository(repo);
    kube.insert_secret(Secret::new(
        ObjectMeta::named("ci", "incoming-secret"),
        BTreeMap::from([("secret".to_string(), "hunter2".to_string())]),
    ));
    kube
}

fn json_request(body: serde_json::Value) -> WebhookRequest {
    WebhookRequest::new(
        BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())]),
        body.to_string(),
    )
}

fn body(branch: &str, secret: &str) -> serde_json::Value {
    json!({
        "repository": "app",
        "branch": branch,
        "pipelinerun": "deploy",
        "secret": secret,
    })
}

#[tokio::test]
async fn test_json_body_trigger_builds_incoming_event() {
    let kube = seeded(vec![rule(&["main"], &[])]);

    let trigger = resolve(&kube, &json_request(body("main", "hunter2")))
        .await
        .unwrap();

    let event = &trigger.event;
    assert_eq!(event.event_type, "incoming");
    assert_eq!(event.trigger_target, TriggerType::Push);
    assert_eq!(event.target_pipeline_run, "deploy");
    assert_eq!(event.head_branch, "main");
    assert_eq!(event.base_branch, "main");
    assert_eq!(event.sender, "incoming");
    assert_eq!(event.organization, "owner");
    assert_eq!(event.repository, "app");
    assert!(event.request.is_some());
    assert_eq!(trigger.provider, "github");
}

/// Verify that the secret never reaches the stored payload.
#[tokio::test]
async fn test_stored_payload_omits_credentials() {
    let kube = seeded(vec![rule(&["main"], &[])]);

    let trigger = resolve(&kube, &json_request(body("main", "hunter2")))
        .await
        .unwrap();

    let stored = String::from_utf8(trigger.event.payload.to_vec()).unwrap();
    assert!(!stored.contains("hunter2"));
}

#[tokio::test]
async fn test_query_parameters_are_accepted() {
    let kube = seeded(vec![rule(&["main"], &[])]);
    let query = BTreeMap::from([
        ("repository".to_string(), "app".to_string()),
        ("branch".to_string(), "main".to_string()),
        ("pipelinerun".to_string(), "deploy".to_string()),
        ("secret".to_string(), "hunter2".to_string()),
    ]);
    let request = WebhookRequest::new(BTreeMap::new(), "").with_query(query);

    let trigger = resolve(&kube, &request).await.unwrap();

    assert_eq!(trigger.event.target_pipeline_run, "deploy");
}

#[tokio::test]
async fn test_missing_fields_are_listed() {
    let kube = seeded(vec![rule(&["main"], &[])]);
    let request = json_request(json!({"repository": "app", "branch": "main"}));

    let err = resolve(&kube, &request).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "missing required fields: [pipelinerun, secret]"
    );
    assert_eq!(err.http_status(), 400);
}

#[tokio::test]
async fn test_non_json_body_is_rejected() {
    let kube = seeded(vec![rule(&["main"], &[])]);
    let request = WebhookRequest::new(
        BTreeMap::from([("content-type".to_string(), "text/plain".to_string())]),
        "repository=app",
    );

    let err = resolve(&kube, &request).await.unwrap_err();

    assert!(matches!(err, IncomingError::InvalidBody { .. }));
}

#[tokio::test]
async fn test_wrong_secret_is_a_security_error() {
    let kube = seeded(vec![rule(&["main"], &[])]);

    let err = resolve(&kube, &json_request(body("main", "guess")))
        .await
        .unwrap_err();

    assert!(matches!(err, IncomingError::SecretMismatch));
    assert_eq!(err.error_category(), crate::ErrorCategory::Security);
    assert_eq!(err.http_status(), 401);
}

#[tokio::test]
async fn test_branch_must_match_a_target_glob() {
    let kube = seeded(vec![rule(&["release-*"], &[])]);

    let matched = resolve(&kube, &json_request(body("release-1.2", "hunter2"))).await;
    let unmatched = resolve(&kube, &json_request(body("main", "hunter2"))).await;

    assert!(matched.is_ok());
    assert_eq!(
        unmatched.unwrap_err().to_string(),
        "branch 'main' has not matched any rules in repo incoming webhooks spec"
    );
}

#[test]
fn test_first_matching_rule_wins() {
    let mut first = rule(&["main"], &["a"]);
    first.secret.name = "first".to_string();
    let mut second = rule(&["*"], &["b"]);
    second.secret.name = "second".to_string();
    let rules = vec![first, second];

    assert_eq!(matching_rule("main", &rules).unwrap().secret.name, "first");
    assert_eq!(matching_rule("dev", &rules).unwrap().secret.name, "second");
}

#[tokio::test]
async fn test_only_declared_params_are_allowed() {
    let kube = seeded(vec![rule(&["main"], &["env"])]);
    let mut allowed = body("main", "hunter2");
    allowed["params"] = json!({"env": "prod"});
    let mut rejected = body("main", "hunter2");
    rejected["params"] = json!({"image": "evil"});

    let trigger = resolve(&kube, &json_request(allowed)).await.unwrap();
    let err = resolve(&kube, &json_request(rejected)).await.unwrap_err();

    assert_eq!(
        trigger.event.payload_json()["params"]["env"],
        json!("prod")
    );
    assert_eq!(
        err.to_string(),
        "param image is not allowed in incoming webhook CR"
    );
}

#[tokio::test]
async fn test_repository_name_conflict_needs_namespace() {
    let kube = seeded(vec![rule(&["main"], &[])]);
    let mut other = Repository::new("other", "app", "https://github.com/owner/other");
    other.spec.incoming = Some(vec![rule(&["main"], &[])]);
    kube.insert_repository(other);

    let conflict = resolve(&kube, &json_request(body("main", "hunter2"))).await;
    let mut scoped = body("main", "hunter2");
    scoped["namespace"] = json!("ci");
    let resolved = resolve(&kube, &json_request(scoped)).await.unwrap();

    assert!(matches!(
        conflict,
        Err(IncomingError::RepositoryNameConflict { .. })
    ));
    assert_eq!(resolved.repository.namespace(), "ci");
}

#[tokio::test]
async fn test_repository_without_incoming_rules() {
    let kube = MemoryKubeClient::new();
    kube.insert_repository(Repository::new("ci", "app", "https://github.com/owner/app"));

    let err = resolve(&kube, &json_request(body("main", "x")))
        .await
        .unwrap_err();

    assert!(matches!(err, IncomingError::NotConfigured { .. }));
}

#[test]
fn test_provider_kind_mapping() {
    let mut repo = Repository::new("ci", "app", "https://gitlab.com/owner/app");
    assert_eq!(provider_kind(&repo).unwrap(), "github");

    repo.spec.git_provider = Some(GitProvider {
        type_: "gitlab".to_string(),
        ..Default::default()
    });
    assert_eq!(provider_kind(&repo).unwrap(), "gitlab");

    repo.spec.git_provider = Some(GitProvider {
        type_: "svn".to_string(),
        ..Default::default()
    });
    assert!(matches!(
        provider_kind(&repo),
        Err(IncomingError::UnsupportedProvider { .. })
    ));
}
