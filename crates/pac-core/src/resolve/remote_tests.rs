//! Tests for remote fetching.

use super::*;
use crate::event::TriggerType;
use crate::provider::ScriptedProvider;
use crate::settings::HubCatalog;
use std::collections::BTreeMap;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TASK_YAML: &str = "apiVersion: tekton.dev/v1\nkind: Task\nmetadata:\n  name: lint\nspec: {}\n";

fn annotations(items: &[(&str, &str)]) -> BTreeMap<String, String> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn push_event(sha: &str) -> Event {
    let mut event = Event::new("push", TriggerType::Push);
    event.sha = sha.to_string();
    event
}

#[test]
fn test_task_references_in_key_order() {
    let annotations = annotations(&[
        (keys::TASK, "[git-clone, lint]"),
        ("pipelinesascode.tekton.dev/task-1", "https://example.com/test.yaml"),
        (keys::ON_EVENT, "[push]"),
        ("pipelinesascode.tekton.dev/task-x", "ignored"),
    ]);

    let refs = task_references(&annotations).unwrap();

    assert_eq!(refs, vec!["git-clone", "lint", "https://example.com/test.yaml"]);
}

#[test]
fn test_more_than_one_pipeline_is_rejected() {
    let annotations = annotations(&[(keys::PIPELINE, "[a.yaml, b.yaml]")]);

    let err = pipeline_reference(&annotations).unwrap_err();

    assert!(matches!(err, ResolveError::MultiplePipelines { .. }));
}

#[test]
fn test_malformed_task_annotation() {
    let annotations = annotations(&[(keys::TASK, "[]")]);

    assert!(matches!(
        task_references(&annotations),
        Err(ResolveError::Annotation(_))
    ));
}

/// Verify that relative task references of a pipeline fetched over HTTP
/// are resolved next to the pipeline file.
#[test]
fn test_relative_tasks_follow_pipeline_url() {
    let tasks = vec![
        "tasks/lint.yaml".to_string(),
        "https://other.example/clone.yaml".to_string(),
    ];

    let uris = absolute_task_uris("https://example.com/ci/pipeline.yaml", tasks.clone());

    assert_eq!(
        uris,
        vec![
            "https://example.com/ci/tasks/lint.yaml",
            "https://other.example/clone.yaml"
        ]
    );
    assert_eq!(absolute_task_uris("catalog://pipeline", tasks.clone()), tasks);
    assert_eq!(absolute_task_uris("", tasks.clone()), tasks);
}

#[tokio::test]
async fn test_provider_uri_wins() {
    let provider = ScriptedProvider::new()
        .with_task_uri("https://github.com/o/r/blob/main/task.yaml", TASK_YAML);
    let settings = Settings::default();
    let fetcher = RemoteFetcher::new(&provider, &settings).unwrap();

    let data = fetcher
        .fetch(
            &push_event("abc"),
            "https://github.com/o/r/blob/main/task.yaml",
            RemoteKind::Task,
        )
        .await
        .unwrap();

    assert_eq!(data, TASK_YAML);
}

#[tokio::test]
async fn test_http_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/task.yaml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TASK_YAML))
        .mount(&server)
        .await;
    let provider = ScriptedProvider::new();
    let settings = Settings::default();
    let fetcher = RemoteFetcher::new(&provider, &settings).unwrap();

    let data = fetcher
        .fetch(
            &push_event("abc"),
            &format!("{}/task.yaml", server.uri()),
            RemoteKind::Task,
        )
        .await
        .unwrap();

    assert_eq!(data, TASK_YAML);
}

#[tokio::test]
async fn test_http_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let provider = ScriptedProvider::new();
    let settings = Settings::default();
    let fetcher = RemoteFetcher::new(&provider, &settings).unwrap();

    let err = fetcher
        .fetch(
            &push_event("abc"),
            &format!("{}/missing.yaml", server.uri()),
            RemoteKind::Task,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::Fetch { .. }));
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn test_repository_path_uses_provider_at_commit() {
    let provider = ScriptedProvider::new().with_repo_file("tasks/lint.yaml", TASK_YAML);
    let settings = Settings::default();
    let fetcher = RemoteFetcher::new(&provider, &settings).unwrap();

    let data = fetcher
        .fetch(&push_event("abc"), "tasks/lint.yaml", RemoteKind::Task)
        .await
        .unwrap();

    assert_eq!(data, TASK_YAML);
}

#[tokio::test]
async fn test_local_file_without_commit() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("lint.yaml");
    std::fs::write(&file, TASK_YAML).unwrap();
    let provider = ScriptedProvider::new();
    let settings = Settings::default();
    let fetcher = RemoteFetcher::new(&provider, &settings).unwrap();

    let data = fetcher
        .fetch(&push_event(""), file.to_str().unwrap(), RemoteKind::Task)
        .await
        .unwrap();

    assert_eq!(data, TASK_YAML);
}

#[tokio::test]
async fn test_missing_local_file_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("absent.yaml");
    let provider = ScriptedProvider::new();
    let settings = Settings::default();
    let fetcher = RemoteFetcher::new(&provider, &settings).unwrap();

    let err = fetcher
        .fetch(&push_event(""), file.to_str().unwrap(), RemoteKind::Task)
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::Empty { kind: "task", .. }));
}

#[tokio::test]
async fn test_unknown_catalog_yields_empty() {
    let provider = ScriptedProvider::new();
    let settings = Settings::default();
    let fetcher = RemoteFetcher::new(&provider, &settings).unwrap();

    let err = fetcher
        .fetch(&push_event("abc"), "nowhere://git-clone", RemoteKind::Task)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("returning empty"));
}

#[tokio::test]
async fn test_custom_catalog_and_default_hub() {
    let server = MockServer::start().await;
    for (catalog, name) in [("tekton", "git-clone"), ("internal", "scan")] {
        Mock::given(method("GET"))
            .and(path(format!("/resource/{}/task/{}", catalog, name)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"latestVersion": {"version": "1.0"}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/resource/{}/task/{}/1.0/raw", catalog, name)))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("# {}\n{}", name, TASK_YAML)))
            .mount(&server)
            .await;
    }
    let provider = ScriptedProvider::new();
    let settings = Settings {
        hub_catalogs: vec![
            HubCatalog {
                id: "default".to_string(),
                name: "tekton".to_string(),
                url: server.uri(),
            },
            HubCatalog {
                id: "corp".to_string(),
                name: "internal".to_string(),
                url: server.uri(),
            },
        ],
        ..Default::default()
    };
    let fetcher = RemoteFetcher::new(&provider, &settings).unwrap();
    let event = push_event("abc");

    let bare = fetcher.fetch(&event, "git-clone", RemoteKind::Task).await.unwrap();
    let custom = fetcher.fetch(&event, "corp://scan", RemoteKind::Task).await.unwrap();

    assert!(bare.starts_with("# git-clone"));
    assert!(custom.starts_with("# scan"));
}

#[tokio::test]
async fn test_pipelines_are_not_looked_up_on_hub() {
    let provider = ScriptedProvider::new();
    let settings = Settings::default();
    let fetcher = RemoteFetcher::new(&provider, &settings).unwrap();

    let err = fetcher
        .fetch(&push_event("abc"), "my-pipeline", RemoteKind::Pipeline)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("cannot find the resource anywhere"));
}
