//! Tests for the in-memory Kubernetes client.

use super::*;
use crate::resources::{ObjectMeta, OwnerReference};
use serde_json::json;
use std::collections::BTreeMap;

fn pipeline_run(namespace: &str, generate_name: &str) -> PipelineRun {
    PipelineRun {
        api_version: "tekton.dev/v1".to_string(),
        kind: "PipelineRun".to_string(),
        metadata: ObjectMeta {
            namespace: namespace.to_string(),
            generate_name: generate_name.to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Verify that generateName produces a unique name with the prefix.
#[tokio::test]
async fn test_create_pipeline_run_honours_generate_name() {
    let kube = MemoryKubeClient::new();

    let a = kube.create_pipeline_run(&pipeline_run("ci", "build-")).await.unwrap();
    let b = kube.create_pipeline_run(&pipeline_run("ci", "build-")).await.unwrap();

    assert!(a.metadata.name.starts_with("build-"));
    assert_eq!(a.metadata.name.len(), "build-".len() + 5);
    assert_ne!(a.metadata.name, b.metadata.name);
    assert!(a.metadata.creation_timestamp.is_some());
}

/// Verify that a stale resourceVersion is rejected.
#[tokio::test]
async fn test_update_repository_detects_conflict() {
    let kube = MemoryKubeClient::new();
    kube.insert_repository(Repository::new("ci", "app", "https://github.com/o/app"));

    let first = kube.get_repository("ci", "app").await.unwrap();
    let stale = first.clone();
    kube.update_repository(&first).await.unwrap();

    let result = kube.update_repository(&stale).await;

    assert!(matches!(result, Err(KubeError::Conflict { .. })));
}

#[tokio::test]
async fn test_create_secret_twice_is_already_exists() {
    let kube = MemoryKubeClient::new();
    let secret = Secret::new(ObjectMeta::named("ci", "s"), BTreeMap::new());

    kube.create_secret(&secret).await.unwrap();
    let second = kube.create_secret(&secret).await;

    assert!(matches!(second, Err(KubeError::AlreadyExists { .. })));
    assert_eq!(kube.secrets().len(), 1);
}

#[tokio::test]
async fn test_patch_pipeline_run_records_patch() {
    let kube = MemoryKubeClient::new();
    let mut pr = pipeline_run("ci", "");
    pr.metadata.name = "run".to_string();
    pr.spec.status = "PipelineRunPending".to_string();
    kube.insert_pipeline_run(pr);

    let patched = kube
        .patch_pipeline_run("ci", "run", &json!({"spec": {"status": null}}))
        .await
        .unwrap();

    assert!(patched.spec.status.is_empty());
    assert_eq!(kube.patches().len(), 1);
}

/// Verify that deleting a PipelineRun removes the secrets it owns.
#[tokio::test]
async fn test_delete_pipeline_run_collects_owned_secrets() {
    let kube = MemoryKubeClient::new();
    let mut pr = pipeline_run("ci", "");
    pr.metadata.name = "run".to_string();
    kube.insert_pipeline_run(pr);
    let mut meta = ObjectMeta::named("ci", "pac-gitauth-abcdef");
    meta.owner_references.push(OwnerReference {
        api_version: "tekton.dev/v1".to_string(),
        kind: "PipelineRun".to_string(),
        name: "run".to_string(),
        uid: "u".to_string(),
    });
    kube.insert_secret(Secret::new(meta, BTreeMap::new()));

    kube.delete_pipeline_run("ci", "run").await.unwrap();

    assert!(kube.secrets().is_empty());
}

#[tokio::test]
async fn test_pod_logs_tail() {
    let kube = MemoryKubeClient::new();
    kube.set_pod_log("ci", "pod", "step-build", "a\nb\nc\nd");

    let tail = kube.get_pod_logs("ci", "pod", "step-build", Some(2)).await.unwrap();

    assert_eq!(tail, "c\nd");
}
