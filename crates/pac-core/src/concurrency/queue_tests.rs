//! Tests for the queue manager.

use super::*;
use crate::kube::MemoryKubeClient;
use crate::resources::ObjectMeta;
use crate::tekton::spec_status;
use chrono::{Duration, Utc};

fn limited_repo(limit: i32) -> Repository {
    let mut repo = Repository::new("ci", "app", "https://github.com/org/app");
    repo.spec.concurrency_limit = Some(limit);
    repo
}

fn keys_of(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| format!("ci/{}", n)).collect()
}

fn managed_run(name: &str, state: &str, order: &str, age_secs: i64) -> PipelineRun {
    let mut meta = ObjectMeta::named("ci", name);
    meta.creation_timestamp = Some(Utc::now() - Duration::seconds(age_secs));
    meta.labels
        .insert(keys::MANAGED_BY.to_string(), keys::MANAGED_BY_VALUE.to_string());
    meta.labels.insert(keys::STATE.to_string(), state.to_string());
    meta.labels.insert(keys::REPOSITORY.to_string(), "app".to_string());
    meta.annotations
        .insert(keys::REPOSITORY.to_string(), "app".to_string());
    meta.annotations.insert(keys::STATE.to_string(), state.to_string());
    meta.annotations
        .insert(keys::EXECUTION_ORDER.to_string(), order.to_string());
    let mut pr = PipelineRun {
        api_version: "tekton.dev/v1".to_string(),
        kind: "PipelineRun".to_string(),
        metadata: meta,
        ..Default::default()
    };
    if state == keys::state::QUEUED {
        pr.spec.status = spec_status::PENDING.to_string();
    }
    pr
}

#[test]
fn test_running_queue_respects_limit() {
    let manager = QueueManager::new();
    let repo = limited_repo(2);

    let acquired = manager.add_list_to_running_queue(&repo, &keys_of(&["a", "b", "c"]));

    assert_eq!(acquired, keys_of(&["a", "b"]));
    assert_eq!(manager.running(&repo), keys_of(&["a", "b"]));
    assert_eq!(manager.pending(&repo), keys_of(&["c"]));
}

#[test]
fn test_duplicate_keys_are_ignored() {
    let manager = QueueManager::new();
    let repo = limited_repo(1);
    manager.add_list_to_running_queue(&repo, &keys_of(&["a", "b"]));

    let acquired = manager.add_list_to_running_queue(&repo, &keys_of(&["a", "b"]));

    assert!(acquired.is_empty());
    assert_eq!(manager.running(&repo), keys_of(&["a"]));
    assert_eq!(manager.pending(&repo), keys_of(&["b"]));
}

/// Verify that finishing a run hands its slot to the oldest pending run.
#[test]
fn test_finished_run_frees_slot_in_order() {
    let manager = QueueManager::new();
    let repo = limited_repo(1);
    manager.add_list_to_running_queue(&repo, &keys_of(&["first", "second", "third"]));
    let finished = PipelineRun {
        metadata: ObjectMeta::named("ci", "first"),
        ..Default::default()
    };

    let next = manager.remove_and_take_item_from_queue(&repo, &finished);

    assert_eq!(next.as_deref(), Some("ci/second"));
    assert_eq!(manager.running(&repo), keys_of(&["second"]));
    assert_eq!(manager.pending(&repo), keys_of(&["third"]));
}

#[test]
fn test_unknown_run_does_not_take_a_slot() {
    let manager = QueueManager::new();
    let repo = limited_repo(1);
    manager.add_list_to_running_queue(&repo, &keys_of(&["a", "b"]));
    let stranger = PipelineRun {
        metadata: ObjectMeta::named("ci", "stranger"),
        ..Default::default()
    };

    assert_eq!(manager.remove_and_take_item_from_queue(&repo, &stranger), None);
    assert_eq!(manager.running(&repo), keys_of(&["a"]));
}

#[test]
fn test_pending_queue_does_not_acquire() {
    let manager = QueueManager::new();
    let repo = limited_repo(3);

    manager.add_to_pending_queue(&repo, &keys_of(&["x", "y"]));

    assert!(manager.running(&repo).is_empty());
    assert_eq!(manager.pending(&repo), keys_of(&["x", "y"]));
}

#[test]
fn test_remove_pending_run() {
    let manager = QueueManager::new();
    let repo = limited_repo(1);
    manager.add_list_to_running_queue(&repo, &keys_of(&["a", "b"]));

    assert!(manager.remove_from_queue("ci/app", "ci/b"));
    assert!(!manager.remove_from_queue("ci/app", "ci/b"));
    assert!(!manager.remove_from_queue("ci/other", "ci/a"));
    assert!(manager.pending(&repo).is_empty());
}

/// Verify that raising the limit lets more runs start on the next call.
#[test]
fn test_limit_change_resizes_queue() {
    let manager = QueueManager::new();
    manager.add_list_to_running_queue(&limited_repo(1), &keys_of(&["a", "b", "c"]));

    let acquired = manager.add_list_to_running_queue(&limited_repo(3), &[]);

    assert_eq!(acquired, keys_of(&["b", "c"]));
}

#[test]
fn test_remove_repository() {
    let manager = QueueManager::new();
    let repo = limited_repo(1);
    manager.add_list_to_running_queue(&repo, &keys_of(&["a"]));

    manager.remove_repository(&repo);

    assert!(manager.running(&repo).is_empty());
}

#[tokio::test]
async fn test_init_queues_rebuilds_from_cluster() {
    let kube = MemoryKubeClient::new();
    kube.insert_repository(limited_repo(1));
    let mut unlimited = Repository::new("other", "free", "https://github.com/org/free");
    unlimited.spec.concurrency_limit = None;
    kube.insert_repository(unlimited);
    kube.insert_pipeline_run(managed_run("run-a", keys::state::STARTED, "ci/run-a", 30));
    let order = "ci/run-b,ci/run-c";
    kube.insert_pipeline_run(managed_run("run-b", keys::state::QUEUED, order, 20));
    kube.insert_pipeline_run(managed_run("run-c", keys::state::QUEUED, order, 20));
    let manager = QueueManager::new();

    manager.init_queues(&kube).await.unwrap();

    let repo = limited_repo(1);
    assert_eq!(manager.running(&repo), keys_of(&["run-a"]));
    assert_eq!(manager.pending(&repo), keys_of(&["run-b", "run-c"]));
}

#[tokio::test]
async fn test_init_queues_skips_runs_without_order() {
    let kube = MemoryKubeClient::new();
    kube.insert_repository(limited_repo(2));
    let mut pr = managed_run("run-a", keys::state::STARTED, "", 10);
    pr.metadata.annotations.remove(keys::EXECUTION_ORDER);
    kube.insert_pipeline_run(pr);
    let manager = QueueManager::new();

    manager.init_queues(&kube).await.unwrap();

    assert!(manager.running(&limited_repo(2)).is_empty());
}

#[test]
fn test_remove_key_and_take_next_skips_to_following_run() {
    let manager = QueueManager::new();
    let repo = limited_repo(1);
    manager.add_list_to_running_queue(&repo, &keys_of(&["a", "b", "c"]));

    let next = manager.remove_key_and_take_next(&repo, "ci/a");
    let after = manager.remove_key_and_take_next(&repo, "ci/b");

    assert_eq!(next.as_deref(), Some("ci/b"));
    assert_eq!(after.as_deref(), Some("ci/c"));
}
