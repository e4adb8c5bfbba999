//! Tests for the scheduler sync manager.

use super::*;
use crate::kube::MemoryKubeClient;
use crate::resources::{Condition, ObjectMeta};
use crate::tekton::{spec_status, PipelineRunStatus};

fn limited_repo(limit: Option<i32>) -> Repository {
    let mut repo = Repository::new("ci", "app", "https://github.com/org/app");
    repo.spec.concurrency_limit = limit;
    repo
}

fn pending_run(name: &str, repo_annotation: Option<&str>) -> PipelineRun {
    let mut meta = ObjectMeta::named("ci", name);
    if let Some(repo) = repo_annotation {
        meta.annotations
            .insert(keys::REPOSITORY.to_string(), repo.to_string());
    }
    let mut pr = PipelineRun {
        metadata: meta,
        ..Default::default()
    };
    pr.spec.status = spec_status::PENDING.to_string();
    pr
}

fn finished(mut pr: PipelineRun) -> PipelineRun {
    pr.spec.status = String::new();
    pr.status = Some(PipelineRunStatus {
        conditions: vec![Condition::succeeded("True", "Succeeded", "done")],
        ..Default::default()
    });
    pr
}

fn setup(limit: Option<i32>) -> (Arc<MemoryKubeClient>, SyncManager) {
    let kube = Arc::new(MemoryKubeClient::new());
    kube.insert_repository(limited_repo(limit));
    let manager = SyncManager::new(kube.clone(), Arc::new(QueueManager::new()))
        .with_poll_interval(Duration::from_millis(10));
    (kube, manager)
}

async fn stored(kube: &MemoryKubeClient, name: &str) -> PipelineRun {
    kube.get_pipeline_run("ci", name).await.unwrap()
}

#[tokio::test]
async fn test_register_rejects_missing_pipeline_run() {
    let (_kube, manager) = setup(Some(1));

    let err = manager.register("ci", "ghost").await.unwrap_err();

    assert!(matches!(err, SchedulerError::PipelineRunNotFound { .. }));
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_register_rejects_run_not_pending() {
    let (kube, manager) = setup(Some(1));
    let mut pr = pending_run("build", Some("app"));
    pr.spec.status = String::new();
    kube.insert_pipeline_run(pr);

    let err = manager.register("ci", "build").await.unwrap_err();

    assert!(matches!(err, SchedulerError::NotPending { .. }));
}

#[tokio::test]
async fn test_register_rejects_run_without_repository_annotation() {
    let (kube, manager) = setup(Some(1));
    kube.insert_pipeline_run(pending_run("build", None));

    let err = manager.register("ci", "build").await.unwrap_err();

    assert!(matches!(
        err,
        SchedulerError::MissingRepositoryAnnotation { .. }
    ));
}

#[tokio::test]
async fn test_register_rejects_unknown_repository() {
    let (kube, manager) = setup(Some(1));
    kube.insert_pipeline_run(pending_run("build", Some("other")));

    let err = manager.register("ci", "build").await.unwrap_err();

    assert!(matches!(err, SchedulerError::RepositoryNotFound { .. }));
}

/// Verify that a Repository without a concurrency limit cannot use the
/// scheduler.
#[tokio::test]
async fn test_register_rejects_repository_without_limit() {
    let (kube, manager) = setup(None);
    kube.insert_pipeline_run(pending_run("build", Some("app")));

    let err = manager.register("ci", "build").await.unwrap_err();

    assert!(matches!(err, SchedulerError::NoConcurrencyLimit { .. }));
    assert_eq!(err.error_category(), crate::ErrorCategory::Configuration);
}

#[tokio::test]
async fn test_register_starts_run_when_slot_free() {
    let (kube, manager) = setup(Some(1));
    kube.insert_pipeline_run(pending_run("build", Some("app")));

    let started = manager.register("ci", "build").await.unwrap();

    assert_eq!(started, vec!["ci/build".to_string()]);
    let pr = stored(&kube, "build").await;
    assert!(!pr.is_pending());
    assert_eq!(pr.metadata.labels[keys::STATE], keys::state::STARTED);
}

#[tokio::test]
async fn test_register_queues_run_when_limit_reached() {
    let (kube, manager) = setup(Some(1));
    kube.insert_pipeline_run(pending_run("first", Some("app")));
    kube.insert_pipeline_run(pending_run("second", Some("app")));
    manager.register("ci", "first").await.unwrap();

    let started = manager.register("ci", "second").await.unwrap();

    assert!(started.is_empty());
    assert!(stored(&kube, "second").await.is_pending());
    let repo = limited_repo(Some(1));
    assert_eq!(manager.queues().pending(&repo), vec!["ci/second".to_string()]);
}

/// Verify that a finished run hands its slot to the next queued run.
#[tokio::test]
async fn test_sync_once_starts_next_after_completion() {
    let kube = MemoryKubeClient::new();
    let queues = QueueManager::new();
    let repo = limited_repo(Some(1));
    kube.insert_repository(repo.clone());
    kube.insert_pipeline_run(finished(pending_run("first", Some("app"))));
    kube.insert_pipeline_run(pending_run("second", Some("app")));
    queues.add_list_to_running_queue(&repo, &["ci/first".to_string(), "ci/second".to_string()]);

    let more = sync_once(&kube, &queues, &repo).await.unwrap();

    assert!(more);
    assert_eq!(queues.running(&repo), vec!["ci/second".to_string()]);
    assert!(queues.pending(&repo).is_empty());
    assert!(!stored(&kube, "second").await.is_pending());
}

#[tokio::test]
async fn test_sync_once_releases_deleted_runs() {
    let kube = MemoryKubeClient::new();
    let queues = QueueManager::new();
    let repo = limited_repo(Some(1));
    queues.add_list_to_running_queue(&repo, &["ci/gone".to_string()]);

    let more = sync_once(&kube, &queues, &repo).await.unwrap();

    assert!(!more);
    assert!(queues.running(&repo).is_empty());
}

#[tokio::test]
async fn test_sync_once_skips_pending_runs_deleted_from_cluster() {
    let kube = MemoryKubeClient::new();
    let queues = QueueManager::new();
    let repo = limited_repo(Some(1));
    kube.insert_pipeline_run(pending_run("third", Some("app")));
    queues.add_to_pending_queue(&repo, &["ci/vanished".to_string(), "ci/third".to_string()]);

    sync_once(&kube, &queues, &repo).await.unwrap();

    assert_eq!(queues.running(&repo), vec!["ci/third".to_string()]);
    assert!(!stored(&kube, "third").await.is_pending());
}

/// Verify that the watcher started by a registration drains the queue once
/// the running run finishes.
#[tokio::test]
async fn test_watcher_starts_queued_run() {
    let (kube, manager) = setup(Some(1));
    kube.insert_pipeline_run(pending_run("first", Some("app")));
    kube.insert_pipeline_run(pending_run("second", Some("app")));
    manager.register("ci", "first").await.unwrap();
    manager.register("ci", "second").await.unwrap();

    let done = finished(stored(&kube, "first").await);
    kube.insert_pipeline_run(done);

    let mut started = false;
    for _ in 0..100 {
        if !stored(&kube, "second").await.is_pending() {
            started = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(started, "queued run was never started");
}

/// Verify that a watcher deciding to stop keeps watching when a run was
/// queued in the meantime.
#[test]
fn test_release_if_idle_keeps_watch_on_queued_repository() {
    // Arrange
    let repo = limited_repo(Some(1));
    let queues = QueueManager::new();
    let watched = Mutex::new(HashSet::from([repo_key(&repo)]));
    queues.add_to_pending_queue(&repo, &["ci/late".to_string()]);

    // Act
    let released = release_if_idle(&watched, &queues, &repo);

    // Assert
    assert!(!released);
    assert!(lock(&watched).contains(&repo_key(&repo)));
}

#[test]
fn test_release_if_idle_drops_empty_repository() {
    let repo = limited_repo(Some(1));
    let queues = QueueManager::new();
    let watched = Mutex::new(HashSet::from([repo_key(&repo)]));

    let released = release_if_idle(&watched, &queues, &repo);

    assert!(released);
    assert!(lock(&watched).is_empty());
}

/// Verify that a registration after the watcher stopped starts a new one.
#[tokio::test]
async fn test_registration_after_watcher_exit_is_watched() {
    // Arrange: drain the queue so the first watcher exits
    let (kube, manager) = setup(Some(1));
    kube.insert_pipeline_run(pending_run("first", Some("app")));
    manager.register("ci", "first").await.unwrap();
    kube.insert_pipeline_run(finished(stored(&kube, "first").await));
    for _ in 0..100 {
        if lock(&manager.watched).is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(lock(&manager.watched).is_empty(), "watcher never stopped");

    // Act
    kube.insert_pipeline_run(pending_run("second", Some("app")));
    kube.insert_pipeline_run(pending_run("third", Some("app")));
    manager.register("ci", "second").await.unwrap();
    manager.register("ci", "third").await.unwrap();
    kube.insert_pipeline_run(finished(stored(&kube, "second").await));

    // Assert
    let mut started = false;
    for _ in 0..100 {
        if !stored(&kube, "third").await.is_pending() {
            started = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(started, "run queued after the watcher restarted was never started");
}
