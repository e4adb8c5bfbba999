//! Tests for cancel-in-progress.

use super::*;
use crate::event::TriggerType;
use crate::kube::MemoryKubeClient;
use crate::resources::{Condition, ObjectMeta};
use crate::tekton::PipelineRunStatus;

const REPO_URL: &str = "https://github.com/org/app";

fn run(name: &str, template: &str, labels: &[(&str, &str)], annotations: &[(&str, &str)]) -> PipelineRun {
    let mut meta = ObjectMeta::named("ci", name);
    meta.labels.insert(keys::URL_REPOSITORY.to_string(), "app".to_string());
    meta.labels
        .insert(keys::ORIGINAL_PRNAME.to_string(), template.to_string());
    meta.annotations
        .insert(keys::ORIGINAL_PRNAME.to_string(), template.to_string());
    for (k, v) in labels {
        meta.labels.insert(k.to_string(), v.to_string());
    }
    for (k, v) in annotations {
        meta.annotations.insert(k.to_string(), v.to_string());
    }
    PipelineRun {
        api_version: "tekton.dev/v1".to_string(),
        kind: "PipelineRun".to_string(),
        metadata: meta,
        ..Default::default()
    }
}

fn finished(mut pr: PipelineRun) -> PipelineRun {
    pr.status = Some(PipelineRunStatus {
        conditions: vec![Condition::succeeded("True", "Succeeded", "done")],
        ..Default::default()
    });
    pr
}

fn push_event(branch: &str) -> Event {
    let mut event = Event::new("push", TriggerType::Push);
    event.repository = "app".to_string();
    event.url = REPO_URL.to_string();
    event.head_branch = branch.to_string();
    event.sha = "abc123".to_string();
    event
}

fn pr_event(number: u64) -> Event {
    let mut event = Event::new("pull_request", TriggerType::PullRequest);
    event.repository = "app".to_string();
    event.head_branch = "feature".to_string();
    event.pull_request_number = Some(number);
    event
}

fn repo() -> Repository {
    Repository::new("ci", "app", REPO_URL)
}

fn cancelled_names(kube: &MemoryKubeClient) -> Vec<String> {
    let mut names: Vec<String> = kube
        .pipeline_runs()
        .into_iter()
        .filter(|pr| pr.spec.status == spec_status::CANCELLED)
        .map(|pr| pr.metadata.name)
        .collect();
    names.sort();
    names
}

// ============================================================================
// Matching template
// ============================================================================

/// Verify that a new push run cancels the older run of the same template on
/// the same branch and leaves itself alone.
#[tokio::test]
async fn test_second_push_cancels_first() {
    let kube = MemoryKubeClient::new();
    let opt_in = [(keys::CANCEL_IN_PROGRESS, "true"), (keys::SOURCE_BRANCH, "refs/heads/main")];
    let first = run("build-a", "build", &[], &opt_in);
    let second = run("build-b", "build", &[], &opt_in);
    kube.insert_pipeline_run(first);
    kube.insert_pipeline_run(second.clone());

    let cancelled = cancel_in_progress_matching(
        &kube,
        &Settings::default(),
        &repo(),
        &push_event("main"),
        &second,
    )
    .await
    .unwrap();

    assert_eq!(cancelled, vec!["build-a"]);
    assert_eq!(cancelled_names(&kube), vec!["build-a"]);
}

#[tokio::test]
async fn test_other_branch_and_template_are_kept() {
    let kube = MemoryKubeClient::new();
    let opt_in = [(keys::CANCEL_IN_PROGRESS, "true"), (keys::SOURCE_BRANCH, "main")];
    kube.insert_pipeline_run(run(
        "build-other-branch",
        "build",
        &[],
        &[(keys::SOURCE_BRANCH, "refs/heads/release")],
    ));
    kube.insert_pipeline_run(run("lint-a", "lint", &[], &[]));
    let created = run("build-new", "build", &[], &opt_in);
    kube.insert_pipeline_run(created.clone());

    let cancelled = cancel_in_progress_matching(
        &kube,
        &Settings::default(),
        &repo(),
        &push_event("refs/heads/main"),
        &created,
    )
    .await
    .unwrap();

    assert!(cancelled.is_empty());
    assert!(cancelled_names(&kube).is_empty());
}

#[tokio::test]
async fn test_disabled_without_annotation_or_setting() {
    let kube = MemoryKubeClient::new();
    kube.insert_pipeline_run(run("build-a", "build", &[], &[]));
    let created = run("build-b", "build", &[], &[]);

    let cancelled = cancel_in_progress_matching(
        &kube,
        &Settings::default(),
        &repo(),
        &push_event("main"),
        &created,
    )
    .await
    .unwrap();

    assert!(cancelled.is_empty());
}

/// Verify that the annotation overrides the global switch.
#[tokio::test]
async fn test_annotation_false_overrides_global_setting() {
    let kube = MemoryKubeClient::new();
    kube.insert_pipeline_run(run("build-a", "build", &[], &[]));
    let created = run("build-b", "build", &[], &[(keys::CANCEL_IN_PROGRESS, "false")]);
    let settings = Settings {
        enable_cancel_in_progress_on_push: true,
        ..Default::default()
    };

    let cancelled =
        cancel_in_progress_matching(&kube, &settings, &repo(), &push_event("main"), &created)
            .await
            .unwrap();

    assert!(cancelled.is_empty());
}

#[tokio::test]
async fn test_global_setting_enables_cancel() {
    let kube = MemoryKubeClient::new();
    kube.insert_pipeline_run(run("build-a", "build", &[], &[]));
    let created = run("build-b", "build", &[], &[]);
    let settings = Settings {
        enable_cancel_in_progress_on_push: true,
        ..Default::default()
    };

    let cancelled =
        cancel_in_progress_matching(&kube, &settings, &repo(), &push_event("main"), &created)
            .await
            .unwrap();

    assert_eq!(cancelled, vec!["build-a"]);
}

/// Verify that pull request runs never cancel runs of another PR.
#[tokio::test]
async fn test_pull_request_scope() {
    let kube = MemoryKubeClient::new();
    let labels_pr = |n: &'static str| {
        vec![(keys::PULL_REQUEST, n), (keys::EVENT_TYPE, "pull_request")]
    };
    kube.insert_pipeline_run(run("build-pr1", "build", &labels_pr("1"), &[]));
    kube.insert_pipeline_run(run("build-pr2", "build", &labels_pr("2"), &[]));
    kube.insert_pipeline_run(run(
        "build-push",
        "build",
        &[(keys::EVENT_TYPE, "push")],
        &[],
    ));
    let created = run(
        "build-pr1-new",
        "build",
        &labels_pr("1"),
        &[(keys::CANCEL_IN_PROGRESS, "true")],
    );
    kube.insert_pipeline_run(created.clone());

    let cancelled = cancel_in_progress_matching(
        &kube,
        &Settings::default(),
        &repo(),
        &pr_event(1),
        &created,
    )
    .await
    .unwrap();

    assert_eq!(cancelled, vec!["build-pr1"]);
}

#[tokio::test]
async fn test_finished_and_pending_runs_are_skipped() {
    let kube = MemoryKubeClient::new();
    kube.insert_pipeline_run(finished(run("build-done", "build", &[], &[])));
    let mut pending = run("build-pending", "build", &[], &[]);
    pending.spec.status = spec_status::PENDING.to_string();
    kube.insert_pipeline_run(pending);
    let mut stopped = run("build-stopped", "build", &[], &[]);
    stopped.spec.status = spec_status::STOPPED_RUN_FINALLY.to_string();
    kube.insert_pipeline_run(stopped);
    let created = run("build-new", "build", &[], &[(keys::CANCEL_IN_PROGRESS, "true")]);

    let cancelled = cancel_in_progress_matching(
        &kube,
        &Settings::default(),
        &repo(),
        &push_event("main"),
        &created,
    )
    .await
    .unwrap();

    assert!(cancelled.is_empty());
    assert!(kube.patches().is_empty());
}

#[tokio::test]
async fn test_concurrency_limit_rejects_cancel() {
    let kube = MemoryKubeClient::new();
    let mut limited = repo();
    limited.spec.concurrency_limit = Some(1);
    let created = run("build-new", "build", &[], &[(keys::CANCEL_IN_PROGRESS, "true")]);

    let err = cancel_in_progress_matching(
        &kube,
        &Settings::default(),
        &limited,
        &push_event("main"),
        &created,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        ConcurrencyError::CancelWithConcurrencyLimit { .. }
    ));
}

/// Verify that a failed patch is reported as a Repository event and does
/// not fail the call.
#[tokio::test]
async fn test_patch_failure_emits_event() {
    let kube = MemoryKubeClient::new();
    kube.insert_pipeline_run(run("build-a", "build", &[], &[]));
    kube.fail_pipeline_run_patch(true);
    let created = run("build-b", "build", &[], &[(keys::CANCEL_IN_PROGRESS, "true")]);

    let cancelled = cancel_in_progress_matching(
        &kube,
        &Settings::default(),
        &repo(),
        &push_event("main"),
        &created,
    )
    .await
    .unwrap();

    assert!(cancelled.is_empty());
    let events = kube.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, EVENT_REASON);
    assert_eq!(events[0].severity, EventSeverity::Warning);
    assert!(events[0].message.contains("ci/build-a"));
}

// ============================================================================
// Comment
// ============================================================================

#[tokio::test]
async fn test_cancel_comment_targets_template() {
    let kube = MemoryKubeClient::new();
    let pr1 = [(keys::PULL_REQUEST, "7")];
    kube.insert_pipeline_run(run("build-x", "build", &pr1, &[]));
    kube.insert_pipeline_run(run("lint-x", "lint", &pr1, &[]));
    let mut event = pr_event(7);
    event.state.target_cancel_pipeline_run = "lint".to_string();

    let cancelled = cancel_from_comment(&kube, &repo(), &event).await.unwrap();

    assert_eq!(cancelled, vec!["lint-x"]);
}

#[tokio::test]
async fn test_cancel_all_comment_on_push_uses_sha() {
    let kube = MemoryKubeClient::new();
    kube.insert_pipeline_run(run("build-x", "build", &[(keys::SHA, "abc123")], &[]));
    kube.insert_pipeline_run(run("build-y", "build", &[(keys::SHA, "other")], &[]));

    let cancelled = cancel_from_comment(&kube, &repo(), &push_event("main"))
        .await
        .unwrap();

    assert_eq!(cancelled, vec!["build-x"]);
}

#[tokio::test]
async fn test_cancel_comment_without_runs_emits_info() {
    let kube = MemoryKubeClient::new();

    let cancelled = cancel_from_comment(&kube, &repo(), &pr_event(3))
        .await
        .unwrap();

    assert!(cancelled.is_empty());
    let events = kube.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, EventSeverity::Normal);
    assert!(events[0].message.starts_with("no pipelinerun found"));
}

// ============================================================================
// Closed pull request
// ============================================================================

#[tokio::test]
async fn test_closed_pull_request_cancels_opted_in_runs() {
    let kube = MemoryKubeClient::new();
    let base = [(keys::PULL_REQUEST, "5"), (keys::EVENT_TYPE, "pull_request")];
    let mut opted = base.to_vec();
    opted.push((keys::CANCEL_IN_PROGRESS, "true"));
    kube.insert_pipeline_run(run("build-opted", "build", &opted, &[]));
    kube.insert_pipeline_run(run("lint-plain", "lint", &base, &[]));

    let cancelled =
        cancel_for_closed_pull_request(&kube, &Settings::default(), &repo(), &pr_event(5))
            .await
            .unwrap();

    assert_eq!(cancelled, vec!["build-opted"]);
}

#[tokio::test]
async fn test_closed_pull_request_with_global_setting() {
    let kube = MemoryKubeClient::new();
    let base = [(keys::PULL_REQUEST, "5"), (keys::EVENT_TYPE, "retest-comment")];
    let mut opted_out = base.to_vec();
    opted_out.push((keys::CANCEL_IN_PROGRESS, "false"));
    kube.insert_pipeline_run(run("build-out", "build", &opted_out, &[]));
    kube.insert_pipeline_run(run("lint-plain", "lint", &base, &[]));
    let settings = Settings {
        enable_cancel_in_progress_on_pull_requests: true,
        ..Default::default()
    };

    let cancelled = cancel_for_closed_pull_request(&kube, &settings, &repo(), &pr_event(5))
        .await
        .unwrap();

    assert_eq!(cancelled, vec!["lint-plain"]);
}
