//! End-to-end webhook scenarios
//!
//! Each test posts a webhook to the router and checks the PipelineRuns left
//! in the in-memory cluster and the statuses reported to the provider.

mod common;

use axum::http::StatusCode;
use common::{
    pull_request_event, push_event, scripted_webhook, template, CapturedLogs, TestHarness,
    REPO_URL,
};
use pac_core::keys;
use pac_core::Repository;
use pac_core::provider::{CommitStatus, RunStatus, ScriptedProvider};
use pac_core::status::VALIDATION_ERROR_HEADER;
use pac_core::tekton::spec_status;
use std::sync::Arc;

fn harness(provider: &ScriptedProvider, limit: Option<i32>) -> TestHarness {
    TestHarness::new(vec![Arc::new(provider.clone())], limit)
}

/// Verify that a pull request matching one template starts exactly one
/// run and reports it in progress.
#[tokio::test]
async fn test_pull_request_with_single_matching_template() {
    // Arrange
    let provider = ScriptedProvider::new()
        .with_event(pull_request_event())
        .with_tekton_file(".tekton/pr.yaml", &template("pr-build", "pull_request", ""));
    let h = harness(&provider, None);

    // Act
    let (status, body) = h.send(scripted_webhook()).await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processed");
    let runs = h.kube.pipeline_runs();
    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert!(!run.is_pending());
    assert_eq!(run.metadata.labels[keys::STATE], keys::state::STARTED);
    assert_eq!(run.metadata.labels[keys::EVENT_TYPE], "pull_request");
    assert_eq!(run.metadata.labels[keys::BRANCH], "main");
    assert_eq!(run.metadata.labels[keys::ORIGINAL_PRNAME], "pr-build");
    assert_eq!(run.annotation(keys::ORIGINAL_PRNAME), Some("pr-build"));

    let statuses = provider.statuses();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].status, RunStatus::InProgress);
}

/// Verify that a CEL expression takes precedence over the event and branch
/// annotations and that the override is logged.
#[tokio::test]
async fn test_cel_expression_overrides_event_annotations() {
    // Arrange
    let annotations =
        "    pipelinesascode.tekton.dev/on-cel-expression: event == \"pull_request\"";
    let provider = ScriptedProvider::new()
        .with_event(pull_request_event())
        .with_tekton_file(".tekton/cel.yaml", &template("cel-build", "push", annotations));
    let h = harness(&provider, None);
    let logs = CapturedLogs::default();
    let _guard = logs.install();

    // Act
    let (status, body) = h.send(scripted_webhook()).await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processed");
    assert_eq!(h.run_named("cel-build-").metadata.labels[keys::ORIGINAL_PRNAME], "cel-build");
    let output = logs.contents();
    assert!(
        output.contains("on-cel-expression takes precedence"),
        "logs: {}",
        output
    );
    assert!(output.contains("cel-build"));
}

/// Verify that a second push on the same branch cancels the first run of
/// a cancel-in-progress template and leaves the new run alone.
#[tokio::test]
async fn test_second_push_cancels_first_run() {
    // Arrange
    let annotations = "    pipelinesascode.tekton.dev/cancel-in-progress: \"true\"";
    let provider = ScriptedProvider::new()
        .with_event(push_event("sha1"))
        .with_tekton_file(".tekton/push.yaml", &template("deploy", "push", annotations));
    let h = harness(&provider, None);

    let (_, first) = h.send(scripted_webhook()).await;
    let first_key = first["pipeline_runs"][0].as_str().unwrap().to_string();

    // Act
    let _ = provider.clone().with_event(push_event("sha2"));
    let (status, second) = h.send(scripted_webhook()).await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    let second_key = second["pipeline_runs"][0].as_str().unwrap().to_string();
    assert_ne!(first_key, second_key);
    let first_name = first_key.trim_start_matches("ci/");
    let second_name = second_key.trim_start_matches("ci/");
    assert_eq!(second["cancelled"], serde_json::json!([first_name]));
    assert_eq!(h.run_named(first_name).spec.status, spec_status::CANCELLED);
    assert!(h.run_named(second_name).spec.status.is_empty());
}

/// Verify that a concurrency limit creates every run pending, queued in
/// template name order.
#[tokio::test]
async fn test_concurrency_limit_queues_all_runs() {
    // Arrange
    let provider = ScriptedProvider::new()
        .with_event(pull_request_event())
        .with_tekton_file(".tekton/z.yaml", &template("zeta", "pull_request", ""))
        .with_tekton_file(".tekton/a.yaml", &template("alpha", "pull_request", ""));
    let h = harness(&provider, Some(1));

    // Act
    let (status, body) = h.send(scripted_webhook()).await;

    // Assert: both runs are created pending, alpha first
    assert_eq!(status, StatusCode::OK);
    let created: Vec<String> = body["pipeline_runs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert_eq!(created.len(), 2);
    assert!(created[0].starts_with("ci/alpha-"));
    assert!(created[1].starts_with("ci/zeta-"));
    let expected_order = created.join(",");
    for run in h.kube.pipeline_runs() {
        assert_eq!(run.spec.status, spec_status::PENDING);
        assert_eq!(run.annotation(keys::STATE), Some(keys::state::QUEUED));
        assert_eq!(
            run.annotation(keys::EXECUTION_ORDER),
            Some(expected_order.as_str())
        );
    }

    // Act: the reconciler builds the queue from the recorded order
    h.reconciler().reconcile_all().await.unwrap();

    // Assert
    let repo = Repository::new("ci", "app", REPO_URL);
    assert_eq!(h.queues.running(&repo), vec![created[0].clone()]);
    assert_eq!(h.queues.pending(&repo), vec![created[1].clone()]);
}

/// Verify that a sender failing access control gets a single skipped
/// status naming them and no run.
#[tokio::test]
async fn test_unauthorized_sender_is_skipped() {
    let mut event = pull_request_event();
    event.account_id = "4242".to_string();
    let provider = ScriptedProvider::new()
        .with_event(event)
        .with_allowed(false)
        .with_tekton_file(".tekton/pr.yaml", &template("pr-build", "pull_request", ""));
    let h = harness(&provider, None);

    let (status, body) = h.send(scripted_webhook()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "skipped");
    assert!(h.kube.pipeline_runs().is_empty());
    let statuses = provider.statuses();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].conclusion, CommitStatus::Skipped);
    assert!(statuses[0].text.contains("octocat"));
    assert!(statuses[0].text.contains("4242"));
}

/// Verify that a malformed document is reported in one comment while the
/// valid template still runs.
#[tokio::test]
async fn test_malformed_template_is_reported_once() {
    let provider = ScriptedProvider::new()
        .with_event(pull_request_event())
        .with_tekton_file(".tekton/pr.yaml", &template("pr-build", "pull_request", ""))
        .with_tekton_file(".tekton/broken.yaml", "metadata: [unclosed\nkind: PipelineRun\n");
    let h = harness(&provider, None);

    let (status, body) = h.send(scripted_webhook()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pipeline_runs"].as_array().unwrap().len(), 1);
    assert_eq!(body["validation_errors"].as_array().unwrap().len(), 1);
    let comments = provider.comments();
    assert_eq!(comments.len(), 1);
    assert!(comments[0].body.starts_with(VALIDATION_ERROR_HEADER));
    assert_eq!(comments[0].body.matches(".tekton/broken.yaml").count(), 1);
}
