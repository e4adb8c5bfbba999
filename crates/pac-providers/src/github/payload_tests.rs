//! Tests for GitHub payload detection and parsing.

use super::*;
use serde_json::json;
use std::collections::BTreeMap;

fn request(event: &str, body: serde_json::Value) -> WebhookRequest {
    let mut headers = BTreeMap::new();
    headers.insert(EVENT_HEADER.to_string(), event.to_string());
    WebhookRequest::new(headers, serde_json::to_vec(&body).unwrap())
}

fn repository() -> serde_json::Value {
    json!({
        "id": 7,
        "name": "app",
        "html_url": "https://github.com/org/app",
        "clone_url": "https://github.com/org/app.git",
        "default_branch": "main",
        "owner": {"login": "org", "id": 1}
    })
}

fn pull_request_body(action: &str) -> serde_json::Value {
    json!({
        "action": action,
        "number": 12,
        "repository": repository(),
        "sender": {"login": "octocat"},
        "installation": {"id": 99},
        "pull_request": {
            "number": 12,
            "title": "Add feature",
            "html_url": "https://github.com/org/app/pull/12",
            "user": {"login": "author"},
            "labels": [{"name": "bug"}],
            "head": {"ref": "feature", "sha": "abc123", "repo": {"html_url": "https://github.com/fork/app"}},
            "base": {"ref": "main", "sha": "def456", "repo": repository()}
        }
    })
}

fn comment_body(action: &str, state: &str, body: &str) -> serde_json::Value {
    json!({
        "action": action,
        "repository": repository(),
        "sender": {"login": "reviewer"},
        "issue": {
            "number": 12,
            "state": state,
            "pull_request": {"html_url": "https://github.com/org/app/pull/12"}
        },
        "comment": {"body": body}
    })
}

// ============================================================================
// Detection
// ============================================================================

#[test]
fn test_detect_ignores_other_providers() {
    let request = WebhookRequest::new(BTreeMap::new(), "{}");

    let detection = detect(&request).unwrap();

    assert!(!detection.matched);
    assert!(detection.skip_reason.is_none());
}

/// Verify that Gitea requests carrying GitHub headers are left to Gitea.
#[test]
fn test_detect_ignores_gitea_requests() {
    let mut request = request("push", json!({"pusher": {}}));
    request
        .headers
        .insert(GITEA_EVENT_HEADER.to_string(), "push".to_string());

    assert!(!detect(&request).unwrap().matched);
}

#[test]
fn test_detect_pull_request_actions() {
    for action in ["opened", "synchronize", "reopened", "closed", "labeled"] {
        let detection = detect(&request("pull_request", pull_request_body(action))).unwrap();
        assert!(detection.matched, "action {} should match", action);
    }

    let detection = detect(&request("pull_request", pull_request_body("edited"))).unwrap();
    assert!(!detection.matched);
    assert!(detection.skip_reason.unwrap().contains("edited"));
}

#[test]
fn test_detect_push_requires_pusher() {
    let with_pusher = json!({"after": "abc", "pusher": {"name": "octocat"}});
    let without_pusher = json!({"after": "abc"});

    assert!(detect(&request("push", with_pusher)).unwrap().matched);
    assert!(!detect(&request("push", without_pusher)).unwrap().matched);
}

#[test]
fn test_detect_skips_branch_deletion() {
    let body = json!({"after": ZERO_SHA, "pusher": {"name": "octocat"}});

    let detection = detect(&request("push", body)).unwrap();

    assert!(!detection.matched);
}

#[test]
fn test_detect_gitops_comment() {
    let detection = detect(&request("issue_comment", comment_body("created", "open", "/retest"))).unwrap();

    assert!(detection.matched);
    assert!(detection.is_gitops_comment);
}

#[test]
fn test_detect_plain_comment_is_matched_without_gitops_flag() {
    let detection =
        detect(&request("issue_comment", comment_body("created", "open", "/deploy staging"))).unwrap();

    assert!(detection.matched);
    assert!(!detection.is_gitops_comment);
}

#[test]
fn test_detect_skips_comments_on_closed_or_edited() {
    assert!(!detect(&request("issue_comment", comment_body("created", "closed", "/retest")))
        .unwrap()
        .matched);
    assert!(!detect(&request("issue_comment", comment_body("edited", "open", "/retest")))
        .unwrap()
        .matched);
}

#[test]
fn test_detect_check_run_rerequested() {
    let body = json!({"action": "rerequested", "check_run": {"check_suite": {"head_sha": "abc"}}});

    assert!(detect(&request("check_run", body)).unwrap().matched);
    assert!(!detect(&request("check_run", json!({"action": "created", "check_run": {}})))
        .unwrap()
        .matched);
}

#[test]
fn test_detect_unsupported_event_is_skipped() {
    let detection = detect(&request("star", json!({}))).unwrap();

    assert!(!detection.matched);
    assert!(detection.skip_reason.is_some());
}

#[test]
fn test_detect_invalid_json_is_error() {
    let mut headers = BTreeMap::new();
    headers.insert(EVENT_HEADER.to_string(), "push".to_string());

    let result = detect(&WebhookRequest::new(headers, "not json"));

    assert!(matches!(result, Err(ProviderError::InvalidPayload { .. })));
}

// ============================================================================
// Parsing
// ============================================================================

#[test]
fn test_parse_push() {
    let body = json!({
        "ref": "refs/heads/main",
        "before": "0000001",
        "after": "abc123",
        "repository": repository(),
        "sender": {"login": "octocat"},
        "pusher": {"name": "octocat"},
        "head_commit": {
            "id": "abc123",
            "message": "Fix build\n\nLonger description",
            "url": "https://github.com/org/app/commit/abc123"
        }
    });

    let parsed = parse_event("push", &serde_json::to_vec(&body).unwrap()).unwrap();

    let event = parsed.event;
    assert_eq!(event.trigger_target, TriggerType::Push);
    assert_eq!(event.event_type, "push");
    assert_eq!(event.organization, "org");
    assert_eq!(event.repository, "app");
    assert_eq!(event.sha, "abc123");
    assert_eq!(event.sha_title, "Fix build");
    assert_eq!(event.base_branch, "refs/heads/main");
    assert_eq!(event.head_branch, "refs/heads/main");
    assert_eq!(event.default_branch, "main");
    assert_eq!(event.sender, "octocat");
    assert_eq!(parsed.repository_id, 7);
}

#[test]
fn test_parse_push_without_head_commit_uses_before() {
    let body = json!({
        "ref": "refs/heads/main",
        "before": "beforesha",
        "repository": repository(),
        "pusher": {}
    });

    let parsed = parse_event("push", &serde_json::to_vec(&body).unwrap()).unwrap();

    assert_eq!(parsed.event.sha, "beforesha");
}

#[test]
fn test_parse_pull_request() {
    let parsed =
        parse_event("pull_request", &serde_json::to_vec(&pull_request_body("opened")).unwrap())
            .unwrap();

    let event = parsed.event;
    assert_eq!(event.trigger_target, TriggerType::PullRequest);
    assert_eq!(event.pull_request_number, Some(12));
    assert_eq!(event.pull_request_title, "Add feature");
    assert_eq!(event.sha, "abc123");
    assert_eq!(event.head_branch, "feature");
    assert_eq!(event.base_branch, "main");
    assert_eq!(event.head_url, "https://github.com/fork/app");
    assert_eq!(event.url, "https://github.com/org/app");
    assert_eq!(event.sender, "author");
    assert_eq!(event.pull_request_labels, vec!["bug"]);
    assert_eq!(event.installation_id, Some(99));
}

#[test]
fn test_parse_pull_request_closed_and_labeled_triggers() {
    let closed =
        parse_event("pull_request", &serde_json::to_vec(&pull_request_body("closed")).unwrap())
            .unwrap();
    let labeled =
        parse_event("pull_request", &serde_json::to_vec(&pull_request_body("labeled")).unwrap())
            .unwrap();

    assert_eq!(closed.event.trigger_target, TriggerType::PullRequestClosed);
    assert_eq!(labeled.event.trigger_target, TriggerType::PullRequestLabeled);
}

#[test]
fn test_parse_retest_comment() {
    let body = comment_body("created", "open", "/retest my-pipeline");

    let parsed = parse_event("issue_comment", &serde_json::to_vec(&body).unwrap()).unwrap();

    let event = parsed.event;
    assert_eq!(event.trigger_target, TriggerType::Retest);
    assert_eq!(event.event_type, event_types::RETEST_COMMENT);
    assert_eq!(event.target_pipeline_run, "my-pipeline");
    assert_eq!(event.pull_request_number, Some(12));
    assert_eq!(event.sender, "reviewer");
    assert!(event.sha.is_empty());
    assert!(event.base_branch.is_empty());
}

#[test]
fn test_parse_cancel_and_ok_to_test_comments() {
    let cancel = parse_event(
        "issue_comment",
        &serde_json::to_vec(&comment_body("created", "open", "/cancel")).unwrap(),
    )
    .unwrap();
    let ok = parse_event(
        "issue_comment",
        &serde_json::to_vec(&comment_body("created", "open", "/ok-to-test")).unwrap(),
    )
    .unwrap();

    assert_eq!(cancel.event.trigger_target, TriggerType::Cancel);
    assert!(cancel.event.state.cancel_pipeline_runs);
    assert_eq!(ok.event.trigger_target, TriggerType::OkToTest);
}

#[test]
fn test_parse_check_suite_without_pull_request_is_push() {
    let body = json!({
        "action": "rerequested",
        "repository": repository(),
        "sender": {"login": "octocat"},
        "check_suite": {"head_sha": "abc", "head_branch": "main", "pull_requests": []}
    });

    let parsed = parse_event("check_suite", &serde_json::to_vec(&body).unwrap()).unwrap();

    assert_eq!(parsed.event.trigger_target, TriggerType::Push);
    assert_eq!(parsed.event.base_branch, "main");
    assert_eq!(parsed.event.sha, "abc");
}

#[test]
fn test_parse_check_run_on_pull_request() {
    let body = json!({
        "action": "rerequested",
        "repository": repository(),
        "sender": {"login": "octocat"},
        "check_run": {"check_suite": {"head_sha": "abc", "head_branch": "feature", "pull_requests": [{"number": 4}]}}
    });

    let parsed = parse_event("check_run", &serde_json::to_vec(&body).unwrap()).unwrap();

    assert_eq!(parsed.event.trigger_target, TriggerType::PullRequest);
    assert_eq!(parsed.event.pull_request_number, Some(4));
}

#[test]
fn test_pull_request_number_from_url() {
    assert_eq!(
        pull_request_number_from_url("https://github.com/org/app/pull/42").unwrap(),
        42
    );
    assert!(pull_request_number_from_url("https://github.com/org/app/pull/abc").is_err());
}
