//! Tests for label selectors and merge patches.

use super::*;
use serde_json::json;

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_label_selector_matches() {
    let selector = LabelSelector::new()
        .equals("repo", "app")
        .in_values("state", &["started", "queued"])
        .exists("sha");

    assert!(selector.matches(&labels(&[("repo", "app"), ("state", "queued"), ("sha", "x")])));
    assert!(!selector.matches(&labels(&[("repo", "app"), ("state", "completed"), ("sha", "x")])));
    assert!(!selector.matches(&labels(&[("repo", "app"), ("state", "started")])));
    assert!(LabelSelector::new().matches(&BTreeMap::new()));
}

#[test]
fn test_label_selector_query_string() {
    let selector = LabelSelector::new()
        .equals("a", "1")
        .in_values("b", &["x", "y"])
        .exists("c");

    assert_eq!(selector.to_query_string(), "a=1,b in (x,y),c");
}

/// Verify RFC 7386 semantics: nulls remove keys, objects merge recursively.
#[test]
fn test_apply_merge_patch() {
    let mut target = json!({
        "metadata": {"annotations": {"keep": "1", "drop": "2"}},
        "spec": {"status": "PipelineRunPending", "params": [1]}
    });

    apply_merge_patch(
        &mut target,
        &json!({
            "metadata": {"annotations": {"drop": null, "new": "3"}},
            "spec": {"status": null, "params": [2, 3]}
        }),
    );

    assert_eq!(
        target,
        json!({
            "metadata": {"annotations": {"keep": "1", "new": "3"}},
            "spec": {"params": [2, 3]}
        })
    );
}

#[test]
fn test_kube_error_classification() {
    assert!(KubeError::conflict("Repository", "ns", "r").is_transient());
    assert!(!KubeError::not_found("Secret", "ns", "s").is_transient());
    assert!(KubeError::already_exists("Secret", "ns", "s").is_already_exists());
}
