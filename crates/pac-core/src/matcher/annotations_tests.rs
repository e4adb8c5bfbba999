//! Tests for annotation parsing and predicates.

use super::*;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_bare_value() {
    assert_eq!(
        annotation_values("on-event", "push").unwrap(),
        vec!["push"]
    );
}

#[test]
fn test_list_value_is_trimmed() {
    assert_eq!(
        annotation_values("on-event", "[pull_request, push ]").unwrap(),
        vec!["pull_request", "push"]
    );
}

#[test]
fn test_escaped_comma_is_kept_in_item() {
    assert_eq!(
        annotation_values("on-path-change", "[docs/{a&#44;b}.md, src/**]").unwrap(),
        vec!["docs/{a,b}.md", "src/**"]
    );
}

#[test]
fn test_empty_list_is_an_error() {
    let err = annotation_values("on-event", "[]").unwrap_err();

    assert!(err.to_string().contains("annotations in pipeline are empty"));
}

#[test]
fn test_bare_value_with_spaces_is_an_error() {
    assert!(annotation_values("on-event", "pull request").is_err());
}

#[test]
fn test_incoming_events_also_match_push() {
    let values = strings(&["push"]);

    assert!(event_matches(&values, "push", true));
    assert!(event_matches(&strings(&["incoming"]), "push", true));
    assert!(!event_matches(&strings(&["pull_request"]), "push", true));
}

#[test]
fn test_branch_matching_rules() {
    assert!(branch_matches(&strings(&["main"]), "refs/heads/main"));
    assert!(branch_matches(&strings(&["refs/heads/main"]), "main"));
    assert!(branch_matches(&strings(&["refs/tags/v*"]), "refs/tags/v1.2"));
    assert!(!branch_matches(&strings(&["refs/heads/main"]), "refs/heads/main/foobar"));
    assert!(!branch_matches(&strings(&["main"]), "refs/tags/main"));
}

#[test]
fn test_label_matching() {
    assert!(label_matches(&strings(&["bug", "docs"]), &strings(&["docs"])));
    assert!(!label_matches(&strings(&["bug"]), &strings(&["docs"])));
}

/// Verify that ignored files never satisfy a path filter.
#[test]
fn test_path_ignore_overrides_change() {
    let files = ChangedFiles {
        all: strings(&["docs/readme.md"]),
        ..Default::default()
    };

    assert!(paths_match(&strings(&["docs/**"]), &[], &files));
    assert!(!paths_match(&strings(&["docs/**"]), &strings(&["**/*.md"]), &files));
}

#[test]
fn test_ignore_only_matches_when_other_files_changed() {
    let docs_only = ChangedFiles {
        all: strings(&["docs/a.md"]),
        ..Default::default()
    };
    let mixed = ChangedFiles {
        all: strings(&["docs/a.md", "src/main.rs"]),
        ..Default::default()
    };
    let ignores = strings(&["docs/**"]);

    assert!(!paths_match(&[], &ignores, &docs_only));
    assert!(paths_match(&[], &ignores, &mixed));
}

#[test]
fn test_comment_regex() {
    assert!(comment_matches("^/hello-world", "  /hello-world please").unwrap());
    assert!(!comment_matches("^/hello-world", "say /hello-world").unwrap());
    assert!(comment_matches("(unclosed", "x").is_err());
}
