//! Tests for glob patterns and branch matching.

use super::*;

#[test]
fn test_star_crosses_separators() {
    let pattern = Pattern::new("docs/*").unwrap();

    assert!(pattern.matches("docs/readme.md"));
    assert!(pattern.matches("docs/api/index.md"));
    assert!(!pattern.matches("src/docs/readme.md"));
}

#[test]
fn test_question_mark_and_classes() {
    assert!(matches("v?.0", "v1.0"));
    assert!(!matches("v?.0", "v10.0"));
    assert!(matches("file[0-9].txt", "file7.txt"));
    assert!(!matches("file[!0-9].txt", "file7.txt"));
    assert!(matches("file[!0-9].txt", "filex.txt"));
}

#[test]
fn test_alternatives() {
    let pattern = Pattern::new("**/*.{go,rs}").unwrap();

    assert!(pattern.matches("pkg/main.go"));
    assert!(pattern.matches("src/lib.rs"));
    assert!(!pattern.matches("src/lib.py"));
}

#[test]
fn test_regex_metacharacters_are_literal() {
    assert!(matches("a+b.(c)", "a+b.(c)"));
    assert!(!matches("a.b", "axb"));
}

#[test]
fn test_invalid_patterns_are_rejected() {
    assert!(Pattern::new("[abc").is_err());
    assert!(Pattern::new("{a,b").is_err());
    assert!(!matches("[abc", "a"));
}

/// Verify that bare and qualified branch names are interchangeable.
#[test]
fn test_branch_match_qualifies_bare_names() {
    assert!(branch_match("refs/heads/main", "main"));
    assert!(branch_match("main", "refs/heads/main"));
    assert!(branch_match("main", "main"));
    assert!(!branch_match("refs/heads/main", "refs/heads/main/foobar"));
    assert!(!branch_match("main", "maintenance"));
}

#[test]
fn test_branch_match_globs() {
    assert!(branch_match("refs/heads/*", "refs/heads/x"));
    assert!(branch_match("release-*", "release-1.2"));
    assert!(branch_match("refs/tags/0.*", "refs/tags/0.5"));
    assert!(!branch_match("refs/tags/0.*", "0.5"));
}
