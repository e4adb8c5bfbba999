//! Annotation value syntax and the per-annotation predicates.
//!
//! A value is either a bare string or a bracketed list, `[a, b, c]`.
//! Commas inside list items are written `&#44;`.

use regex::Regex;
use std::sync::OnceLock;

use crate::event::ChangedFiles;
use crate::glob;

use super::MatchError;

const ESCAPED_COMMA: &str = "&#44;";

fn value_syntax() -> &'static Regex {
    static SYNTAX: OnceLock<Regex> = OnceLock::new();
    SYNTAX.get_or_init(|| {
        Regex::new(r"^\[(.*)\]$|^[^\[\]\s]*$").expect("annotation syntax regex is valid")
    })
}

/// Split an annotation value into its items.
pub fn annotation_values(annotation: &str, value: &str) -> Result<Vec<String>, MatchError> {
    let value = value.trim();
    let invalid = |message: &str| MatchError::Annotation {
        annotation: annotation.to_string(),
        message: message.to_string(),
    };

    let Some(captures) = value_syntax().captures(value) else {
        return Err(invalid("annotations in pipeline are in wrong format"));
    };
    let Some(inner) = captures.get(1) else {
        return Ok(vec![value.replace(ESCAPED_COMMA, ",")]);
    };

    let items: Vec<String> = inner
        .as_str()
        .split(',')
        .map(|item| item.trim().replace(ESCAPED_COMMA, ","))
        .collect();
    if items.first().map(String::is_empty).unwrap_or(true) {
        return Err(invalid("annotations in pipeline are empty"));
    }
    Ok(items)
}

/// `on-event` contains the trigger. Incoming webhooks also match `push`.
pub fn event_matches(values: &[String], trigger: &str, is_incoming: bool) -> bool {
    values
        .iter()
        .any(|v| v == trigger || (is_incoming && (v == "incoming" || v == "push")))
}

/// `on-target-branch` matches the base branch.
pub fn branch_matches(values: &[String], base_branch: &str) -> bool {
    values.iter().any(|v| glob::branch_match(v, base_branch))
}

/// `on-label` contains one of the pull request labels.
pub fn label_matches(values: &[String], labels: &[String]) -> bool {
    values.iter().any(|v| labels.contains(v))
}

/// Path filters. Files matched by an ignore pattern are removed first;
/// with `on-path-change` a remaining file must match one of its globs,
/// otherwise any remaining file matches.
pub fn paths_match(changes: &[String], ignores: &[String], files: &ChangedFiles) -> bool {
    let candidates = files
        .all
        .iter()
        .filter(|f| !ignores.iter().any(|pattern| glob::matches(pattern, f)));

    let mut candidates = candidates.peekable();
    if changes.is_empty() {
        return candidates.peek().is_some();
    }
    candidates.any(|f| changes.iter().any(|pattern| glob::matches(pattern, f)))
}

/// Compile the `on-comment` regex and test it against the comment.
pub fn comment_matches(pattern: &str, comment: &str) -> Result<bool, MatchError> {
    let re = Regex::new(pattern.trim()).map_err(|e| MatchError::Annotation {
        annotation: "on-comment".to_string(),
        message: format!("invalid regular expression: {}", e),
    })?;
    Ok(re.is_match(comment.trim()))
}

#[cfg(test)]
#[path = "annotations_tests.rs"]
mod tests;
