//! # GitOps Comments
//!
//! Classifies pull request comments such as `/retest`, `/test <name>`,
//! `/ok-to-test [sha]` and `/cancel [name]`, and parses the `key=value`
//! arguments that may follow the command.

use regex::Regex;
use std::collections::BTreeMap;

use crate::event::{event_types, Event, TriggerType};

/// Default command prefix.
pub const DEFAULT_PREFIX: &str = "/";

const RETEST_ALL: &str = r"(?m)^\s*{prefix}retest\s*$";
const RETEST_SINGLE: &str = r"(?m)^\s*{prefix}retest[ \t]+\S+";
const TEST_ALL: &str = r"(?m)^\s*{prefix}test\s*$";
const TEST_SINGLE: &str = r"(?m)^\s*{prefix}test[ \t]+\S+";
const OK_TO_TEST: &str =
    r"(^|\n)\s*{prefix}ok-to-test(?:[ \t]+([a-fA-F0-9]{7,40}))?[ \t]*(\r\n|\r|\n|$)";
const CANCEL_ALL: &str = r"(?m)^\s*{prefix}cancel\s*$";
const CANCEL_SINGLE: &str = r"(?m)^\s*{prefix}cancel[ \t]+\S+";

/// Compile a command pattern for `prefix`. The prefix is escaped, so only
/// a broken template could fail to compile.
fn command_regex(template: &str, prefix: &str) -> Option<Regex> {
    Regex::new(&template.replace("{prefix}", &regex::escape(prefix))).ok()
}

fn is_command(template: &str, prefix: &str, comment: &str) -> bool {
    command_regex(template, prefix)
        .map(|re| re.is_match(comment))
        .unwrap_or(false)
}

/// Event type of a comment; `no-ops-comment` when no command is present.
pub fn comment_event_type(comment: &str, prefix: &str) -> &'static str {
    if is_command(RETEST_ALL, prefix, comment) {
        event_types::RETEST_ALL_COMMENT
    } else if is_command(RETEST_SINGLE, prefix, comment) {
        event_types::RETEST_COMMENT
    } else if is_command(TEST_ALL, prefix, comment) {
        event_types::TEST_ALL_COMMENT
    } else if is_command(TEST_SINGLE, prefix, comment) {
        event_types::TEST_COMMENT
    } else if is_command(OK_TO_TEST, prefix, comment) {
        event_types::OK_TO_TEST_COMMENT
    } else if is_command(CANCEL_ALL, prefix, comment) {
        event_types::CANCEL_ALL_COMMENT
    } else if is_command(CANCEL_SINGLE, prefix, comment) {
        event_types::CANCEL_COMMENT
    } else {
        event_types::NO_OPS_COMMENT
    }
}

/// Classify `comment` and record the result on the event: event type,
/// trigger comment, targeted PipelineRun and cancel state.
pub fn apply_comment(event: &mut Event, comment: &str, prefix: &str) {
    let event_type = comment_event_type(comment, prefix);
    match event_type {
        event_types::RETEST_COMMENT => {
            event.target_pipeline_run = name_from_comment(&format!("{}retest", prefix), comment);
        }
        event_types::TEST_COMMENT => {
            event.target_pipeline_run = name_from_comment(&format!("{}test", prefix), comment);
        }
        event_types::CANCEL_ALL_COMMENT => {
            event.state.cancel_pipeline_runs = true;
        }
        event_types::CANCEL_COMMENT => {
            event.state.cancel_pipeline_runs = true;
            event.state.target_cancel_pipeline_run =
                name_from_comment(&format!("{}cancel", prefix), comment);
        }
        _ => {}
    }
    event.event_type = event_type.to_string();
    event.trigger_comment = comment.to_string();
}

/// [`apply_comment`] followed by the trigger matching the command.
pub fn apply_comment_trigger(event: &mut Event, comment: &str, prefix: &str) {
    apply_comment(event, comment, prefix);
    event.trigger_target = if is_ok_to_test_comment(comment, prefix) {
        TriggerType::OkToTest
    } else if is_test_retest_comment(comment, prefix) {
        TriggerType::Retest
    } else if event.state.cancel_pipeline_runs {
        TriggerType::Cancel
    } else {
        TriggerType::Comment
    };
}

/// Whether the comment carries a command handled by the ops pipeline.
pub fn is_gitops_command(comment: &str, prefix: &str) -> bool {
    is_test_retest_comment(comment, prefix)
        || is_ok_to_test_comment(comment, prefix)
        || is_cancel_comment(comment, prefix)
}

pub fn is_ok_to_test_comment(comment: &str, prefix: &str) -> bool {
    is_command(OK_TO_TEST, prefix, comment)
}

pub fn is_test_retest_comment(comment: &str, prefix: &str) -> bool {
    is_command(TEST_SINGLE, prefix, comment)
        || is_command(TEST_ALL, prefix, comment)
        || is_command(RETEST_SINGLE, prefix, comment)
        || is_command(RETEST_ALL, prefix, comment)
}

pub fn is_cancel_comment(comment: &str, prefix: &str) -> bool {
    is_command(CANCEL_ALL, prefix, comment) || is_command(CANCEL_SINGLE, prefix, comment)
}

/// Optional SHA given to `/ok-to-test <sha>`.
pub fn sha_from_ok_to_test(comment: &str, prefix: &str) -> Option<String> {
    command_regex(OK_TO_TEST, prefix)?
        .captures(comment)
        .and_then(|c| c.get(2))
        .map(|m| m.as_str().trim().to_string())
}

/// True for every comment-derived event type, `on-comment` included.
pub fn is_any_ops_event_type(event_type: &str) -> bool {
    event_type == event_types::ON_COMMENT
        || (event_types::is_comment(event_type) && event_type != event_types::NO_OPS_COMMENT)
}

/// First word after `command` on the command's line.
fn name_from_comment(command: &str, comment: &str) -> String {
    let comment = comment.trim();
    let Some((_, rest)) = comment.split_once(command) else {
        return String::new();
    };
    let first_line = rest.lines().next().unwrap_or_default();
    let mut words = first_line.split(' ');
    // the first element is whatever directly follows the command
    words.next();
    words.next().map(|w| w.trim().to_string()).unwrap_or_default()
}

/// `key=value` arguments on the first line of a comment. Values may be
/// double quoted; `\"` inside quotes is an escaped quote.
pub fn comment_arguments(comment: &str) -> BTreeMap<String, String> {
    let first_line = comment.trim().lines().next().unwrap_or_default();
    split_arguments(first_line)
        .into_iter()
        .filter_map(|word| {
            let (key, value) = word.split_once('=')?;
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Whitespace separated words; quotes group and are removed.
fn split_arguments(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

#[cfg(test)]
#[path = "opscomments_tests.rs"]
mod tests;
