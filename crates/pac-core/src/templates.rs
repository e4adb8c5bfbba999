//! # Template Processor
//!
//! Substitutes `{{ name }}` placeholders in raw template text before it is
//! parsed as YAML. Names starting with `body`, `headers` or `files` are
//! evaluated as CEL against the event; any other name is looked up in the
//! parameter map. Unknown names and failing expressions leave the
//! placeholder untouched.

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

use crate::cel::{self, Activation};

/// Variables prefixed with one of these are CEL expressions.
const CEL_PREFIXES: &[&str] = &["body", "headers", "files"];

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^}]{2,})\}\}").expect("placeholder regex is valid"))
}

/// Replace placeholders using `params`; CEL placeholders see `context`.
pub fn render(template: &str, params: &BTreeMap<String, String>, context: &Activation) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &Captures<'_>| {
            let original = caps[0].to_string();
            let key = caps[1].trim();

            if is_cel_key(key) {
                return match cel::evaluate(key, context) {
                    Ok(value) => value.to_display_string(),
                    Err(err) => {
                        debug!(placeholder = %key, error = %err, "leaving placeholder unresolved");
                        original
                    }
                };
            }

            params.get(key).cloned().unwrap_or(original)
        })
        .into_owned()
}

/// Replace placeholders from `params` only.
pub fn render_params(template: &str, params: &BTreeMap<String, String>) -> String {
    render(template, params, &Activation::new())
}

/// Placeholder names referenced by `template`, trimmed, in order of
/// appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    placeholder_regex()
        .captures_iter(template)
        .map(|c| c[1].trim().to_string())
        .collect()
}

fn is_cel_key(key: &str) -> bool {
    CEL_PREFIXES.iter().any(|prefix| {
        key.strip_prefix(prefix)
            .map(|rest| rest.is_empty() || rest.starts_with('.') || rest.starts_with('['))
            .unwrap_or(false)
    })
}

#[cfg(test)]
#[path = "templates_tests.rs"]
mod tests;
