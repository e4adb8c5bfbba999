//! Shell-style glob patterns for branch names and changed file paths.
//!
//! Supported syntax: `*` and `**` (any run of characters, separators
//! included), `?` (one character), `[abc]`, `[a-z]` and `[!abc]` classes,
//! `{a,b}` alternatives and `\` escapes. Patterns are anchored at both ends.

use regex::Regex;

#[derive(Debug, Clone, thiserror::Error)]
pub enum GlobError {
    #[error("invalid glob pattern '{pattern}': {message}")]
    Invalid { pattern: String, message: String },
}

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, GlobError> {
        let invalid = |message: &str| GlobError::Invalid {
            pattern: pattern.to_string(),
            message: message.to_string(),
        };

        let mut out = String::from("^");
        let mut chars = pattern.chars().peekable();
        let mut alternation_depth = 0usize;

        while let Some(c) = chars.next() {
            match c {
                '*' => {
                    while chars.peek() == Some(&'*') {
                        chars.next();
                    }
                    out.push_str(".*");
                }
                '?' => out.push('.'),
                '\\' => {
                    let escaped = chars.next().ok_or_else(|| invalid("trailing escape"))?;
                    out.push_str(&regex::escape(&escaped.to_string()));
                }
                '[' => {
                    out.push('[');
                    if matches!(chars.peek(), Some('!') | Some('^')) {
                        chars.next();
                        out.push('^');
                    }
                    let mut closed = false;
                    let mut empty = true;
                    for c in chars.by_ref() {
                        if c == ']' && !empty {
                            closed = true;
                            break;
                        }
                        empty = false;
                        match c {
                            '\\' | '[' | ']' | '^' | '&' | '~' => {
                                out.push('\\');
                                out.push(c);
                            }
                            _ => out.push(c),
                        }
                    }
                    if !closed {
                        return Err(invalid("unclosed character class"));
                    }
                    out.push(']');
                }
                '{' => {
                    alternation_depth += 1;
                    out.push_str("(?:");
                }
                '}' if alternation_depth > 0 => {
                    alternation_depth -= 1;
                    out.push(')');
                }
                ',' if alternation_depth > 0 => out.push('|'),
                other => out.push_str(&regex::escape(&other.to_string())),
            }
        }

        if alternation_depth > 0 {
            return Err(invalid("unclosed alternation"));
        }
        out.push('$');

        let regex = Regex::new(&out).map_err(|e| invalid(&e.to_string()))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }
}

/// Compile and match in one step; invalid patterns never match.
pub fn matches(pattern: &str, candidate: &str) -> bool {
    Pattern::new(pattern)
        .map(|p| p.matches(candidate))
        .unwrap_or(false)
}

/// Match a branch pattern from an annotation against an event branch.
///
/// Bare names on either side are read as `refs/heads/<name>`, `refs/tags/`
/// and other fully qualified refs are kept as they are.
pub fn branch_match(pattern: &str, branch: &str) -> bool {
    let pattern = qualify_ref(pattern.trim());
    let branch = qualify_ref(branch.trim());
    pattern == branch || matches(&pattern, &branch)
}

fn qualify_ref(name: &str) -> String {
    if name.starts_with("refs/") {
        name.to_string()
    } else {
        format!("refs/heads/{}", name)
    }
}

#[cfg(test)]
#[path = "glob_tests.rs"]
mod tests;
