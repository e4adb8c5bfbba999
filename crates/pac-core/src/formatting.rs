//! Label sanitising, branch-name and duration helpers.

use chrono::{DateTime, Utc};

/// Maximum length of a Kubernetes label value.
pub const MAX_LABEL_LENGTH: usize = 63;

/// Turns an arbitrary string into a valid Kubernetes label value.
///
/// The result is lowercase, only contains `[a-z0-9_.-]`, starts and ends
/// with an alphanumeric character and is at most 63 characters long. `/`
/// becomes `-` and whitespace becomes `_`; other characters become `-`.
/// Over-long values keep their trailing 62 characters, which preserves the
/// distinctive end of branch names and URLs.
pub fn clean_label_value(s: &str) -> String {
    let mapped: String = s
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' | '.' | '-' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            c if c.is_whitespace() => '_',
            _ => '-',
        })
        .collect();

    let shortened = if mapped.len() > MAX_LABEL_LENGTH {
        // mapped is pure ASCII, byte slicing is safe
        &mapped[mapped.len() - (MAX_LABEL_LENGTH - 1)..]
    } else {
        mapped.as_str()
    };

    shortened
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// Removes a leading `refs/heads/`; tag refs are kept as-is.
pub fn strip_heads_prefix(branch: &str) -> &str {
    branch.strip_prefix("refs/heads/").unwrap_or(branch)
}

/// Formats a duration as `XmYs`, or `Ys` under a minute, `XhYm` over an hour.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    if seconds >= 3600 {
        format!("{}h{}m", seconds / 3600, (seconds % 3600) / 60)
    } else if seconds >= 60 {
        format!("{}m{}s", seconds / 60, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}

/// Formats the span between two optional timestamps, `---` when the start is
/// unknown; a missing end means "until now".
pub fn format_span(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> String {
    match start {
        Some(start) => {
            let end = end.unwrap_or_else(Utc::now);
            format_duration((end - start).num_seconds())
        }
        None => "---".to_string(),
    }
}

/// Splits `https://host/org/sub/repo` into (`org/sub`, `repo`).
pub fn org_repo_from_url(url: &str) -> Option<(String, String)> {
    let parsed = url::Url::parse(url.trim_end_matches('/')).ok()?;
    let path = parsed.path().trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let (org, repo) = path.rsplit_once('/')?;
    if org.is_empty() || repo.is_empty() {
        return None;
    }
    Some((org.to_string(), repo.to_string()))
}

/// Lowercase random alphanumeric suffix of `len` characters.
pub fn random_suffix(len: usize) -> String {
    use rand::Rng;

    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
#[path = "formatting_tests.rs"]
mod tests;
