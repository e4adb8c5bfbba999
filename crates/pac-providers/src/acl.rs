//! # Access Control Helpers
//!
//! `OWNERS` / `OWNERS_ALIASES` evaluation shared by the providers.
//!
//! An `OWNERS` file lists `approvers` and `reviewers`, either at the top
//! level or under `filters: {".*": {...}}`. Entries may name an alias
//! defined in `OWNERS_ALIASES`. Both files are read from the default branch.

use pac_core::event::Event;
use pac_core::opscomments;
use pac_core::provider::{Provider, ProviderError};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

pub const OWNERS_FILE: &str = "OWNERS";
pub const OWNERS_ALIASES_FILE: &str = "OWNERS_ALIASES";

/// Filter key applying to every path.
const MATCH_ALL_FILTER: &str = ".*";

#[derive(Debug, Default, Deserialize)]
struct OwnerLists {
    #[serde(default)]
    approvers: Vec<String>,
    #[serde(default)]
    reviewers: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OwnersConfig {
    #[serde(default)]
    approvers: Vec<String>,
    #[serde(default)]
    reviewers: Vec<String>,
    #[serde(default)]
    filters: BTreeMap<String, OwnerLists>,
}

#[derive(Debug, Default, Deserialize)]
struct OwnersAliases {
    #[serde(default)]
    aliases: BTreeMap<String, Vec<String>>,
}

fn parse_yaml<T: Default + for<'de> Deserialize<'de>>(
    content: &str,
    file: &str,
) -> Result<T, ProviderError> {
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str::<Option<T>>(content)
        .map(Option::unwrap_or_default)
        .map_err(|e| ProviderError::InvalidPayload {
            message: format!("cannot parse {}: {}", file, e),
        })
}

/// Replaces alias names by their members.
fn expand_aliases(owners: Vec<String>, aliases: &OwnersAliases) -> Vec<String> {
    owners
        .into_iter()
        .flat_map(|owner| match aliases.aliases.get(&owner) {
            Some(members) => members.clone(),
            None => vec![owner],
        })
        .collect()
}

/// Whether `sender` is an approver or reviewer in the given files.
pub fn user_in_owner_file(
    owners_content: &str,
    aliases_content: &str,
    sender: &str,
) -> Result<bool, ProviderError> {
    let owners: OwnersConfig = parse_yaml(owners_content, OWNERS_FILE)?;
    let aliases: OwnersAliases = parse_yaml(aliases_content, OWNERS_ALIASES_FILE)?;

    let mut allowed = owners.approvers;
    allowed.extend(owners.reviewers);
    if let Some(all) = owners.filters.get(MATCH_ALL_FILTER) {
        allowed.extend(all.approvers.iter().cloned());
        allowed.extend(all.reviewers.iter().cloned());
    }

    Ok(expand_aliases(allowed, &aliases)
        .iter()
        .any(|owner| owner == sender))
}

/// Reads a file from the default branch; a missing file reads as empty.
async fn default_branch_file<P: Provider + ?Sized>(
    provider: &P,
    event: &Event,
    path: &str,
) -> Result<String, ProviderError> {
    match provider
        .get_file_inside_repo(event, path, &event.default_branch)
        .await
    {
        Ok(content) => Ok(content),
        Err(ProviderError::NotFound { .. }) => {
            debug!(file = %path, branch = %event.default_branch, "File not found on default branch");
            Ok(String::new())
        }
        Err(e) => Err(e),
    }
}

/// Whether `sender` is listed in the repository's `OWNERS` file.
pub async fn sender_in_owners<P: Provider + ?Sized>(
    provider: &P,
    event: &Event,
    sender: &str,
) -> Result<bool, ProviderError> {
    let owners = default_branch_file(provider, event, OWNERS_FILE).await?;
    if owners.trim().is_empty() {
        return Ok(false);
    }
    let aliases = default_branch_file(provider, event, OWNERS_ALIASES_FILE).await?;
    user_in_owner_file(&owners, &aliases, sender)
}

/// A pull request comment as returned by a provider API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestComment {
    pub author: String,
    pub body: String,
}

/// Authors of `/ok-to-test` comments, in posting order and without
/// duplicates.
pub fn ok_to_test_authors(comments: &[PullRequestComment]) -> Vec<String> {
    let mut authors: Vec<String> = Vec::new();
    for comment in comments {
        if opscomments::is_ok_to_test_comment(&comment.body, opscomments::DEFAULT_PREFIX)
            && !authors.contains(&comment.author)
        {
            authors.push(comment.author.clone());
        }
    }
    authors
}

#[cfg(test)]
#[path = "acl_tests.rs"]
mod tests;
