//! Skipping templates that already succeeded on a commit.
//!
//! `/retest` and `/ok-to-test` rerun the pull request's templates, except
//! those whose latest run on the same commit succeeded.

use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use crate::event::{event_types, Event};
use crate::formatting::clean_label_value;
use crate::keys;
use crate::kube::{KubeClient, KubeError, LabelSelector};
use crate::tekton::PipelineRun;

use super::Match;

/// Event types whose matches are filtered.
pub fn applies_to(event: &Event) -> bool {
    event.event_type == event_types::RETEST_ALL_COMMENT
        || event.event_type == event_types::OK_TO_TEST_COMMENT
}

/// Drop matches whose latest run on `event.sha` succeeded.
pub async fn filter_successful_reruns(
    kube: &dyn KubeClient,
    event: &Event,
    matches: Vec<Match>,
) -> Result<Vec<Match>, KubeError> {
    if !applies_to(event) || event.sha.is_empty() || matches.is_empty() {
        return Ok(matches);
    }

    let mut latest: BTreeMap<(String, String), PipelineRun> = BTreeMap::new();
    let namespaces: BTreeSet<String> = matches
        .iter()
        .map(|m| m.repo.namespace().to_string())
        .collect();
    let selector = LabelSelector::new().equals(keys::SHA, clean_label_value(&event.sha));
    for namespace in namespaces {
        for run in kube.list_pipeline_runs(Some(&namespace), &selector).await? {
            let Some(template) = run.original_prname().map(str::to_string) else {
                continue;
            };
            let key = (namespace.clone(), template);
            let newer = latest
                .get(&key)
                .map(|current| run.metadata.creation_timestamp > current.metadata.creation_timestamp)
                .unwrap_or(true);
            if newer {
                latest.insert(key, run);
            }
        }
    }

    Ok(matches
        .into_iter()
        .filter(|m| {
            let key = (
                m.repo.namespace().to_string(),
                m.pipeline_run.template_name(),
            );
            let succeeded = latest.get(&key).map(PipelineRun::is_successful).unwrap_or(false);
            if succeeded {
                info!(
                    template = %key.1,
                    sha = %event.sha,
                    "Skipping template, it already succeeded on this commit"
                );
            }
            !succeeded
        })
        .collect())
}
