//! # Queue Manager
//!
//! Per-Repository priority semaphores for runs admitted in the pending
//! state. Each Repository key (`namespace/name`) owns a running set bounded
//! by the concurrency limit and a pending list ordered by arrival. Keys of
//! runs are `namespace/name` too.
//!
//! The manager is in-process state; [`QueueManager::init_queues`] rebuilds
//! it from the cluster at startup using the `execution-order` annotation.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::formatting::clean_label_value;
use crate::keys;
use crate::kube::{KubeClient, LabelSelector};
use crate::repository::Repository;
use crate::tekton::PipelineRun;

use super::ConcurrencyError;

/// `namespace/name` key of a Repository.
pub fn repo_key(repo: &Repository) -> String {
    repo.metadata.key()
}

#[derive(Debug, Default)]
struct PrioritySemaphore {
    limit: usize,
    running: BTreeSet<String>,
    /// Pending keys with their arrival sequence, kept sorted.
    pending: Vec<(u64, String)>,
}

impl PrioritySemaphore {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    fn is_pending(&self, key: &str) -> bool {
        self.pending.iter().any(|(_, k)| k == key)
    }

    fn add(&mut self, key: &str, seq: u64) -> bool {
        if key.is_empty() || self.running.contains(key) || self.is_pending(key) {
            return false;
        }
        self.pending.push((seq, key.to_string()));
        self.pending.sort();
        true
    }

    fn remove_pending(&mut self, key: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|(_, k)| k != key);
        before != self.pending.len()
    }

    fn acquire_next(&mut self) -> Option<String> {
        if self.pending.is_empty() || self.running.len() >= self.limit {
            return None;
        }
        let (_, key) = self.pending.remove(0);
        self.running.insert(key.clone());
        Some(key)
    }

    fn release(&mut self, key: &str) -> bool {
        self.running.remove(key)
    }

    fn pending_keys(&self) -> Vec<String> {
        self.pending.iter().map(|(_, k)| k.clone()).collect()
    }
}

#[derive(Debug, Default)]
struct Queues {
    semaphores: HashMap<String, PrioritySemaphore>,
    seq: u64,
}

impl Queues {
    fn semaphore(&mut self, repo: &Repository) -> &mut PrioritySemaphore {
        let limit = repo.spec.effective_concurrency_limit().unwrap_or(0);
        let sema = self
            .semaphores
            .entry(repo_key(repo))
            .or_insert_with(|| PrioritySemaphore::new(limit));
        if sema.limit != limit {
            debug!(repository = %repo_key(repo), from = sema.limit, to = limit, "Resizing queue");
            sema.limit = limit;
        }
        sema
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

/// In-process queues of pending PipelineRuns, one per Repository.
#[derive(Debug, Default)]
pub struct QueueManager {
    queues: Mutex<Queues>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues `keys` in order and moves as many as the limit allows to
    /// running. Returns the keys that acquired a slot.
    ///
    /// Without a limit nothing is acquired and the whole pending list is
    /// returned.
    pub fn add_list_to_running_queue(&self, repo: &Repository, keys: &[String]) -> Vec<String> {
        let mut queues = self.lock();
        let seqs: Vec<u64> = keys.iter().map(|_| queues.next_seq()).collect();
        let sema = queues.semaphore(repo);
        for (key, seq) in keys.iter().zip(seqs) {
            if sema.add(key, seq) {
                info!(pipelinerun = %key, repository = %repo_key(repo), "Added PipelineRun to running queue");
            }
        }

        if sema.limit == 0 {
            return sema.pending_keys();
        }
        let mut acquired = Vec::new();
        while let Some(key) = sema.acquire_next() {
            info!(pipelinerun = %key, repository = %repo_key(repo), "Moved PipelineRun to running");
            acquired.push(key);
        }
        acquired
    }

    /// Queues `keys` without acquiring any slot.
    pub fn add_to_pending_queue(&self, repo: &Repository, keys: &[String]) {
        let mut queues = self.lock();
        let seqs: Vec<u64> = keys.iter().map(|_| queues.next_seq()).collect();
        let sema = queues.semaphore(repo);
        for (key, seq) in keys.iter().zip(seqs) {
            if sema.add(key, seq) {
                info!(pipelinerun = %key, repository = %repo_key(repo), "Added PipelineRun to pending queue");
            }
        }
    }

    /// Drops `pr_key` from the Repository queue, running or pending.
    /// Returns true when it was known.
    pub fn remove_from_queue(&self, repo_key: &str, pr_key: &str) -> bool {
        let mut queues = self.lock();
        let Some(sema) = queues.semaphores.get_mut(repo_key) else {
            return false;
        };
        let was_pending = sema.remove_pending(pr_key);
        let released = sema.release(pr_key);
        if released {
            info!(pipelinerun = %pr_key, repository = %repo_key, "Removed running PipelineRun");
        } else if was_pending {
            info!(pipelinerun = %pr_key, repository = %repo_key, "Removed pending PipelineRun");
        }
        released || was_pending
    }

    /// Removes a finished run and hands its slot to the next pending one.
    /// Returns the key of the run that should now start.
    pub fn remove_and_take_item_from_queue(
        &self,
        repo: &Repository,
        run: &PipelineRun,
    ) -> Option<String> {
        self.remove_key_and_take_next(repo, &run.metadata.key())
    }

    /// Same as [`QueueManager::remove_and_take_item_from_queue`] for a run
    /// known only by its `namespace/name` key.
    pub fn remove_key_and_take_next(&self, repo: &Repository, pr_key: &str) -> Option<String> {
        let repo_key = repo_key(repo);
        if !self.remove_from_queue(&repo_key, pr_key) {
            return None;
        }
        let mut queues = self.lock();
        let next = queues.semaphore(repo).acquire_next()?;
        info!(pipelinerun = %next, repository = %repo_key, "Moved PipelineRun to running");
        Some(next)
    }

    /// Keys holding a slot, sorted.
    pub fn running(&self, repo: &Repository) -> Vec<String> {
        self.lock()
            .semaphores
            .get(&repo_key(repo))
            .map(|s| s.running.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Keys waiting for a slot, in queue order.
    pub fn pending(&self, repo: &Repository) -> Vec<String> {
        self.lock()
            .semaphores
            .get(&repo_key(repo))
            .map(PrioritySemaphore::pending_keys)
            .unwrap_or_default()
    }

    /// Forgets the queue of a deleted Repository.
    pub fn remove_repository(&self, repo: &Repository) {
        self.lock().semaphores.remove(&repo_key(repo));
    }

    /// Rebuilds the queues of every limited Repository from the runs found
    /// in the cluster: started runs take their slots back, queued runs
    /// return to the pending list in execution order.
    pub async fn init_queues(&self, kube: &dyn KubeClient) -> Result<(), ConcurrencyError> {
        let repos = kube.list_repositories(None).await?;
        for repo in repos {
            if repo.spec.effective_concurrency_limit().is_none() {
                continue;
            }
            info!(
                repository = %repo_key(&repo),
                limit = ?repo.spec.concurrency_limit,
                "Initializing queue for repository"
            );

            let mut recovery_errors = Vec::new();
            for state in [keys::state::STARTED, keys::state::QUEUED] {
                let selector = LabelSelector::new()
                    .equals(keys::STATE, state)
                    .equals(keys::REPOSITORY, clean_label_value(repo.name()));
                let mut runs = match kube
                    .list_pipeline_runs(Some(repo.namespace()), &selector)
                    .await
                {
                    Ok(runs) => runs,
                    Err(e) => {
                        warn!(repository = %repo_key(&repo), state, error = %e, "Failed to list PipelineRuns");
                        continue;
                    }
                };
                runs.sort_by_key(|pr| pr.metadata.creation_timestamp);

                for pr in runs.iter().filter(|pr| is_managed(pr)) {
                    let Some(order) = pr.annotation(keys::EXECUTION_ORDER) else {
                        recovery_errors.push(ConcurrencyError::MissingAnnotation {
                            key: pr.metadata.key(),
                            annotation: keys::EXECUTION_ORDER.to_string(),
                        });
                        continue;
                    };
                    let ordered = filter_by_state(kube, order, state).await;
                    if ordered.is_empty() {
                        warn!(pipelinerun = %pr.metadata.key(), "No valid PipelineRuns found in execution order");
                        continue;
                    }
                    if state == keys::state::STARTED {
                        self.add_list_to_running_queue(&repo, &ordered);
                    } else {
                        self.add_to_pending_queue(&repo, &ordered);
                    }
                }
            }

            if recovery_errors.is_empty() {
                info!(
                    repository = %repo_key(&repo),
                    running = self.running(&repo).len(),
                    pending = self.pending(&repo).len(),
                    "Queue recovery completed"
                );
            } else {
                for e in &recovery_errors {
                    warn!(repository = %repo_key(&repo), error = %e, "Queue recovery error");
                }
            }
        }
        Ok(())
    }
}

fn is_managed(pr: &PipelineRun) -> bool {
    pr.metadata.labels.get(keys::MANAGED_BY).map(String::as_str) == Some(keys::MANAGED_BY_VALUE)
        && pr.metadata.annotations.contains_key(keys::REPOSITORY)
}

/// Keys of `order` whose run still exists and carries `state`. Queued runs
/// must also still be pending.
async fn filter_by_state(kube: &dyn KubeClient, order: &str, state: &str) -> Vec<String> {
    let mut out = Vec::new();
    for key in order.split(',').map(str::trim).filter(|k| !k.is_empty()) {
        let Ok((namespace, name)) = super::split_key(key) else {
            continue;
        };
        let Ok(pr) = kube.get_pipeline_run(namespace, name).await else {
            continue;
        };
        if pr.annotation(keys::STATE) != Some(state) {
            continue;
        }
        if state == keys::state::QUEUED && !pr.is_pending() {
            continue;
        }
        out.push(key.to_string());
    }
    out
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
