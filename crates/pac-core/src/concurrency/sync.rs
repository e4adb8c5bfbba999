//! # Sync Manager
//!
//! Backs the scheduler registration endpoint. A pending PipelineRun is
//! registered against its Repository's queue; a watcher task per Repository
//! then polls the running runs, releases the finished ones and starts the
//! next pending run whenever a slot is free. The watcher exits once the
//! Repository has nothing running or pending.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::keys;
use crate::kube::{KubeClient, KubeError};
use crate::repository::Repository;
use crate::tekton::PipelineRun;

use super::queue::{repo_key, QueueManager};
use super::{start_pipeline_run, ConcurrencyError};

/// Delay between two polls of a Repository's running runs.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("pipelinerun doesn't exist {namespace}/{name}")]
    PipelineRunNotFound { namespace: String, name: String },

    #[error("pipelineRun {namespace}/{name} is not in pending state, unable to register")]
    NotPending { namespace: String, name: String },

    #[error("failed to find repository name annotation on pipelinerun {namespace}/{name}")]
    MissingRepositoryAnnotation { namespace: String, name: String },

    #[error("repository doesn't exist {namespace}/{name}")]
    RepositoryNotFound { namespace: String, name: String },

    #[error("invalid concurrency limit for repository : {name}")]
    NoConcurrencyLimit { name: String },

    #[error("kubernetes error: {0}")]
    Kube(#[from] KubeError),
}

impl SchedulerError {
    /// True for rejections caused by the request itself.
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Kube(_))
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::Kube(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn error_category(&self) -> crate::ErrorCategory {
        match self {
            Self::Kube(e) => e.error_category(),
            Self::NoConcurrencyLimit { .. } => crate::ErrorCategory::Configuration,
            _ => crate::ErrorCategory::Permanent,
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Starts registered pending runs as their Repository frees slots.
pub struct SyncManager {
    kube: Arc<dyn KubeClient>,
    queues: Arc<QueueManager>,
    poll_interval: Duration,
    watched: Arc<Mutex<HashSet<String>>>,
    cancel: CancellationToken,
}

impl SyncManager {
    pub fn new(kube: Arc<dyn KubeClient>, queues: Arc<QueueManager>) -> Self {
        Self {
            kube,
            queues,
            poll_interval: DEFAULT_POLL_INTERVAL,
            watched: Arc::new(Mutex::new(HashSet::new())),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Watchers stop when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn queues(&self) -> &Arc<QueueManager> {
        &self.queues
    }

    /// Checks that `namespace/name` can be scheduled and returns the run
    /// with its Repository.
    pub async fn validate(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(PipelineRun, Repository), SchedulerError> {
        let pr = match self.kube.get_pipeline_run(namespace, name).await {
            Ok(pr) => pr,
            Err(e) if e.is_not_found() => {
                return Err(SchedulerError::PipelineRunNotFound {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        if !pr.is_pending() {
            return Err(SchedulerError::NotPending {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }

        let repo_name = pr
            .annotation(keys::REPOSITORY)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| SchedulerError::MissingRepositoryAnnotation {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?
            .to_string();

        let repo = match self.kube.get_repository(namespace, &repo_name).await {
            Ok(repo) => repo,
            Err(e) if e.is_not_found() => {
                return Err(SchedulerError::RepositoryNotFound {
                    namespace: namespace.to_string(),
                    name: repo_name,
                })
            }
            Err(e) => return Err(e.into()),
        };

        if repo.spec.effective_concurrency_limit().is_none() {
            return Err(SchedulerError::NoConcurrencyLimit {
                name: repo.name().to_string(),
            });
        }
        Ok((pr, repo))
    }

    /// Validates and queues `namespace/name`, starting it right away when
    /// the Repository has a free slot. Returns the keys started by this
    /// call.
    #[instrument(skip(self))]
    pub async fn register(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Vec<String>, SchedulerError> {
        let (pr, repo) = self.validate(namespace, name).await?;
        let acquired = self
            .queues
            .add_list_to_running_queue(&repo, &[pr.metadata.key()]);

        let mut started = Vec::new();
        for key in acquired {
            match start_pipeline_run(self.kube.as_ref(), &key).await {
                Ok(_) => started.push(key),
                Err(e) => {
                    warn!(pipelinerun = %key, error = %e, "Cannot start registered PipelineRun");
                    self.queues.remove_from_queue(&repo_key(&repo), &key);
                }
            }
        }

        self.watch(repo);
        Ok(started)
    }

    /// Spawns the watcher of `repo` unless one is already running.
    fn watch(&self, repo: Repository) {
        let key = repo_key(&repo);
        if !lock(&self.watched).insert(key.clone()) {
            debug!(repository = %key, "Repository already watched");
            return;
        }

        let kube = Arc::clone(&self.kube);
        let queues = Arc::clone(&self.queues);
        let watched = Arc::clone(&self.watched);
        let cancel = self.cancel.clone();
        let interval = self.poll_interval;

        tokio::spawn(async move {
            info!(repository = %key, "Watching repository queue");
            loop {
                match sync_once(kube.as_ref(), &queues, &repo).await {
                    Ok(true) => {}
                    Ok(false) => {
                        if release_if_idle(&watched, &queues, &repo) {
                            info!(repository = %key, "Stopped watching repository queue");
                            return;
                        }
                        debug!(repository = %key, "Run queued while stopping, watching on");
                        continue;
                    }
                    Err(e) => {
                        error!(repository = %key, error = %e, "Queue sync failed");
                        break;
                    }
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            lock(&watched).remove(&key);
            info!(repository = %key, "Stopped watching repository queue");
        });
    }
}

fn lock(set: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(|e| e.into_inner())
}

/// Drops `repo` from the watched set when its queue is empty. The check
/// and the removal happen under the watched lock, so a registration
/// either lands before the check or spawns a fresh watcher after it.
fn release_if_idle(
    watched: &Mutex<HashSet<String>>,
    queues: &QueueManager,
    repo: &Repository,
) -> bool {
    let mut watched = lock(watched);
    if !queues.running(repo).is_empty() || !queues.pending(repo).is_empty() {
        return false;
    }
    watched.remove(&repo_key(repo));
    true
}

/// One pass over a Repository queue. Finished or deleted runs give their
/// slot to the next pending run. Returns false when the queue is empty.
pub async fn sync_once(
    kube: &dyn KubeClient,
    queues: &QueueManager,
    repo: &Repository,
) -> Result<bool, ConcurrencyError> {
    for key in queues.running(repo) {
        let Some((namespace, name)) = key.split_once('/') else {
            continue;
        };
        let finished = match kube.get_pipeline_run(namespace, name).await {
            Ok(pr) => pr.is_done(),
            Err(e) if e.is_not_found() => {
                info!(pipelinerun = %key, "PipelineRun not found, releasing its slot");
                true
            }
            Err(e) => return Err(e.into()),
        };
        if finished {
            queues.remove_from_queue(&repo_key(repo), &key);
        }
    }

    // Fill every free slot; runs deleted while queued are dropped.
    loop {
        let acquired = queues.add_list_to_running_queue(repo, &[]);
        if acquired.is_empty() {
            break;
        }
        let mut vanished = false;
        for candidate in acquired {
            match start_pipeline_run(kube, &candidate).await {
                Ok(_) => {}
                Err(ConcurrencyError::Kube(e)) if e.is_not_found() => {
                    info!(pipelinerun = %candidate, "Queued PipelineRun not found, removing it");
                    queues.remove_from_queue(&repo_key(repo), &candidate);
                    vanished = true;
                }
                Err(e) => return Err(e),
            }
        }
        if !vanished {
            break;
        }
    }

    Ok(!queues.running(repo).is_empty() || !queues.pending(repo).is_empty())
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
