//! # In-Memory Kubernetes Client
//!
//! Thread-safe in-memory implementation for testing and development.
//! Honours `resourceVersion` optimistic concurrency on updates and
//! `generateName` on creation, and can be told to fail selected operations.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{apply_merge_patch, KubeClient, KubeError, LabelSelector};
use crate::formatting::random_suffix;
use crate::repository::Repository;
use crate::resources::{ConfigMap, RepositoryEvent, Secret};
use crate::tekton::{PipelineRun, TaskRun};
use crate::keys;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct State {
    repositories: HashMap<Key, Repository>,
    secrets: HashMap<Key, Secret>,
    config_maps: HashMap<Key, ConfigMap>,
    pipeline_runs: HashMap<Key, PipelineRun>,
    task_runs: HashMap<Key, TaskRun>,
    pod_logs: HashMap<(String, String, String), String>,
    events: Vec<RepositoryEvent>,
    patches: Vec<(String, String, Value)>,
    resource_version: u64,
    failures: Failures,
}

#[derive(Default)]
struct Failures {
    create_pipeline_run: bool,
    delete_secret: bool,
    update_secret: bool,
    patch_pipeline_run: bool,
    repository_conflicts: usize,
}

impl State {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

/// In-memory [`KubeClient`].
#[derive(Clone, Default)]
pub struct MemoryKubeClient {
    state: Arc<RwLock<State>>,
}

impl MemoryKubeClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------------
    // Seeding and inspection
    // ------------------------------------------------------------------------

    pub fn insert_repository(&self, mut repo: Repository) {
        let mut state = self.write();
        repo.metadata.resource_version = state.next_version();
        if repo.metadata.uid.is_empty() {
            repo.metadata.uid = ulid::Ulid::new().to_string();
        }
        if repo.metadata.creation_timestamp.is_none() {
            repo.metadata.creation_timestamp = Some(Utc::now());
        }
        state
            .repositories
            .insert(key(repo.namespace(), repo.name()), repo);
    }

    pub fn insert_secret(&self, mut secret: Secret) {
        let mut state = self.write();
        secret.metadata.resource_version = state.next_version();
        state.secrets.insert(
            key(&secret.metadata.namespace, &secret.metadata.name),
            secret,
        );
    }

    pub fn insert_config_map(&self, config_map: ConfigMap) {
        self.write().config_maps.insert(
            key(&config_map.metadata.namespace, &config_map.metadata.name),
            config_map,
        );
    }

    /// Stores a PipelineRun as-is, keeping its timestamps and status.
    pub fn insert_pipeline_run(&self, mut pr: PipelineRun) {
        let mut state = self.write();
        pr.metadata.resource_version = state.next_version();
        if pr.metadata.creation_timestamp.is_none() {
            pr.metadata.creation_timestamp = Some(Utc::now());
        }
        state
            .pipeline_runs
            .insert(key(&pr.metadata.namespace, &pr.metadata.name), pr);
    }

    pub fn insert_task_run(&self, tr: TaskRun) {
        self.write()
            .task_runs
            .insert(key(&tr.metadata.namespace, &tr.metadata.name), tr);
    }

    pub fn set_pod_log(&self, namespace: &str, pod: &str, container: &str, log: &str) {
        self.write().pod_logs.insert(
            (namespace.to_string(), pod.to_string(), container.to_string()),
            log.to_string(),
        );
    }

    pub fn pipeline_runs(&self) -> Vec<PipelineRun> {
        let mut runs: Vec<PipelineRun> = self.read().pipeline_runs.values().cloned().collect();
        runs.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        runs
    }

    pub fn secrets(&self) -> Vec<Secret> {
        self.read().secrets.values().cloned().collect()
    }

    pub fn events(&self) -> Vec<RepositoryEvent> {
        self.read().events.clone()
    }

    /// Every merge patch applied so far, as `(namespace, name, patch)`.
    pub fn patches(&self) -> Vec<(String, String, Value)> {
        self.read().patches.clone()
    }

    // ------------------------------------------------------------------------
    // Failure injection
    // ------------------------------------------------------------------------

    pub fn fail_pipeline_run_creation(&self, fail: bool) {
        self.write().failures.create_pipeline_run = fail;
    }

    pub fn fail_secret_deletion(&self, fail: bool) {
        self.write().failures.delete_secret = fail;
    }

    pub fn fail_secret_update(&self, fail: bool) {
        self.write().failures.update_secret = fail;
    }

    pub fn fail_pipeline_run_patch(&self, fail: bool) {
        self.write().failures.patch_pipeline_run = fail;
    }

    /// Makes the next `count` Repository updates fail with `Conflict`.
    pub fn inject_repository_conflicts(&self, count: usize) {
        self.write().failures.repository_conflicts = count;
    }
}

#[async_trait]
impl KubeClient for MemoryKubeClient {
    async fn list_repositories(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<Repository>, KubeError> {
        let mut repos: Vec<Repository> = self
            .read()
            .repositories
            .values()
            .filter(|r| namespace.map(|ns| r.namespace() == ns).unwrap_or(true))
            .cloned()
            .collect();
        repos.sort_by(|a, b| {
            (a.namespace(), a.name()).cmp(&(b.namespace(), b.name()))
        });
        Ok(repos)
    }

    async fn get_repository(&self, namespace: &str, name: &str) -> Result<Repository, KubeError> {
        self.read()
            .repositories
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| KubeError::not_found("Repository", namespace, name))
    }

    async fn update_repository(&self, repo: &Repository) -> Result<Repository, KubeError> {
        let mut state = self.write();
        let k = key(repo.namespace(), repo.name());

        if state.failures.repository_conflicts > 0 {
            state.failures.repository_conflicts -= 1;
            return Err(KubeError::conflict("Repository", &k.0, &k.1));
        }

        let current = state
            .repositories
            .get(&k)
            .ok_or_else(|| KubeError::not_found("Repository", &k.0, &k.1))?;
        if !repo.metadata.resource_version.is_empty()
            && repo.metadata.resource_version != current.metadata.resource_version
        {
            return Err(KubeError::conflict("Repository", &k.0, &k.1));
        }

        let mut updated = repo.clone();
        updated.metadata.resource_version = state.next_version();
        state.repositories.insert(k, updated.clone());
        Ok(updated)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, KubeError> {
        self.read()
            .secrets
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| KubeError::not_found("Secret", namespace, name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, KubeError> {
        let mut state = self.write();
        let k = key(&secret.metadata.namespace, &secret.metadata.name);
        if state.secrets.contains_key(&k) {
            return Err(KubeError::already_exists("Secret", &k.0, &k.1));
        }
        let mut created = secret.clone();
        created.metadata.resource_version = state.next_version();
        created.metadata.uid = ulid::Ulid::new().to_string();
        created.metadata.creation_timestamp = Some(Utc::now());
        state.secrets.insert(k, created.clone());
        Ok(created)
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret, KubeError> {
        let mut state = self.write();
        let k = key(&secret.metadata.namespace, &secret.metadata.name);
        if state.failures.update_secret {
            return Err(KubeError::Transport {
                message: "injected secret update failure".to_string(),
            });
        }
        if !state.secrets.contains_key(&k) {
            return Err(KubeError::not_found("Secret", &k.0, &k.1));
        }
        let mut updated = secret.clone();
        updated.metadata.resource_version = state.next_version();
        state.secrets.insert(k, updated.clone());
        Ok(updated)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), KubeError> {
        let mut state = self.write();
        if state.failures.delete_secret {
            return Err(KubeError::Transport {
                message: "injected secret deletion failure".to_string(),
            });
        }
        state
            .secrets
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| KubeError::not_found("Secret", namespace, name))
    }

    async fn list_secrets(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Secret>, KubeError> {
        Ok(self
            .read()
            .secrets
            .values()
            .filter(|s| s.metadata.namespace == namespace && selector.matches(&s.metadata.labels))
            .cloned()
            .collect())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, KubeError> {
        self.read()
            .config_maps
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| KubeError::not_found("ConfigMap", namespace, name))
    }

    async fn create_pipeline_run(&self, pr: &PipelineRun) -> Result<PipelineRun, KubeError> {
        let mut state = self.write();
        if state.failures.create_pipeline_run {
            return Err(KubeError::Invalid {
                message: "injected PipelineRun creation failure".to_string(),
            });
        }

        let mut created = pr.clone();
        if created.metadata.name.is_empty() {
            if created.metadata.generate_name.is_empty() {
                return Err(KubeError::Invalid {
                    message: "name or generateName is required".to_string(),
                });
            }
            created.metadata.name =
                format!("{}{}", created.metadata.generate_name, random_suffix(5));
        }

        let k = key(&created.metadata.namespace, &created.metadata.name);
        if state.pipeline_runs.contains_key(&k) {
            return Err(KubeError::already_exists("PipelineRun", &k.0, &k.1));
        }
        created.metadata.resource_version = state.next_version();
        created.metadata.uid = ulid::Ulid::new().to_string();
        created.metadata.creation_timestamp = Some(Utc::now());
        state.pipeline_runs.insert(k, created.clone());
        Ok(created)
    }

    async fn get_pipeline_run(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PipelineRun, KubeError> {
        self.read()
            .pipeline_runs
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| KubeError::not_found("PipelineRun", namespace, name))
    }

    async fn list_pipeline_runs(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<PipelineRun>, KubeError> {
        Ok(self
            .read()
            .pipeline_runs
            .values()
            .filter(|pr| {
                namespace
                    .map(|ns| pr.metadata.namespace == ns)
                    .unwrap_or(true)
                    && selector.matches(&pr.metadata.labels)
            })
            .cloned()
            .collect())
    }

    async fn patch_pipeline_run(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<PipelineRun, KubeError> {
        let mut state = self.write();
        if state.failures.patch_pipeline_run {
            return Err(KubeError::Transport {
                message: "injected PipelineRun patch failure".to_string(),
            });
        }
        let k = key(namespace, name);
        let current = state
            .pipeline_runs
            .get(&k)
            .ok_or_else(|| KubeError::not_found("PipelineRun", namespace, name))?;

        let mut doc = serde_json::to_value(current).map_err(|e| KubeError::Invalid {
            message: e.to_string(),
        })?;
        apply_merge_patch(&mut doc, patch);
        let mut patched: PipelineRun =
            serde_json::from_value(doc).map_err(|e| KubeError::Invalid {
                message: e.to_string(),
            })?;
        patched.metadata.resource_version = state.next_version();

        state
            .patches
            .push((namespace.to_string(), name.to_string(), patch.clone()));
        state.pipeline_runs.insert(k, patched.clone());
        Ok(patched)
    }

    async fn delete_pipeline_run(&self, namespace: &str, name: &str) -> Result<(), KubeError> {
        let mut state = self.write();
        state
            .pipeline_runs
            .remove(&key(namespace, name))
            .ok_or_else(|| KubeError::not_found("PipelineRun", namespace, name))?;

        // Owned secrets are garbage-collected with their PipelineRun.
        state.secrets.retain(|_, s| {
            !(s.metadata.namespace == namespace
                && s.metadata
                    .owner_references
                    .iter()
                    .any(|o| o.kind == "PipelineRun" && o.name == name))
        });
        Ok(())
    }

    async fn list_task_runs(
        &self,
        namespace: &str,
        pipeline_run: &str,
    ) -> Result<Vec<TaskRun>, KubeError> {
        Ok(self
            .read()
            .task_runs
            .values()
            .filter(|tr| {
                tr.metadata.namespace == namespace
                    && tr.metadata.labels.get(keys::TEKTON_PIPELINE_RUN).map(String::as_str)
                        == Some(pipeline_run)
            })
            .cloned()
            .collect())
    }

    async fn get_pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        tail_lines: Option<usize>,
    ) -> Result<String, KubeError> {
        let state = self.read();
        let log = state
            .pod_logs
            .get(&(namespace.to_string(), pod.to_string(), container.to_string()))
            .ok_or_else(|| KubeError::not_found("Pod", namespace, pod))?;

        Ok(match tail_lines {
            Some(n) => {
                let lines: Vec<&str> = log.lines().collect();
                lines[lines.len().saturating_sub(n)..].join("\n")
            }
            None => log.clone(),
        })
    }

    async fn emit_event(&self, event: &RepositoryEvent) -> Result<(), KubeError> {
        self.write().events.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
