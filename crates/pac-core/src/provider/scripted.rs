//! In-memory provider with scripted responses.
//!
//! Backs the orchestrator tests and the integration test crate. Every
//! status and comment is recorded for inspection.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    Detection, Provider, ProviderError, StatusOptions, TektonFile, WebhookRequest,
};
use crate::event::{ChangedFiles, Event};
use crate::repository::Repository;
use crate::settings::Settings;
use crate::SecretValue;

/// Header announcing a scripted webhook.
pub const SCRIPTED_EVENT_HEADER: &str = "x-scripted-event";

/// A comment posted through [`Provider::create_comment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedComment {
    pub body: String,
    pub dedup_key: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    event: Option<Event>,
    tekton_files: Vec<TektonFile>,
    repo_files: BTreeMap<String, String>,
    task_uris: BTreeMap<String, String>,
    changed_files: ChangedFiles,
    allowed: bool,
    commit_title: String,
    token: Option<String>,
    invalid_signature: bool,
    fail_status: bool,
    fail_files: bool,
    get_files_calls: usize,
    statuses: Vec<StatusOptions>,
    comments: Vec<RecordedComment>,
    set_client_calls: usize,
}

/// Provider returning scripted data.
#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    state: Arc<Mutex<State>>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                allowed: true,
                ..Default::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Event returned by `parse_payload`.
    pub fn with_event(self, event: Event) -> Self {
        self.state().event = Some(event);
        self
    }

    /// Add a file to the `.tekton/` directory.
    pub fn with_tekton_file(self, path: &str, content: &str) -> Self {
        self.state().tekton_files.push(TektonFile {
            path: path.to_string(),
            content: content.to_string(),
        });
        self
    }

    /// Add a file readable through `get_file_inside_repo`.
    pub fn with_repo_file(self, path: &str, content: &str) -> Self {
        self.state()
            .repo_files
            .insert(path.to_string(), content.to_string());
        self
    }

    /// Resolve `uri` through `get_task_uri`.
    pub fn with_task_uri(self, uri: &str, content: &str) -> Self {
        self.state()
            .task_uris
            .insert(uri.to_string(), content.to_string());
        self
    }

    pub fn with_changed_files(self, files: ChangedFiles) -> Self {
        self.state().changed_files = files;
        self
    }

    pub fn with_allowed(self, allowed: bool) -> Self {
        self.state().allowed = allowed;
        self
    }

    pub fn with_commit_title(self, title: &str) -> Self {
        self.state().commit_title = title.to_string();
        self
    }

    /// Token bound by `set_client`.
    pub fn with_token(self, token: &str) -> Self {
        self.state().token = Some(token.to_string());
        self
    }

    pub fn with_invalid_signature(self) -> Self {
        self.state().invalid_signature = true;
        self
    }

    pub fn fail_status(&self, fail: bool) {
        self.state().fail_status = fail;
    }

    /// Make `get_files` fail with a transport error.
    pub fn with_failing_files(self) -> Self {
        self.state().fail_files = true;
        self
    }

    pub fn get_files_calls(&self) -> usize {
        self.state().get_files_calls
    }

    pub fn statuses(&self) -> Vec<StatusOptions> {
        self.state().statuses.clone()
    }

    pub fn comments(&self) -> Vec<RecordedComment> {
        self.state().comments.clone()
    }

    pub fn set_client_calls(&self) -> usize {
        self.state().set_client_calls
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&self, request: &WebhookRequest) -> Result<Detection, ProviderError> {
        if request.header(SCRIPTED_EVENT_HEADER).is_none() {
            return Ok(Detection::default());
        }
        Ok(Detection::matched())
    }

    async fn parse_payload(&self, request: &WebhookRequest) -> Result<Event, ProviderError> {
        let mut event = self
            .state()
            .event
            .clone()
            .ok_or_else(|| ProviderError::UnsupportedEvent {
                event_type: request
                    .header(SCRIPTED_EVENT_HEADER)
                    .unwrap_or_default()
                    .to_string(),
            })?;
        event.payload = request.body.clone();
        Ok(event)
    }

    fn validate(&self, event: &Event) -> Result<(), ProviderError> {
        if self.state().invalid_signature {
            return Err(ProviderError::InvalidSignature {
                message: format!("signature mismatch for event {}", event.event_id),
            });
        }
        Ok(())
    }

    async fn set_client(
        &self,
        event: &mut Event,
        _repo: &Repository,
        _settings: &Settings,
    ) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.set_client_calls += 1;
        if let Some(token) = &state.token {
            event.provider.token = Some(SecretValue::from_string(token.clone()));
        }
        Ok(())
    }

    async fn get_commit_info(&self, event: &mut Event) -> Result<(), ProviderError> {
        let state = self.state();
        if !state.commit_title.is_empty() {
            event.sha_title = state.commit_title.clone();
        }
        if event.sha_url.is_empty() && !event.sha.is_empty() {
            event.sha_url = format!("{}/commit/{}", event.url, event.sha);
        }
        Ok(())
    }

    async fn get_tekton_dir(
        &self,
        _event: &Event,
        path: &str,
    ) -> Result<Vec<TektonFile>, ProviderError> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut files: Vec<TektonFile> = self
            .state()
            .tekton_files
            .iter()
            .filter(|f| f.path.starts_with(&prefix))
            .cloned()
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn get_file_inside_repo(
        &self,
        _event: &Event,
        path: &str,
        _branch: &str,
    ) -> Result<String, ProviderError> {
        self.state()
            .repo_files
            .get(path)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound {
                resource: path.to_string(),
            })
    }

    async fn get_files(&self, _event: &Event) -> Result<ChangedFiles, ProviderError> {
        let mut state = self.state();
        state.get_files_calls += 1;
        if state.fail_files {
            return Err(ProviderError::Transport {
                message: "files API down".to_string(),
            });
        }
        Ok(state.changed_files.clone())
    }

    async fn is_allowed(
        &self,
        _event: &Event,
        _repo: &Repository,
        _settings: &Settings,
    ) -> Result<bool, ProviderError> {
        Ok(self.state().allowed)
    }

    async fn create_status(
        &self,
        _event: &Event,
        options: &StatusOptions,
    ) -> Result<(), ProviderError> {
        let mut state = self.state();
        if state.fail_status {
            return Err(ProviderError::Api {
                status: 502,
                message: "status API unavailable".to_string(),
            });
        }
        state.statuses.push(options.clone());
        Ok(())
    }

    async fn create_comment(
        &self,
        _event: &Event,
        body: &str,
        dedup_key: Option<&str>,
    ) -> Result<(), ProviderError> {
        let mut state = self.state();
        if let Some(key) = dedup_key {
            state.comments.retain(|c| !c.body.starts_with(key));
        }
        state.comments.push(RecordedComment {
            body: body.to_string(),
            dedup_key: dedup_key.map(str::to_string),
        });
        Ok(())
    }

    async fn get_task_uri(
        &self,
        _event: &Event,
        uri: &str,
    ) -> Result<Option<String>, ProviderError> {
        Ok(self.state().task_uris.get(uri).cloned())
    }
}
