//! # GitLab Provider
//!
//! GitLab.com and self-managed GitLab through the v4 REST API.
//!
//! Merge requests can come from forks, so every event carries two project
//! ids: repository content and commit statuses use the source project,
//! notes and membership checks use the target project.

use async_trait::async_trait;
use pac_core::event::{event_types, ChangedFiles, Event, TriggerType};
use pac_core::opscomments;
use pac_core::provider::{
    CommitStatus, Detection, Provider, ProviderError, RunStatus, StatusOptions, TektonFile,
    WebhookRequest,
};
use pac_core::repository::Repository;
use pac_core::settings::Settings;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::acl::{self, PullRequestComment};
use crate::client::{http_client, ApiClient, Auth};
use crate::signature;

pub const EVENT_HEADER: &str = "x-gitlab-event";
pub const TOKEN_HEADER: &str = "x-gitlab-token";

/// Public GitLab instance.
pub const PUBLIC_URL: &str = "https://gitlab.com";

const MERGE_REQUEST_HOOK: &str = "Merge Request Hook";
const PUSH_HOOK: &str = "Push Hook";
const TAG_PUSH_HOOK: &str = "Tag Push Hook";
const NOTE_HOOK: &str = "Note Hook";

const TAG_PUSH_EVENT_TYPE: &str = "Tag_Push";

const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

// ============================================================================
// Webhook Payloads
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct User {
    #[serde(default)]
    username: String,
}

#[derive(Debug, Default, Deserialize)]
struct Project {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    web_url: String,
    #[serde(default)]
    path_with_namespace: String,
    #[serde(default)]
    default_branch: String,
}

#[derive(Debug, Default, Deserialize)]
struct Commit {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct Label {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Default, Deserialize)]
struct LabelChange {
    #[serde(default)]
    previous: Vec<Label>,
    #[serde(default)]
    current: Vec<Label>,
}

/// `changes` of a merge request update; only the keys matter.
#[derive(Debug, Default, Deserialize)]
struct Changes {
    #[serde(default)]
    labels: Option<LabelChange>,
    #[serde(flatten)]
    other: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct MergeRequest {
    #[serde(default)]
    iid: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    action: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    oldrev: Option<String>,
    #[serde(default)]
    source_branch: String,
    #[serde(default)]
    target_branch: String,
    #[serde(default)]
    source_project_id: i64,
    #[serde(default)]
    target_project_id: i64,
    #[serde(default)]
    last_commit: Commit,
    #[serde(default)]
    source: Project,
    #[serde(default)]
    target: Project,
}

#[derive(Debug, Default, Deserialize)]
struct NoteAttributes {
    #[serde(default)]
    note: String,
    #[serde(default)]
    noteable_type: String,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    user: User,
    #[serde(default)]
    user_username: String,
    #[serde(default)]
    project_id: i64,
    #[serde(default)]
    project: Project,
    #[serde(default, rename = "ref")]
    ref_: String,
    #[serde(default)]
    after: String,
    #[serde(default)]
    checkout_sha: Option<String>,
    #[serde(default)]
    commits: Vec<Commit>,
    #[serde(default)]
    object_attributes: serde_json::Value,
    #[serde(default)]
    merge_request: Option<MergeRequest>,
    #[serde(default)]
    labels: Vec<Label>,
    #[serde(default)]
    changes: Changes,
}

impl Payload {
    fn merge_request_attributes(&self) -> Result<MergeRequest, ProviderError> {
        serde_json::from_value(self.object_attributes.clone()).map_err(|e| {
            ProviderError::InvalidPayload {
                message: format!("invalid merge request attributes: {}", e),
            }
        })
    }

    fn note_attributes(&self) -> NoteAttributes {
        serde_json::from_value(self.object_attributes.clone()).unwrap_or_default()
    }

    /// A merge request update touching nothing but labels.
    fn only_labels_changed(&self) -> bool {
        let labels_changed = self
            .changes
            .labels
            .as_ref()
            .is_some_and(|l| !l.previous.is_empty() || !l.current.is_empty());
        let others = self
            .changes
            .other
            .keys()
            .any(|k| k != "updated_at" && k != "updated_by_id");
        labels_changed && !others
    }
}

fn parse(body: &[u8]) -> Result<Payload, ProviderError> {
    serde_json::from_slice(body).map_err(|e| ProviderError::InvalidPayload {
        message: format!("cannot parse GitLab payload: {}", e),
    })
}

/// Organization and repository of a `group/subgroup/project` path. Nested
/// groups are joined with `-`.
pub fn org_repo(path_with_namespace: &str) -> (String, String) {
    match path_with_namespace.rsplit_once('/') {
        Some((groups, project)) => (groups.replace('/', "-"), project.to_string()),
        None => (String::new(), path_with_namespace.to_string()),
    }
}

// ============================================================================
// API Shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct TreeNode {
    #[serde(default)]
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct CommitInfo {
    #[serde(default)]
    title: String,
    #[serde(default)]
    web_url: String,
    #[serde(default)]
    author_name: String,
    #[serde(default)]
    authored_date: String,
    #[serde(default)]
    committer_name: String,
}

#[derive(Debug, Deserialize)]
struct Diff {
    #[serde(default)]
    new_path: String,
    #[serde(default)]
    new_file: bool,
    #[serde(default)]
    renamed_file: bool,
    #[serde(default)]
    deleted_file: bool,
}

#[derive(Debug, Deserialize)]
struct Member {
    #[serde(default)]
    username: String,
}

#[derive(Debug, Deserialize)]
struct Note {
    id: i64,
    #[serde(default)]
    body: String,
    author: Option<User>,
}

// ============================================================================
// Provider
// ============================================================================

/// GitLab integration.
#[derive(Debug, Clone)]
pub struct GitLabProvider {
    http: reqwest::Client,
}

impl Default for GitLabProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GitLabProvider {
    pub fn new() -> Self {
        Self { http: http_client() }
    }

    /// `<instance>/api/v4` of the Repository's provider URL, or of the
    /// instance serving the event's repository.
    fn api_url(event: &Event) -> String {
        let base = if !event.provider.url.is_empty() {
            event.provider.url.trim_end_matches('/').to_string()
        } else {
            url::Url::parse(&event.url)
                .ok()
                .map(|u| u.origin().ascii_serialization())
                .filter(|origin| origin != "null")
                .unwrap_or_else(|| PUBLIC_URL.to_string())
        };
        if base.ends_with("/api/v4") {
            base
        } else {
            format!("{}/api/v4", base)
        }
    }

    fn client(&self, event: &Event) -> ApiClient {
        let auth = match &event.provider.token {
            Some(token) if !token.is_empty() => Auth::Header {
                name: "PRIVATE-TOKEN",
                value: token.expose_secret().to_string(),
            },
            _ => Auth::None,
        };
        ApiClient::new(self.http.clone(), Self::api_url(event), auth)
    }

    /// Project reference for API paths; the encoded path when no id is known.
    fn project(id: Option<i64>, event: &Event) -> String {
        match id.filter(|id| *id > 0) {
            Some(id) => id.to_string(),
            None => urlencoding::encode(&format!("{}/{}", event.organization, event.repository))
                .into_owned(),
        }
    }

    fn source_project(event: &Event) -> String {
        Self::project(event.source_project_id.or(event.target_project_id), event)
    }

    fn target_project(event: &Event) -> String {
        Self::project(event.target_project_id.or(event.source_project_id), event)
    }

    fn reference(event: &Event) -> &str {
        if event.sha.is_empty() {
            &event.head_branch
        } else {
            &event.sha
        }
    }

    async fn raw_file(
        &self,
        client: &ApiClient,
        project: &str,
        path: &str,
        reference: &str,
    ) -> Result<String, ProviderError> {
        let encoded = urlencoding::encode(path);
        client
            .get_text(&format!(
                "/projects/{}/repository/files/{}/raw?ref={}",
                project,
                encoded,
                urlencoding::encode(reference)
            ))
            .await
    }

    async fn is_member(
        &self,
        client: &ApiClient,
        event: &Event,
        username: &str,
    ) -> Result<bool, ProviderError> {
        let members: Vec<Member> = client
            .get_json_query(
                &format!("/projects/{}/members/all", Self::target_project(event)),
                &[("query", username)],
            )
            .await?;
        Ok(members.iter().any(|m| m.username == username))
    }

    async fn user_allowed(
        &self,
        client: &ApiClient,
        event: &Event,
        username: &str,
    ) -> Result<bool, ProviderError> {
        if self.is_member(client, event, username).await? {
            debug!(user = %username, "User is a project member");
            return Ok(true);
        }
        acl::sender_in_owners(self, event, username).await
    }

    async fn notes(
        &self,
        client: &ApiClient,
        event: &Event,
        iid: u64,
    ) -> Result<Vec<Note>, ProviderError> {
        client
            .get_all(&format!(
                "/projects/{}/merge_requests/{}/notes?per_page=100",
                Self::target_project(event),
                iid
            ))
            .await
    }

    async fn set_commit_status(
        &self,
        client: &ApiClient,
        event: &Event,
        body: &serde_json::Value,
    ) {
        // forks may not let the token write statuses on the source project
        let mut projects = vec![Self::source_project(event)];
        let target = Self::target_project(event);
        if !projects.contains(&target) {
            projects.push(target);
        }
        for project in projects {
            let path = format!("/projects/{}/statuses/{}", project, event.sha);
            match client.send_json_unit(Method::POST, &path, body).await {
                Ok(()) => return,
                Err(e) => warn!(project = %project, error = %e, "Cannot set commit status"),
            }
        }
    }
}

/// GitLab build state and the title shown for it.
fn build_state(options: &StatusOptions) -> (&'static str, &'static str) {
    match options.conclusion {
        CommitStatus::Skipped => ("canceled", "skipped validating this commit"),
        CommitStatus::Neutral => ("canceled", "stopped"),
        CommitStatus::Cancelled => ("canceled", "cancelled"),
        CommitStatus::Failure => ("failed", "failed"),
        CommitStatus::Success => ("success", "successfully validated your commit"),
        CommitStatus::Pending if options.status == RunStatus::Queued => ("pending", "queued"),
        CommitStatus::Pending => ("running", "running"),
    }
}

fn status_name(options: &StatusOptions) -> String {
    if options.original_pipeline_run_name.is_empty() {
        options.application_name.clone()
    } else {
        format!(
            "{} / {}",
            options.application_name, options.original_pipeline_run_name
        )
    }
}

/// `(project path, ref, file path)` of a `/-/blob/` or `/-/raw/` URL on `host`.
fn parse_file_url(uri: &str, host: &str) -> Option<(String, String, String)> {
    let parsed = url::Url::parse(uri).ok()?;
    if parsed.host_str()? != host {
        return None;
    }
    let (project, rest) = parsed.path().trim_start_matches('/').split_once("/-/")?;
    let rest = rest
        .strip_prefix("blob/")
        .or_else(|| rest.strip_prefix("raw/"))?;
    let (reference, path) = rest.split_once('/')?;
    Some((project.to_string(), reference.to_string(), path.to_string()))
}

#[async_trait]
impl Provider for GitLabProvider {
    fn name(&self) -> &'static str {
        "gitlab"
    }

    fn detect(&self, request: &WebhookRequest) -> Result<Detection, ProviderError> {
        let Some(event) = request.header(EVENT_HEADER) else {
            return Ok(Detection::default());
        };
        let payload = parse(&request.body)?;
        let prefix = opscomments::DEFAULT_PREFIX;

        let detection = match event {
            MERGE_REQUEST_HOOK => {
                let mr = payload.merge_request_attributes()?;
                let new_commits = mr.oldrev.as_deref().is_some_and(|r| !r.is_empty());
                match mr.action.as_str() {
                    "update" if !new_commits && !payload.only_labels_changed() => {
                        Detection::skipped(
                            "this 'Merge Request' update event changes are not supported; cannot proceed",
                        )
                    }
                    "open" | "reopen" | "update" | "close" => Detection::matched(),
                    other => Detection::skipped(format!(
                        "not a merge event we care about: \"{}\"",
                        other
                    )),
                }
            }
            PUSH_HOOK => Detection::matched(),
            TAG_PUSH_HOOK => {
                if payload.after == ZERO_SHA && payload.checkout_sha.is_none() {
                    Detection::skipped("tag deletion is not supported")
                } else {
                    Detection::matched()
                }
            }
            NOTE_HOOK => {
                let note = payload.note_attributes();
                let on_open_mr = note.noteable_type == "MergeRequest"
                    && payload
                        .merge_request
                        .as_ref()
                        .is_some_and(|mr| mr.state == "opened");
                if !on_open_mr {
                    Detection::skipped("comments are only supported on open merge requests")
                } else if opscomments::is_gitops_command(&note.note, prefix) {
                    Detection::gitops_comment()
                } else {
                    Detection::matched()
                }
            }
            other => Detection::skipped(format!("gitlab: event \"{}\" is not supported", other)),
        };
        Ok(detection)
    }

    #[instrument(skip_all, fields(provider = "gitlab"))]
    async fn parse_payload(&self, request: &WebhookRequest) -> Result<Event, ProviderError> {
        let hook = request.header(EVENT_HEADER).ok_or_else(|| ProviderError::InvalidPayload {
            message: "failed to find event type in request header".to_string(),
        })?;
        let payload = parse(&request.body)?;

        let mut event = match hook {
            MERGE_REQUEST_HOOK => {
                let mr = payload.merge_request_attributes()?;
                let trigger = if mr.action == "close" {
                    TriggerType::PullRequestClosed
                } else if payload.changes.labels.is_some() {
                    TriggerType::PullRequestLabeled
                } else {
                    TriggerType::PullRequest
                };
                let mut event = Event::new(event_types::MERGE_REQUEST, trigger);
                event.sender = payload.user.username.clone();
                event.default_branch = payload.project.default_branch.clone();
                event.url = payload.project.web_url.clone();
                event.sha = mr.last_commit.id.clone();
                event.sha_url = mr.last_commit.url.clone();
                event.sha_title = mr.last_commit.title.clone();
                event.head_branch = mr.source_branch.clone();
                event.base_branch = mr.target_branch.clone();
                event.head_url = mr.source.web_url.clone();
                event.pull_request_number = Some(mr.iid);
                event.pull_request_title = mr.title.clone();
                event.pull_request_labels = payload.labels.iter().map(|l| l.title.clone()).collect();
                let (org, repo) = org_repo(&mr.target.path_with_namespace);
                event.organization = org;
                event.repository = repo;
                event.source_project_id = Some(mr.source_project_id);
                event.target_project_id = Some(payload.project.id);
                event
            }
            PUSH_HOOK | TAG_PUSH_HOOK => {
                let Some(last) = payload.commits.last() else {
                    return Err(ProviderError::InvalidPayload {
                        message: format!("no commits attached to this {} event", hook),
                    });
                };
                let event_type = if hook == PUSH_HOOK {
                    event_types::PUSH
                } else {
                    TAG_PUSH_EVENT_TYPE
                };
                let mut event = Event::new(event_type, TriggerType::Push);
                event.sender = payload.user_username.clone();
                event.default_branch = payload.project.default_branch.clone();
                event.url = payload.project.web_url.clone();
                event.sha = last.id.clone();
                event.sha_url = last.url.clone();
                event.sha_title = last.title.clone();
                event.head_branch = payload.ref_.clone();
                event.base_branch = payload.ref_.clone();
                event.head_url = payload.project.web_url.clone();
                let (org, repo) = org_repo(&payload.project.path_with_namespace);
                event.organization = org;
                event.repository = repo;
                event.source_project_id = Some(payload.project_id);
                event.target_project_id = Some(payload.project_id);
                event
            }
            NOTE_HOOK => {
                let mr = payload.merge_request.as_ref().ok_or_else(|| {
                    ProviderError::InvalidPayload {
                        message: "note is not attached to a merge request".to_string(),
                    }
                })?;
                let note = payload.note_attributes();
                let mut event = Event::new(event_types::MERGE_REQUEST, TriggerType::PullRequest);
                event.sender = payload.user.username.clone();
                event.default_branch = payload.project.default_branch.clone();
                event.url = payload.project.web_url.clone();
                event.sha = mr.last_commit.id.clone();
                event.sha_url = mr.last_commit.url.clone();
                event.sha_title = mr.last_commit.title.clone();
                event.base_branch = mr.target_branch.clone();
                event.head_branch = mr.source_branch.clone();
                event.head_url = mr.source.web_url.clone();
                event.pull_request_number = Some(mr.iid);
                event.pull_request_title = mr.title.clone();
                let (org, repo) = org_repo(&payload.project.path_with_namespace);
                event.organization = org;
                event.repository = repo;
                event.source_project_id = Some(mr.source_project_id);
                event.target_project_id = Some(mr.target_project_id);
                opscomments::apply_comment_trigger(&mut event, &note.note, opscomments::DEFAULT_PREFIX);
                event
            }
            other => {
                return Err(ProviderError::UnsupportedEvent {
                    event_type: other.to_string(),
                })
            }
        };

        event.headers = request.headers.clone();
        event.payload = request.body.clone();
        debug!(event_type = %event.event_type, "Parsed GitLab payload");
        Ok(event)
    }

    fn validate(&self, event: &Event) -> Result<(), ProviderError> {
        let token = event
            .headers
            .get(TOKEN_HEADER)
            .map(String::as_str)
            .unwrap_or_default();
        let secret = event
            .provider
            .webhook_secret
            .as_ref()
            .map(|s| s.expose_secret())
            .unwrap_or_default();
        if secret.is_empty() && !token.is_empty() {
            return Err(ProviderError::InvalidSignature {
                message: "gitlab failed validation: failed to find webhook secret".to_string(),
            });
        }
        signature::verify_token(token, secret).map_err(|_| ProviderError::InvalidSignature {
            message: "gitlab failed validation: event's secret doesn't match with webhook secret"
                .to_string(),
        })
    }

    async fn set_client(
        &self,
        event: &mut Event,
        _repo: &Repository,
        _settings: &Settings,
    ) -> Result<(), ProviderError> {
        if event.provider.token.as_ref().map_or(true, |t| t.is_empty()) {
            return Err(ProviderError::Configuration {
                message: "no git_provider.secret has been set in the repo crd".to_string(),
            });
        }
        Ok(())
    }

    async fn get_commit_info(&self, event: &mut Event) -> Result<(), ProviderError> {
        if event.sha.is_empty() {
            return Ok(());
        }
        let commit: CommitInfo = self
            .client(event)
            .get_json(&format!(
                "/projects/{}/repository/commits/{}",
                Self::source_project(event),
                event.sha
            ))
            .await?;
        if !commit.title.is_empty() {
            event.sha_title = commit.title;
        }
        if !commit.web_url.is_empty() {
            event.sha_url = commit.web_url;
        }
        event.sha_author_name = commit.author_name;
        event.sha_author_date = commit.authored_date;
        event.sha_committer_name = commit.committer_name;
        Ok(())
    }

    #[instrument(skip(self, event), fields(provider = "gitlab", sha = %event.sha))]
    async fn get_tekton_dir(
        &self,
        event: &Event,
        path: &str,
    ) -> Result<Vec<TektonFile>, ProviderError> {
        let client = self.client(event);
        let project = Self::source_project(event);
        let reference = Self::reference(event);
        let listing = client
            .get_all::<TreeNode>(&format!(
                "/projects/{}/repository/tree?path={}&ref={}&recursive=true&per_page=100",
                project,
                urlencoding::encode(path),
                urlencoding::encode(reference)
            ))
            .await;
        let nodes = match listing {
            Ok(nodes) => nodes,
            Err(ProviderError::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        for node in nodes.iter().filter(|n| {
            n.kind == "blob" && (n.name.ends_with(".yaml") || n.name.ends_with(".yml"))
        }) {
            let content = self.raw_file(&client, &project, &node.path, reference).await?;
            files.push(TektonFile {
                path: node.path.clone(),
                content,
            });
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn get_file_inside_repo(
        &self,
        event: &Event,
        path: &str,
        branch: &str,
    ) -> Result<String, ProviderError> {
        let client = self.client(event);
        if branch.is_empty() {
            self.raw_file(&client, &Self::source_project(event), path, Self::reference(event))
                .await
        } else {
            self.raw_file(&client, &Self::target_project(event), path, branch)
                .await
        }
    }

    async fn get_files(&self, event: &Event) -> Result<ChangedFiles, ProviderError> {
        let client = self.client(event);
        let diffs: Vec<Diff> = match event.pull_request_number {
            Some(iid) => {
                client
                    .get_all(&format!(
                        "/projects/{}/merge_requests/{}/diffs?per_page=100",
                        Self::target_project(event),
                        iid
                    ))
                    .await?
            }
            None => {
                client
                    .get_all(&format!(
                        "/projects/{}/repository/commits/{}/diff?per_page=100",
                        Self::source_project(event),
                        event.sha
                    ))
                    .await?
            }
        };

        let mut changed = ChangedFiles::default();
        for diff in diffs {
            if diff.new_file {
                changed.added.push(diff.new_path.clone());
            } else if diff.deleted_file {
                changed.deleted.push(diff.new_path.clone());
            } else if diff.renamed_file {
                changed.renamed.push(diff.new_path.clone());
            } else {
                changed.modified.push(diff.new_path.clone());
            }
            changed.all.push(diff.new_path);
        }
        Ok(changed)
    }

    #[instrument(skip_all, fields(provider = "gitlab", sender = %event.sender))]
    async fn is_allowed(
        &self,
        event: &Event,
        _repo: &Repository,
        settings: &Settings,
    ) -> Result<bool, ProviderError> {
        let client = self.client(event);
        if self.user_allowed(&client, event, &event.sender).await? {
            return Ok(true);
        }

        let Some(iid) = event.pull_request_number else {
            return Ok(false);
        };
        if !settings.remember_ok_to_test {
            return Ok(false);
        }
        let comments: Vec<PullRequestComment> = self
            .notes(&client, event, iid)
            .await?
            .into_iter()
            .map(|n| PullRequestComment {
                author: n.author.map(|a| a.username).unwrap_or_default(),
                body: n.body,
            })
            .collect();
        for author in acl::ok_to_test_authors(&comments) {
            if author != event.sender && self.user_allowed(&client, event, &author).await? {
                info!(approver = %author, "Merge request allowed by an /ok-to-test comment");
                return Ok(true);
            }
        }
        Ok(false)
    }

    #[instrument(skip_all, fields(provider = "gitlab", conclusion = %options.conclusion))]
    async fn create_status(
        &self,
        event: &Event,
        options: &StatusOptions,
    ) -> Result<(), ProviderError> {
        let client = self.client(event);
        let (state, title) = build_state(options);
        let name = status_name(options);

        let mut body = json!({
            "state": state,
            "name": name,
            "description": title,
        });
        if !options.details_url.is_empty() {
            body["target_url"] = json!(options.details_url);
        }
        if !event.sha.is_empty() {
            self.set_commit_status(&client, event, &body).await;
        }

        if matches!(state, "running" | "pending") || event.pull_request_number.is_none() {
            return Ok(());
        }
        let mut note = format!("**{}** has {}\n\n{}", name, title, options.text);
        if !options.details_url.is_empty() {
            note.push_str(&format!(
                "\n\n<small>Full log available [here]({})</small>",
                options.details_url
            ));
        }
        self.create_comment(event, &note, None).await
    }

    async fn create_comment(
        &self,
        event: &Event,
        body: &str,
        dedup_key: Option<&str>,
    ) -> Result<(), ProviderError> {
        let Some(iid) = event.pull_request_number else {
            debug!("Not a merge request, comment dropped");
            return Ok(());
        };
        let client = self.client(event);
        let notes_path = format!(
            "/projects/{}/merge_requests/{}/notes",
            Self::target_project(event),
            iid
        );
        if let Some(key) = dedup_key {
            for note in self.notes(&client, event, iid).await? {
                if note.body.starts_with(key) {
                    client.delete(&format!("{}/{}", notes_path, note.id)).await?;
                }
            }
        }
        client
            .send_json_unit(Method::POST, &notes_path, &json!({ "body": body }))
            .await
    }

    async fn get_task_uri(
        &self,
        event: &Event,
        uri: &str,
    ) -> Result<Option<String>, ProviderError> {
        let api = Self::api_url(event);
        let Some(host) = url::Url::parse(&api)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
        else {
            return Ok(None);
        };
        let Some((project, reference, path)) = parse_file_url(uri, &host) else {
            return Ok(None);
        };
        let client = self.client(event);
        let content = self
            .raw_file(&client, &urlencoding::encode(&project), &path, &reference)
            .await?;
        Ok(Some(content))
    }
}

#[cfg(test)]
#[path = "gitlab_tests.rs"]
mod tests;
