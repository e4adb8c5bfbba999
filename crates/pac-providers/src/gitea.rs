//! # Gitea Provider
//!
//! Gitea and Forgejo integration through the `/api/v1` REST API.
//!
//! Gitea is always self-hosted, so the Repository must name the instance in
//! `git_provider.url`. Payloads follow the GitHub layout closely; comment
//! events only carry the pull request number and are completed through the
//! API once a client is bound.

use async_trait::async_trait;
use base64::Engine as _;
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
use tracing::{debug, info, instrument};

use crate::acl::{self, PullRequestComment};
use crate::client::{http_client, ApiClient, Auth};
use crate::signature;

pub const EVENT_HEADER: &str = "x-gitea-event-type";
pub const DELIVERY_HEADER: &str = "x-gitea-delivery";
pub const SIGNATURE_HEADER: &str = "x-gitea-signature";

const PULL_REQUEST_ACTIONS: &[&str] = &[
    "opened",
    "synchronize",
    "synchronized",
    "reopened",
    "closed",
    "label_updated",
];

// ============================================================================
// Webhook Payloads
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct Account {
    #[serde(default)]
    login: String,
    #[serde(default)]
    username: String,
}

impl Account {
    fn name(&self) -> String {
        if self.login.is_empty() {
            self.username.clone()
        } else {
            self.login.clone()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Repo {
    #[serde(default)]
    name: String,
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    clone_url: String,
    #[serde(default)]
    default_branch: String,
    #[serde(default)]
    owner: Account,
}

#[derive(Debug, Default, Deserialize)]
struct Branch {
    #[serde(default, rename = "ref")]
    ref_: String,
    #[serde(default)]
    sha: String,
    #[serde(default)]
    repo: Option<Repo>,
}

#[derive(Debug, Default, Deserialize)]
struct Label {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct PullRequest {
    #[serde(default)]
    number: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    user: Account,
    #[serde(default)]
    head: Branch,
    #[serde(default)]
    base: Branch,
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Debug, Default, Deserialize)]
struct HeadCommit {
    #[serde(default)]
    id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct Issue {
    #[serde(default)]
    number: u64,
    #[serde(default)]
    state: String,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Comment {
    #[serde(default)]
    body: String,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    action: String,
    #[serde(default, rename = "ref")]
    ref_: String,
    #[serde(default)]
    before: String,
    #[serde(default)]
    head_commit: Option<HeadCommit>,
    #[serde(default)]
    pusher: Option<Account>,
    #[serde(default)]
    repository: Repo,
    #[serde(default)]
    sender: Account,
    #[serde(default)]
    pull_request: Option<PullRequest>,
    #[serde(default)]
    issue: Option<Issue>,
    #[serde(default)]
    comment: Option<Comment>,
}

fn parse(body: &[u8]) -> Result<Payload, ProviderError> {
    serde_json::from_slice(body).map_err(|e| ProviderError::InvalidPayload {
        message: format!("cannot parse Gitea payload: {}", e),
    })
}

fn apply_pull_request(event: &mut Event, pr: &PullRequest) {
    event.pull_request_number = Some(pr.number);
    event.pull_request_title = pr.title.clone();
    event.sha = pr.head.sha.clone();
    event.head_branch = pr.head.ref_.clone();
    event.base_branch = pr.base.ref_.clone();
    event.head_url = pr.head.repo.as_ref().map(|r| r.html_url.clone()).unwrap_or_default();
    if let Some(base) = pr.base.repo.as_ref().filter(|r| !r.html_url.is_empty()) {
        event.url = base.html_url.clone();
    }
    event.pull_request_labels = pr.labels.iter().map(|l| l.name.clone()).collect();
}

// ============================================================================
// API Shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct Tree {
    #[serde(default)]
    tree: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct Actor {
    #[serde(default)]
    name: String,
    #[serde(default)]
    date: String,
}

#[derive(Debug, Default, Deserialize)]
struct CommitDetails {
    #[serde(default)]
    message: String,
    #[serde(default)]
    author: Actor,
    #[serde(default)]
    committer: Actor,
}

#[derive(Debug, Deserialize)]
struct ChangedFile {
    filename: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct CommitInfo {
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    commit: CommitDetails,
    #[serde(default)]
    files: Vec<ChangedFile>,
}

#[derive(Debug, Deserialize)]
struct IssueComment {
    id: i64,
    #[serde(default)]
    body: String,
    user: Option<Account>,
}

#[derive(Debug, Deserialize)]
struct Team {
    id: i64,
    name: String,
}

// ============================================================================
// Provider
// ============================================================================

/// Gitea and Forgejo integration.
#[derive(Debug, Clone)]
pub struct GiteaProvider {
    http: reqwest::Client,
}

impl Default for GiteaProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GiteaProvider {
    pub fn new() -> Self {
        Self { http: http_client() }
    }

    fn api_url(event: &Event) -> String {
        let base = event.provider.url.trim_end_matches('/');
        if base.ends_with("/api/v1") {
            base.to_string()
        } else {
            format!("{}/api/v1", base)
        }
    }

    fn client(&self, event: &Event) -> ApiClient {
        let auth = match &event.provider.token {
            Some(token) if !token.is_empty() => Auth::Token(token.expose_secret().to_string()),
            _ => Auth::None,
        };
        ApiClient::new(self.http.clone(), Self::api_url(event), auth)
    }

    fn repo_path(event: &Event) -> String {
        format!("/repos/{}/{}", event.organization, event.repository)
    }

    async fn in_teams(
        &self,
        client: &ApiClient,
        event: &Event,
        teams: &[String],
        user: &str,
    ) -> Result<bool, ProviderError> {
        let org_teams: Vec<Team> = match client
            .get_json(&format!("/orgs/{}/teams", event.organization))
            .await
        {
            Ok(teams) => teams,
            Err(ProviderError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        for team in org_teams.iter().filter(|t| teams.contains(&t.name)) {
            if client
                .exists(&format!("/teams/{}/members/{}", team.id, user))
                .await?
            {
                debug!(user = %user, team = %team.name, "User is a member of an allowed team");
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn user_allowed(
        &self,
        client: &ApiClient,
        event: &Event,
        user: &str,
    ) -> Result<bool, ProviderError> {
        if event.organization == user {
            return Ok(true);
        }
        if client
            .exists(&format!("/orgs/{}/members/{}", event.organization, user))
            .await?
        {
            return Ok(true);
        }
        if client
            .exists(&format!("{}/collaborators/{}", Self::repo_path(event), user))
            .await?
        {
            return Ok(true);
        }
        acl::sender_in_owners(self, event, user).await
    }

    async fn user_allowed_by_policy(
        &self,
        client: &ApiClient,
        event: &Event,
        teams: &[String],
        user: &str,
    ) -> Result<bool, ProviderError> {
        if teams.is_empty() {
            return self.user_allowed(client, event, user).await;
        }
        if self.in_teams(client, event, teams, user).await? {
            return Ok(true);
        }
        acl::sender_in_owners(self, event, user).await
    }

    async fn comments(
        &self,
        client: &ApiClient,
        event: &Event,
        number: u64,
    ) -> Result<Vec<IssueComment>, ProviderError> {
        client
            .get_all(&format!("{}/issues/{}/comments", Self::repo_path(event), number))
            .await
    }
}

/// Gitea has no skipped or cancelled state.
fn status_state(options: &StatusOptions) -> &'static str {
    if options.status != RunStatus::Completed {
        return "pending";
    }
    match options.conclusion {
        CommitStatus::Success | CommitStatus::Neutral | CommitStatus::Skipped => "success",
        CommitStatus::Failure => "failure",
        CommitStatus::Cancelled => "error",
        CommitStatus::Pending => "pending",
    }
}

fn status_phrase(options: &StatusOptions) -> &'static str {
    if options.status == RunStatus::InProgress {
        return "is running.";
    }
    match options.conclusion {
        CommitStatus::Success => "has <b>successfully</b> validated your commit.",
        CommitStatus::Failure => "has <b>failed</b>.",
        CommitStatus::Pending | CommitStatus::Skipped => "is skipping this commit.",
        CommitStatus::Cancelled => "has been cancelled.",
        CommitStatus::Neutral => "doesn't know what happened with this commit.",
    }
}

fn context_name(options: &StatusOptions) -> String {
    if options.original_pipeline_run_name.is_empty() {
        options.application_name.clone()
    } else {
        format!(
            "{} / {}",
            options.application_name, options.original_pipeline_run_name
        )
    }
}

#[async_trait]
impl Provider for GiteaProvider {
    fn name(&self) -> &'static str {
        "gitea"
    }

    fn detect(&self, request: &WebhookRequest) -> Result<Detection, ProviderError> {
        let Some(event) = request.header(EVENT_HEADER) else {
            return Ok(Detection::default());
        };
        let payload = parse(&request.body)?;
        let prefix = opscomments::DEFAULT_PREFIX;

        let detection = match event {
            "push" => {
                if payload.pusher.is_some() {
                    Detection::matched()
                } else {
                    Detection::skipped("invalid payload: no pusher in event")
                }
            }
            "pull_request" | "pull_request_label" => {
                if PULL_REQUEST_ACTIONS.contains(&payload.action.as_str()) {
                    Detection::matched()
                } else {
                    Detection::skipped(format!(
                        "pull_request: unsupported action \"{}\"",
                        payload.action
                    ))
                }
            }
            "issue_comment" | "pull_request_comment" => {
                let on_open_pr = payload.action == "created"
                    && payload
                        .issue
                        .as_ref()
                        .is_some_and(|i| i.pull_request.is_some() && i.state == "open");
                let body = payload.comment.map(|c| c.body).unwrap_or_default();
                if !on_open_pr {
                    Detection::skipped("skip: not a PAC gitops comment")
                } else if opscomments::is_gitops_command(&body, prefix) {
                    Detection::gitops_comment()
                } else {
                    Detection::matched()
                }
            }
            other => Detection::skipped(format!("gitea: event \"{}\" is not supported", other)),
        };
        Ok(detection)
    }

    #[instrument(skip_all, fields(provider = "gitea"))]
    async fn parse_payload(&self, request: &WebhookRequest) -> Result<Event, ProviderError> {
        let kind = request.header(EVENT_HEADER).unwrap_or_default().to_string();
        let payload = parse(&request.body)?;

        let base = |event_type: &str, trigger: TriggerType| {
            let mut event = Event::new(event_type, trigger);
            event.organization = payload.repository.owner.name();
            event.repository = payload.repository.name.clone();
            event.url = payload.repository.html_url.clone();
            event.clone_url = payload.repository.clone_url.clone();
            event.default_branch = payload.repository.default_branch.clone();
            event.sender = payload.sender.name();
            event
        };

        let mut event = match kind.as_str() {
            "push" => {
                let mut event = base(event_types::PUSH, TriggerType::Push);
                let head = payload.head_commit.as_ref();
                event.sha = head.map(|c| c.id.clone()).unwrap_or_default();
                if event.sha.is_empty() {
                    event.sha = payload.before.clone();
                }
                event.sha_url = head.map(|c| c.url.clone()).unwrap_or_default();
                event.sha_title = head
                    .map(|c| c.message.lines().next().unwrap_or_default().to_string())
                    .unwrap_or_default();
                event.base_branch = payload.ref_.clone();
                event.head_branch = payload.ref_.clone();
                event.head_url = event.url.clone();
                event
            }
            "pull_request" | "pull_request_label" => {
                let pr = payload.pull_request.as_ref().ok_or_else(|| {
                    ProviderError::InvalidPayload {
                        message: "pull_request event without pull_request".to_string(),
                    }
                })?;
                let trigger = match payload.action.as_str() {
                    "closed" => TriggerType::PullRequestClosed,
                    "label_updated" => TriggerType::PullRequestLabeled,
                    _ => TriggerType::PullRequest,
                };
                let mut event = base(event_types::PULL_REQUEST, trigger);
                apply_pull_request(&mut event, pr);
                event.sender = pr.user.name();
                event
            }
            "issue_comment" | "pull_request_comment" => {
                let issue = payload.issue.as_ref().ok_or_else(|| ProviderError::InvalidPayload {
                    message: "comment event without issue".to_string(),
                })?;
                let mut event = base(event_types::PULL_REQUEST, TriggerType::PullRequest);
                event.pull_request_number = Some(issue.number);
                let body = payload.comment.as_ref().map(|c| c.body.clone()).unwrap_or_default();
                opscomments::apply_comment_trigger(&mut event, &body, opscomments::DEFAULT_PREFIX);
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
        Ok(event)
    }

    /// Signature checks only apply when a webhook secret is configured.
    fn validate(&self, event: &Event) -> Result<(), ProviderError> {
        let secret = event
            .provider
            .webhook_secret
            .as_ref()
            .map(|s| s.expose_secret())
            .unwrap_or_default();
        if secret.is_empty() {
            debug!("No webhook secret configured, skipping validation for gitea");
            return Ok(());
        }
        let signature = event
            .headers
            .get(SIGNATURE_HEADER)
            .map(String::as_str)
            .unwrap_or_default();
        if signature.is_empty() {
            return Err(ProviderError::InvalidSignature {
                message: "no signature has been detected, for security reason we are not allowing webhooks that has no secret".to_string(),
            });
        }
        signature::verify_hex_sha256(signature, &event.payload, secret)
    }

    #[instrument(skip_all, fields(provider = "gitea", repository = %_repo.name()))]
    async fn set_client(
        &self,
        event: &mut Event,
        _repo: &Repository,
        _settings: &Settings,
    ) -> Result<(), ProviderError> {
        if event.provider.url.is_empty() {
            return Err(ProviderError::Configuration {
                message: "no git_provider.url has been set in the repo crd".to_string(),
            });
        }
        if event.provider.token.as_ref().map_or(true, |t| t.is_empty()) {
            return Err(ProviderError::Configuration {
                message: "no git_provider.secret has been set in the repo crd".to_string(),
            });
        }
        info!(user = %event.provider.user, provider_url = %event.provider.url, "gitea: initialized API client");

        if let (Some(number), true) = (event.pull_request_number, event.base_branch.is_empty()) {
            let pr: PullRequest = self
                .client(event)
                .get_json(&format!("{}/pulls/{}", Self::repo_path(event), number))
                .await?;
            apply_pull_request(event, &pr);
            event.sha_url = format!("{}/commit/{}", pr.html_url, pr.head.sha);
        }
        Ok(())
    }

    async fn get_commit_info(&self, event: &mut Event) -> Result<(), ProviderError> {
        let commit: CommitInfo = self
            .client(event)
            .get_json(&format!("{}/git/commits/{}", Self::repo_path(event), event.sha))
            .await?;
        event.sha_url = commit.html_url;
        event.sha_title = commit
            .commit
            .message
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();
        event.sha_author_name = commit.commit.author.name;
        event.sha_author_date = commit.commit.author.date;
        event.sha_committer_name = commit.commit.committer.name;
        Ok(())
    }

    #[instrument(skip(self, event), fields(provider = "gitea", sha = %event.sha))]
    async fn get_tekton_dir(
        &self,
        event: &Event,
        path: &str,
    ) -> Result<Vec<TektonFile>, ProviderError> {
        let client = self.client(event);
        let repo = Self::repo_path(event);
        let root: Tree = client
            .get_json(&format!("{}/git/trees/{}", repo, event.sha))
            .await?;
        let Some(dir) = root.tree.iter().find(|e| e.path == path) else {
            return Ok(Vec::new());
        };
        if dir.kind != "tree" {
            return Err(ProviderError::InvalidPayload {
                message: format!("{} has been found but is not a directory", path),
            });
        }
        let tree: Tree = client
            .get_json_query(
                &format!("{}/git/trees/{}", repo, dir.sha),
                &[("recursive", "true"), ("per_page", "1000")],
            )
            .await?;

        let mut files = Vec::new();
        for entry in tree
            .tree
            .iter()
            .filter(|e| e.kind == "blob" && (e.path.ends_with(".yaml") || e.path.ends_with(".yml")))
        {
            let blob: Content = client
                .get_json(&format!("{}/git/blobs/{}", repo, entry.sha))
                .await?;
            files.push(TektonFile {
                path: format!("{}/{}", path, entry.path),
                content: decode_base64(&blob.content, &entry.path)?,
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
        let reference = if branch.is_empty() { event.sha.as_str() } else { branch };
        let content: Content = self
            .client(event)
            .get_json_query(
                &format!("{}/contents/{}", Self::repo_path(event), path),
                &[("ref", reference)],
            )
            .await?;
        decode_base64(&content.content, path)
    }

    async fn get_files(&self, event: &Event) -> Result<ChangedFiles, ProviderError> {
        let client = self.client(event);
        let repo = Self::repo_path(event);
        let files: Vec<ChangedFile> = match event.pull_request_number {
            Some(number) => client.get_all(&format!("{}/pulls/{}/files", repo, number)).await?,
            None => {
                let commit: CommitInfo = client
                    .get_json(&format!("{}/git/commits/{}", repo, event.sha))
                    .await?;
                commit.files
            }
        };

        let mut changed = ChangedFiles::default();
        for file in files {
            match file.status.as_str() {
                "added" => changed.added.push(file.filename.clone()),
                "deleted" | "removed" => changed.deleted.push(file.filename.clone()),
                "renamed" => changed.renamed.push(file.filename.clone()),
                "modified" | "changed" => changed.modified.push(file.filename.clone()),
                _ => {}
            }
            changed.all.push(file.filename);
        }
        Ok(changed)
    }

    #[instrument(skip_all, fields(provider = "gitea", sender = %event.sender))]
    async fn is_allowed(
        &self,
        event: &Event,
        repo: &Repository,
        settings: &Settings,
    ) -> Result<bool, ProviderError> {
        let client = self.client(event);
        let policy = repo
            .spec
            .settings
            .as_ref()
            .and_then(|s| s.policy.clone())
            .unwrap_or_default();

        if self
            .user_allowed_by_policy(&client, event, &policy.pull_request, &event.sender)
            .await?
        {
            return Ok(true);
        }

        let Some(number) = event.pull_request_number else {
            return Ok(false);
        };
        if !settings.remember_ok_to_test {
            return Ok(false);
        }
        let teams = if policy.ok_to_test.is_empty() {
            &policy.pull_request
        } else {
            &policy.ok_to_test
        };
        let comments: Vec<PullRequestComment> = self
            .comments(&client, event, number)
            .await?
            .into_iter()
            .map(|c| PullRequestComment {
                author: c.user.map(|u| u.name()).unwrap_or_default(),
                body: c.body,
            })
            .collect();
        for author in acl::ok_to_test_authors(&comments) {
            if author != event.sender
                && self.user_allowed_by_policy(&client, event, teams, &author).await?
            {
                info!(approver = %author, "Pull request allowed by an /ok-to-test comment");
                return Ok(true);
            }
        }
        Ok(false)
    }

    #[instrument(skip_all, fields(provider = "gitea", conclusion = %options.conclusion))]
    async fn create_status(
        &self,
        event: &Event,
        options: &StatusOptions,
    ) -> Result<(), ProviderError> {
        let client = self.client(event);
        let context = context_name(options);
        let title = if options.status == RunStatus::InProgress {
            "CI has Started".to_string()
        } else {
            options.title.clone()
        };
        let mut body = json!({
            "state": status_state(options),
            "description": title,
            "context": context,
        });
        if !options.details_url.is_empty() {
            body["target_url"] = json!(options.details_url);
        }
        client
            .send_json_unit(
                Method::POST,
                &format!("{}/statuses/{}", Self::repo_path(event), event.sha),
                &body,
            )
            .await?;

        if options.text.is_empty() || event.pull_request_number.is_none() {
            return Ok(());
        }
        let summary = format!("{} {}", context, status_phrase(options));
        let text = options.text.trim().replace("<br>", "\n");
        self.create_comment(event, &format!("{}\n{}", summary, text), None)
            .await
    }

    /// With a `dedup_key` the first matching comment is edited in place.
    async fn create_comment(
        &self,
        event: &Event,
        body: &str,
        dedup_key: Option<&str>,
    ) -> Result<(), ProviderError> {
        let Some(number) = event.pull_request_number else {
            return Err(ProviderError::InvalidPayload {
                message: "create comment only works on pull requests".to_string(),
            });
        };
        let client = self.client(event);
        let repo = Self::repo_path(event);
        if let Some(key) = dedup_key {
            let existing = self.comments(&client, event, number).await?;
            if let Some(comment) = existing.iter().find(|c| c.body.starts_with(key)) {
                return client
                    .send_json_unit(
                        Method::PATCH,
                        &format!("{}/issues/comments/{}", repo, comment.id),
                        &json!({ "body": body }),
                    )
                    .await;
            }
        }
        client
            .send_json_unit(
                Method::POST,
                &format!("{}/issues/{}/comments", repo, number),
                &json!({ "body": body }),
            )
            .await
    }

    async fn get_task_uri(
        &self,
        _event: &Event,
        _uri: &str,
    ) -> Result<Option<String>, ProviderError> {
        Ok(None)
    }
}

fn decode_base64(content: &str, what: &str) -> Result<String, ProviderError> {
    let compact: String = content.split_whitespace().collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| ProviderError::InvalidPayload {
            message: format!("cannot decode {}: {}", what, e),
        })?;
    String::from_utf8(bytes).map_err(|e| ProviderError::InvalidPayload {
        message: format!("{} is not valid UTF-8: {}", what, e),
    })
}

#[cfg(test)]
#[path = "gitea_tests.rs"]
mod tests;
