//! # GitHub Provider
//!
//! GitHub and GitHub Enterprise integration, for both GitHub App installs
//! and plain webhooks.
//!
//! App installs authenticate with an installation token minted for each
//! event and report through check runs. Webhook installs use the token of
//! the Repository's secret and report through commit statuses, plus a pull
//! request comment once the run completes.

use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use pac_core::event::{ChangedFiles, Event};
use pac_core::provider::{
    CommitStatus, Detection, Provider, ProviderError, RunStatus, StatusOptions, TaskTableFormat,
    TektonFile, WebhookRequest,
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

pub mod app;
mod payload;

pub use app::{AppCredentials, AppTokenSource};
pub use payload::{
    DELIVERY_HEADER, ENTERPRISE_HOST_HEADER, EVENT_HEADER, SIGNATURE_256_HEADER,
    SIGNATURE_HEADER,
};

/// Public GitHub API.
pub const PUBLIC_API_URL: &str = "https://api.github.com";

const PUBLIC_HOST: &str = "github.com";
const ACCEPT: &str = "application/vnd.github+json";

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
struct Blob {
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct GitActor {
    #[serde(default)]
    name: String,
    #[serde(default)]
    date: String,
}

#[derive(Debug, Deserialize)]
struct GitCommit {
    #[serde(default)]
    sha: String,
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    message: String,
    author: Option<GitActor>,
    committer: Option<GitActor>,
}

#[derive(Debug, Deserialize)]
struct BranchCommit {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct BranchInfo {
    commit: BranchCommit,
}

#[derive(Debug, Deserialize)]
struct CommitFile {
    filename: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct CommitWithFiles {
    #[serde(default)]
    files: Vec<CommitFile>,
}

#[derive(Debug, Deserialize)]
struct RepositoryInfo {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct Login {
    #[serde(default)]
    login: String,
}

#[derive(Debug, Deserialize)]
struct IssueComment {
    id: i64,
    #[serde(default)]
    body: String,
    user: Option<Login>,
}

#[derive(Debug, Deserialize)]
struct TeamMembership {
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct CheckRunRef {
    id: i64,
    #[serde(default)]
    external_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckRunList {
    #[serde(default)]
    check_runs: Vec<CheckRunRef>,
}

// ============================================================================
// Provider
// ============================================================================

/// GitHub integration.
#[derive(Clone)]
pub struct GitHubProvider {
    http: reqwest::Client,
    api_url: String,
    app: Option<AppTokenSource>,
}

impl Default for GitHubProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GitHubProvider {
    pub fn new() -> Self {
        Self {
            http: http_client(),
            api_url: PUBLIC_API_URL.to_string(),
            app: None,
        }
    }

    /// Overrides the API endpoint used when the event names none.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Enables GitHub App installs.
    pub fn with_app(mut self, source: AppTokenSource) -> Self {
        self.app = Some(source);
        self
    }

    /// API endpoint for the event: the Repository's provider URL, then the
    /// enterprise host the webhook came from, then the default.
    fn api_url(&self, event: &Event) -> String {
        if !event.provider.url.is_empty() {
            return enterprise_api_url(&event.provider.url);
        }
        if !event.ghe_url.is_empty() {
            return enterprise_api_url(&event.ghe_url);
        }
        self.api_url.clone()
    }

    fn client(&self, event: &Event) -> ApiClient {
        let auth = match &event.provider.token {
            Some(token) if !token.is_empty() => Auth::Bearer(token.expose_secret().to_string()),
            _ => Auth::None,
        };
        ApiClient::new(self.http.clone(), self.api_url(event), auth).with_accept(ACCEPT)
    }

    fn repo_path(event: &Event) -> String {
        format!("/repos/{}/{}", event.organization, event.repository)
    }

    /// Repositories the installation token is limited to, as `org/repo`.
    /// Empty means the token is not scoped.
    fn token_scope(event: &Event, repo: &Repository, settings: &Settings) -> Vec<String> {
        let repo_scope = repo
            .spec
            .settings
            .as_ref()
            .map(|s| s.github_app_token_scope_repos.clone())
            .unwrap_or_default();
        if !settings.secret_github_app_token_scoped && repo_scope.is_empty() {
            return Vec::new();
        }
        let mut scope = vec![format!("{}/{}", event.organization, event.repository)];
        if settings.secret_github_app_token_scoped {
            scope.extend(settings.secret_github_app_scope_extra_repos.iter().cloned());
        }
        scope.extend(repo_scope);
        scope.sort();
        scope.dedup();
        scope
    }

    async fn repository_ids(
        client: &ApiClient,
        repositories: &[String],
    ) -> Result<Vec<i64>, ProviderError> {
        let mut ids = Vec::with_capacity(repositories.len());
        for full_name in repositories {
            let Some((owner, name)) = full_name.split_once('/') else {
                return Err(ProviderError::Configuration {
                    message: format!("invalid repository \"{}\" in token scope, expected org/repo", full_name),
                });
            };
            let info: RepositoryInfo = client
                .get_json(&format!("/repos/{}/{}", owner, name))
                .await
                .map_err(|e| ProviderError::Configuration {
                    message: format!("failed to scope token to repository {}: {}", full_name, e),
                })?;
            ids.push(info.id);
        }
        Ok(ids)
    }

    /// Mints the installation token, scoped when configured.
    async fn installation_token(
        &self,
        source: &AppTokenSource,
        event: &mut Event,
        installation_id: i64,
        repo: &Repository,
        settings: &Settings,
    ) -> Result<(), ProviderError> {
        let api_url = self.api_url(event);
        let token = source
            .installation_token(&self.http, &api_url, installation_id, &[])
            .await?;
        event.provider.token = Some(token);

        let scope = Self::token_scope(event, repo, settings);
        if scope.is_empty() {
            return Ok(());
        }
        let ids = Self::repository_ids(&self.client(event), &scope).await?;
        info!(repositories = ?scope, "Scoping GitHub App token");
        let scoped = source
            .installation_token(&self.http, &api_url, installation_id, &ids)
            .await?;
        event.provider.token = Some(scoped);
        Ok(())
    }

    /// Membership of `user` in any of the organization's `teams`.
    async fn in_teams(
        &self,
        client: &ApiClient,
        org: &str,
        teams: &[String],
        user: &str,
    ) -> Result<bool, ProviderError> {
        for team in teams {
            let path = format!("/orgs/{}/teams/{}/memberships/{}", org, team, user);
            match client.get_json::<TeamMembership>(&path).await {
                Ok(membership) if membership.state == "active" => return Ok(true),
                Ok(_) | Err(ProviderError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    /// Organization owner, public member, collaborator or `OWNERS` entry.
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
            .exists(&format!("/orgs/{}/public_members/{}", event.organization, user))
            .await?
        {
            debug!(user = %user, "User is a public member of the organization");
            return Ok(true);
        }
        if client
            .exists(&format!("{}/collaborators/{}", Self::repo_path(event), user))
            .await?
        {
            debug!(user = %user, "User is a repository collaborator");
            return Ok(true);
        }
        acl::sender_in_owners(self, event, user).await
    }

    /// Whether `user` passes the policy `teams`, or the regular checks
    /// when no team is configured.
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
        if self.in_teams(client, &event.organization, teams, user).await? {
            return Ok(true);
        }
        acl::sender_in_owners(self, event, user).await
    }

    async fn pull_request_comments(
        &self,
        client: &ApiClient,
        event: &Event,
        number: u64,
    ) -> Result<Vec<IssueComment>, ProviderError> {
        client
            .get_all(&format!("{}/issues/{}/comments?per_page=100", Self::repo_path(event), number))
            .await
    }

    /// Fills the pull request fields of comment and re-request events.
    async fn complete_pull_request(&self, event: &mut Event) -> Result<(), ProviderError> {
        let Some(number) = event.pull_request_number else {
            return Ok(());
        };
        let pr: payload::PullRequest = self
            .client(event)
            .get_json(&format!("{}/pulls/{}", Self::repo_path(event), number))
            .await?;
        payload::complete_from_pull_request(event, &pr);
        Ok(())
    }

    async fn check_run_id(
        &self,
        client: &ApiClient,
        event: &Event,
        options: &StatusOptions,
    ) -> Result<i64, ProviderError> {
        let repo = Self::repo_path(event);
        if !options.pipeline_run_name.is_empty() {
            let existing: CheckRunList = client
                .get_json(&format!("{}/commits/{}/check-runs", repo, event.sha))
                .await?;
            if let Some(run) = existing
                .check_runs
                .iter()
                .find(|r| r.external_id.as_deref() == Some(options.pipeline_run_name.as_str()))
            {
                return Ok(run.id);
            }
        }

        let mut body = json!({
            "name": check_name(options),
            "head_sha": event.sha,
            "status": RunStatus::InProgress.as_str(),
            "external_id": options.pipeline_run_name,
        });
        if !options.details_url.is_empty() {
            body["details_url"] = json!(options.details_url);
        }
        let created: CheckRunRef = client
            .send_json(Method::POST, &format!("{}/check-runs", repo), &body)
            .await?;
        Ok(created.id)
    }

    async fn update_check_run(
        &self,
        event: &Event,
        options: &StatusOptions,
    ) -> Result<(), ProviderError> {
        let client = self.client(event);
        let id = self.check_run_id(&client, event, options).await?;

        let mut body = json!({
            "name": check_name(options),
            "status": options.status.as_str(),
            "output": {
                "title": options.title,
                "summary": options.summary,
                "text": options.text,
            },
        });
        if !options.details_url.is_empty() {
            body["details_url"] = json!(options.details_url);
        }
        if let Some(conclusion) = check_conclusion(options) {
            body["status"] = json!(RunStatus::Completed.as_str());
            body["conclusion"] = json!(conclusion);
            body["completed_at"] = json!(Utc::now().to_rfc3339());
        }
        client
            .send_json_unit(
                Method::PATCH,
                &format!("{}/check-runs/{}", Self::repo_path(event), id),
                &body,
            )
            .await
    }

    async fn create_commit_status(
        &self,
        event: &Event,
        options: &StatusOptions,
    ) -> Result<(), ProviderError> {
        let mut body = json!({
            "state": commit_state(options),
            "description": options.title,
            "context": check_name(options),
        });
        if !options.details_url.is_empty() {
            body["target_url"] = json!(options.details_url);
        }
        self.client(event)
            .send_json_unit(
                Method::POST,
                &format!("{}/statuses/{}", Self::repo_path(event), event.sha),
                &body,
            )
            .await?;

        if options.status == RunStatus::Completed
            && event.pull_request_number.is_some()
            && !options.text.is_empty()
        {
            let comment = format!("{}<br>{}", options.title, options.text);
            self.create_comment(event, &comment, None).await?;
        }
        Ok(())
    }
}

/// `{app} / {pipeline}`, or the app name alone for event level statuses.
fn check_name(options: &StatusOptions) -> String {
    if options.original_pipeline_run_name.is_empty() {
        options.application_name.clone()
    } else {
        format!(
            "{} / {}",
            options.application_name, options.original_pipeline_run_name
        )
    }
}

/// Conclusion of a finished check run; `None` while still running.
fn check_conclusion(options: &StatusOptions) -> Option<&'static str> {
    match options.conclusion {
        CommitStatus::Pending => None,
        CommitStatus::Success => Some("success"),
        CommitStatus::Failure => Some("failure"),
        CommitStatus::Neutral => Some("neutral"),
        CommitStatus::Skipped => Some("skipped"),
        CommitStatus::Cancelled => Some("cancelled"),
    }
}

/// Commit status states know neither skipped nor cancelled.
fn commit_state(options: &StatusOptions) -> &'static str {
    match options.conclusion {
        CommitStatus::Success | CommitStatus::Skipped | CommitStatus::Neutral => "success",
        CommitStatus::Failure | CommitStatus::Cancelled => "failure",
        CommitStatus::Pending => "pending",
    }
}

/// API base of a GitHub host: `api.github.com` for the public host,
/// `https://<host>/api/v3` for Enterprise.
pub fn enterprise_api_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    let with_scheme = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    };
    let host = with_scheme
        .split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or_default();
    if host == PUBLIC_HOST || host == "api.github.com" {
        return PUBLIC_API_URL.to_string();
    }
    if with_scheme.ends_with("/api/v3") {
        with_scheme
    } else {
        format!("{}/api/v3", with_scheme)
    }
}

fn decode_content(content: &str, encoding: &str, what: &str) -> Result<String, ProviderError> {
    if encoding != "base64" {
        return Ok(content.to_string());
    }
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

fn is_yaml(path: &str) -> bool {
    path.ends_with(".yaml") || path.ends_with(".yml")
}

/// `(org, repo, ref, path)` of a `https://<host>/<org>/<repo>/blob/<ref>/<path>` URL.
fn parse_blob_url(uri: &str, hosts: &[&str]) -> Option<(String, String, String, String)> {
    let parsed = url::Url::parse(uri).ok()?;
    let host = parsed.host_str()?;
    if !hosts.contains(&host) {
        return None;
    }
    let segments: Vec<&str> = parsed.path_segments()?.collect();
    if segments.len() < 5 || segments[2] != "blob" {
        return None;
    }
    Some((
        segments[0].to_string(),
        segments[1].to_string(),
        segments[3].to_string(),
        segments[4..].join("/"),
    ))
}

#[async_trait]
impl Provider for GitHubProvider {
    fn name(&self) -> &'static str {
        "github"
    }

    fn detect(&self, request: &WebhookRequest) -> Result<Detection, ProviderError> {
        payload::detect(request)
    }

    #[instrument(skip_all, fields(provider = "github"))]
    async fn parse_payload(&self, request: &WebhookRequest) -> Result<Event, ProviderError> {
        let event_name = request.header(EVENT_HEADER).ok_or_else(|| ProviderError::InvalidPayload {
            message: format!("missing {} header", EVENT_HEADER),
        })?;
        let parsed = payload::parse_event(event_name, &request.body)?;
        let mut event = parsed.event;
        event.headers = request.headers.clone();
        event.payload = request.body.clone();
        if let Some(host) = request.header(ENTERPRISE_HOST_HEADER) {
            event.ghe_url = host.to_string();
        }
        debug!(
            repository_id = parsed.repository_id,
            event_type = %event.event_type,
            "Parsed GitHub payload"
        );
        Ok(event)
    }

    fn validate(&self, event: &Event) -> Result<(), ProviderError> {
        let signature = event
            .headers
            .get(SIGNATURE_256_HEADER)
            .or_else(|| event.headers.get(SIGNATURE_HEADER))
            .map(String::as_str)
            .unwrap_or_default();
        if signature.is_empty() {
            return Err(ProviderError::InvalidSignature {
                message: "no signature has been detected, for security reason we are not allowing webhooks that has no secret".to_string(),
            });
        }
        let secret = event
            .provider
            .webhook_secret
            .as_ref()
            .map(|s| s.expose_secret().to_string())
            .unwrap_or_default();
        signature::verify_prefixed(signature, &event.payload, &secret)
    }

    #[instrument(skip_all, fields(provider = "github", repository = %repo.name()))]
    async fn set_client(
        &self,
        event: &mut Event,
        repo: &Repository,
        settings: &Settings,
    ) -> Result<(), ProviderError> {
        if let (Some(installation_id), Some(source)) = (event.installation_id, self.app.as_ref()) {
            if installation_id > 0 {
                self.installation_token(source, event, installation_id, repo, settings)
                    .await?;
            }
        }
        if event.pull_request_number.is_some() && event.base_branch.is_empty() {
            self.complete_pull_request(event).await?;
        }
        Ok(())
    }

    async fn get_commit_info(&self, event: &mut Event) -> Result<(), ProviderError> {
        let client = self.client(event);
        if event.sha.is_empty() && !event.head_branch.is_empty() {
            let branch: BranchInfo = client
                .get_json(&format!("{}/branches/{}", Self::repo_path(event), event.head_branch))
                .await?;
            event.sha = branch.commit.sha;
        }
        let commit: GitCommit = client
            .get_json(&format!("{}/git/commits/{}", Self::repo_path(event), event.sha))
            .await?;
        event.sha = commit.sha;
        event.sha_url = commit.html_url;
        event.sha_title = commit
            .message
            .split("\n\n")
            .next()
            .unwrap_or_default()
            .to_string();
        if let Some(author) = commit.author {
            event.sha_author_name = author.name;
            event.sha_author_date = author.date;
        }
        if let Some(committer) = commit.committer {
            event.sha_committer_name = committer.name;
        }
        Ok(())
    }

    #[instrument(skip(self, event), fields(provider = "github", sha = %event.sha))]
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
            .get_json_query(&format!("{}/git/trees/{}", repo, dir.sha), &[("recursive", "1")])
            .await?;
        let mut files = Vec::new();
        for entry in tree.tree.iter().filter(|e| e.kind == "blob" && is_yaml(&e.path)) {
            let blob: Blob = client
                .get_json(&format!("{}/git/blobs/{}", repo, entry.sha))
                .await?;
            let full_path = format!("{}/{}", path, entry.path);
            let content = decode_content(&blob.content, &blob.encoding, &full_path)?;
            files.push(TektonFile {
                path: full_path,
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
        let reference = if branch.is_empty() { event.sha.as_str() } else { branch };
        let value: serde_json::Value = self
            .client(event)
            .get_json_query(
                &format!("{}/contents/{}", Self::repo_path(event), path),
                &[("ref", reference)],
            )
            .await?;
        if value.is_array() {
            return Err(ProviderError::InvalidPayload {
                message: format!("referenced file inside the Github Repository {} is a directory", path),
            });
        }
        let blob: Blob = serde_json::from_value(value).map_err(|e| ProviderError::InvalidPayload {
            message: format!("cannot decode content of {}: {}", path, e),
        })?;
        decode_content(&blob.content, &blob.encoding, path)
    }

    async fn get_files(&self, event: &Event) -> Result<ChangedFiles, ProviderError> {
        let client = self.client(event);
        let repo = Self::repo_path(event);
        let files: Vec<CommitFile> = match event.pull_request_number {
            Some(number) => {
                client
                    .get_all(&format!("{}/pulls/{}/files?per_page=100", repo, number))
                    .await?
            }
            None => {
                let commit: CommitWithFiles = client
                    .get_json(&format!("{}/commits/{}", repo, event.sha))
                    .await?;
                commit.files
            }
        };

        let mut changed = ChangedFiles::default();
        for file in files {
            match file.status.as_str() {
                "added" => changed.added.push(file.filename.clone()),
                "removed" => changed.deleted.push(file.filename.clone()),
                "modified" => changed.modified.push(file.filename.clone()),
                "renamed" => changed.renamed.push(file.filename.clone()),
                _ => {}
            }
            changed.all.push(file.filename);
        }
        Ok(changed)
    }

    #[instrument(skip_all, fields(provider = "github", sender = %event.sender))]
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

        // 1. The sender on its own
        if self
            .user_allowed_by_policy(&client, event, &policy.pull_request, &event.sender)
            .await?
        {
            return Ok(true);
        }

        // 2. An earlier /ok-to-test from someone allowed
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
            .pull_request_comments(&client, event, number)
            .await?
            .into_iter()
            .map(|c| PullRequestComment {
                author: c.user.map(|u| u.login).unwrap_or_default(),
                body: c.body,
            })
            .collect();
        for author in acl::ok_to_test_authors(&comments) {
            if author == event.sender {
                continue;
            }
            if self.user_allowed_by_policy(&client, event, teams, &author).await? {
                info!(approver = %author, "Pull request allowed by an /ok-to-test comment");
                return Ok(true);
            }
        }
        Ok(false)
    }

    #[instrument(skip_all, fields(provider = "github", conclusion = %options.conclusion))]
    async fn create_status(
        &self,
        event: &Event,
        options: &StatusOptions,
    ) -> Result<(), ProviderError> {
        if event.sha.is_empty() {
            debug!("No commit to report a status on");
            return Ok(());
        }
        if event.installation_id.unwrap_or(0) > 0 {
            self.update_check_run(event, options).await
        } else {
            self.create_commit_status(event, options).await
        }
    }

    async fn create_comment(
        &self,
        event: &Event,
        body: &str,
        dedup_key: Option<&str>,
    ) -> Result<(), ProviderError> {
        let Some(number) = event.pull_request_number else {
            debug!("Not a pull request, comment dropped");
            return Ok(());
        };
        let client = self.client(event);
        let repo = Self::repo_path(event);
        if let Some(key) = dedup_key {
            for comment in self.pull_request_comments(&client, event, number).await? {
                if comment.body.starts_with(key) {
                    client
                        .delete(&format!("{}/issues/comments/{}", repo, comment.id))
                        .await?;
                }
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
        event: &Event,
        uri: &str,
    ) -> Result<Option<String>, ProviderError> {
        let ghe_host = event
            .ghe_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        let mut hosts = vec![PUBLIC_HOST];
        if !ghe_host.is_empty() {
            hosts.push(ghe_host);
        }
        let Some((org, repository, reference, path)) = parse_blob_url(uri, &hosts) else {
            return Ok(None);
        };
        let mut target = event.clone();
        target.organization = org;
        target.repository = repository;
        let content = self.get_file_inside_repo(&target, &path, &reference).await?;
        Ok(Some(content))
    }

    fn task_table_format(&self) -> TaskTableFormat {
        TaskTableFormat::Html
    }

    fn supports_check_runs(&self) -> bool {
        self.app.is_some()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
