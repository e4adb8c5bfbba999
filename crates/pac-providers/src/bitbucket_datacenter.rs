//! # Bitbucket Data Center Provider
//!
//! Integration with self-hosted Bitbucket Server / Data Center through the
//! `/rest/api/1.0` and `/rest/build-status/1.0` APIs.
//!
//! The event organization holds the project key as the API expects it,
//! including the `~` of personal projects. Users are matched by their
//! numeric id, carried on the event as `account_id`.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use pac_core::event::{event_types, ChangedFiles, Event, TriggerType};
use pac_core::opscomments;
use pac_core::provider::{
    CommitStatus, Detection, Provider, ProviderError, RunStatus, StatusOptions, TektonFile,
    WebhookRequest,
};
use pac_core::repository::Repository;
use pac_core::settings::Settings;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::acl::{self, PullRequestComment};
use crate::client::{http_client, ApiClient, Auth};
use crate::signature;

pub const EVENT_HEADER: &str = "x-event-key";
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

const PULL_REQUEST_OPENED: &[&str] = &["pr:opened", "pr:from_ref_updated"];
const PULL_REQUEST_COMMENT: &[&str] = &["pr:comment:added", "pr:comment:edited"];
const PULL_REQUEST_CLOSED: &[&str] = &["pr:merged", "pr:declined"];
const PUSH: &str = "repo:refs_changed";
const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

/// Page size requested from list endpoints.
const PAGE_LIMIT: usize = 100;
const MAX_PAGES: usize = 20;

// ============================================================================
// Webhook Payloads
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct Href {
    #[serde(default)]
    href: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct RepoLinks {
    #[serde(default)]
    clone: Vec<Href>,
    #[serde(rename = "self", default)]
    self_: Vec<Href>,
}

#[derive(Debug, Default, Deserialize)]
struct Project {
    #[serde(default)]
    key: String,
}

#[derive(Debug, Default, Deserialize)]
struct Repo {
    #[serde(default)]
    slug: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    project: Option<Project>,
    #[serde(default)]
    links: Option<RepoLinks>,
}

impl Repo {
    fn slug(&self) -> String {
        if self.slug.is_empty() {
            self.name.clone()
        } else {
            self.slug.clone()
        }
    }

    fn project_key(&self) -> Option<&str> {
        self.project
            .as_ref()
            .map(|p| p.key.as_str())
            .filter(|k| !k.is_empty())
    }

    fn self_link(&self) -> Option<String> {
        self.links
            .as_ref()
            .and_then(|l| l.self_.first())
            .map(|h| browse_url(&h.href))
    }

    fn http_clone_link(&self) -> String {
        self.links
            .as_ref()
            .and_then(|l| l.clone.iter().find(|h| h.name == "http"))
            .map(|h| h.href.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default, Deserialize)]
struct User {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    slug: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestRef {
    #[serde(default)]
    display_id: String,
    #[serde(default)]
    latest_commit: String,
    #[serde(default)]
    repository: Repo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    from_ref: PullRequestRef,
    #[serde(default)]
    to_ref: PullRequestRef,
}

#[derive(Debug, Default, Deserialize)]
struct Comment {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushChange {
    #[serde(default)]
    ref_id: String,
    #[serde(default)]
    to_hash: String,
    #[serde(default, rename = "type")]
    kind: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    #[serde(default)]
    actor: User,
    #[serde(default)]
    pull_request: Option<PullRequest>,
    #[serde(default)]
    comment: Option<Comment>,
    #[serde(default)]
    repository: Option<Repo>,
    #[serde(default)]
    changes: Vec<PushChange>,
}

fn parse(body: &[u8]) -> Result<Payload, ProviderError> {
    serde_json::from_slice(body).map_err(|e| ProviderError::InvalidPayload {
        message: format!("cannot parse Bitbucket Data Center payload: {}", e),
    })
}

/// Repository URL without the trailing `/browse`.
fn browse_url(url: &str) -> String {
    url.strip_suffix("/browse").unwrap_or(url).to_string()
}

fn invalid(message: &str) -> ProviderError {
    ProviderError::InvalidPayload {
        message: format!("bitbucket-datacenter: {}", message),
    }
}

fn is_own_event(name: &str) -> bool {
    name.starts_with("pr:") || name == PUSH
}

// ============================================================================
// API Shapes
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
    #[serde(default = "default_last_page")]
    is_last_page: bool,
    #[serde(default)]
    next_page_start: Option<usize>,
}

fn default_last_page() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Person {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitInfo {
    #[serde(default)]
    message: String,
    #[serde(default)]
    author: Person,
    #[serde(default)]
    author_timestamp: i64,
    #[serde(default)]
    committer: Person,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Branch {
    #[serde(default)]
    display_id: String,
}

#[derive(Debug, Deserialize)]
struct Permission {
    user: User,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePath {
    #[serde(default, rename = "toString")]
    full: String,
}

#[derive(Debug, Deserialize)]
struct FileChange {
    #[serde(default)]
    path: ChangePath,
    #[serde(default, rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ActivityComment {
    id: i64,
    #[serde(default)]
    version: i64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    author: User,
}

#[derive(Debug, Deserialize)]
struct Activity {
    #[serde(default)]
    comment: Option<ActivityComment>,
}

// ============================================================================
// Provider
// ============================================================================

/// Bitbucket Data Center integration, authenticated with an HTTP access
/// token.
#[derive(Debug, Clone)]
pub struct BitbucketDataCenterProvider {
    http: reqwest::Client,
}

impl Default for BitbucketDataCenterProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl BitbucketDataCenterProvider {
    pub fn new() -> Self {
        Self { http: http_client() }
    }

    /// REST root of the instance, always ending in `/rest`.
    pub fn rest_url(url: &str) -> String {
        let url = url.trim_end_matches('/');
        if url.ends_with("/rest") {
            url.to_string()
        } else {
            format!("{}/rest", url)
        }
    }

    fn client(&self, event: &Event) -> ApiClient {
        let auth = match &event.provider.token {
            Some(token) if !token.is_empty() => Auth::Bearer(token.expose_secret().to_string()),
            _ => Auth::None,
        };
        ApiClient::new(self.http.clone(), Self::rest_url(&event.provider.url), auth)
    }

    fn repo_path(event: &Event) -> String {
        format!(
            "/api/1.0/projects/{}/repos/{}",
            event.organization, event.repository
        )
    }

    /// Walks `start`/`limit` pagination until the last page.
    async fn paged<T: DeserializeOwned>(
        client: &ApiClient,
        path: &str,
    ) -> Result<Vec<T>, ProviderError> {
        let mut values = Vec::new();
        let mut start = 0usize;
        let limit = PAGE_LIMIT.to_string();
        for _ in 0..MAX_PAGES {
            let start_param = start.to_string();
            let page: Page<T> = client
                .get_json_query(path, &[("start", start_param.as_str()), ("limit", limit.as_str())])
                .await?;
            values.extend(page.values);
            match page.next_page_start {
                Some(next) if !page.is_last_page => start = next,
                _ => return Ok(values),
            }
        }
        debug!(path = %path, "Stopping pagination at the page cap");
        Ok(values)
    }

    async fn has_permission(
        &self,
        client: &ApiClient,
        event: &Event,
        account_id: &str,
    ) -> Result<bool, ProviderError> {
        let Ok(id) = account_id.parse::<i64>() else {
            return Ok(false);
        };
        let project: Vec<Permission> = Self::paged(
            client,
            &format!("/api/1.0/projects/{}/permissions/users", event.organization),
        )
        .await?;
        if project.iter().any(|p| p.user.id == id) {
            return Ok(true);
        }
        let repository: Vec<Permission> = Self::paged(
            client,
            &format!("{}/permissions/users", Self::repo_path(event)),
        )
        .await?;
        Ok(repository.iter().any(|p| p.user.id == id))
    }

    async fn check_member(
        &self,
        client: &ApiClient,
        event: &Event,
        account_id: &str,
    ) -> Result<bool, ProviderError> {
        if self.has_permission(client, event, account_id).await? {
            return Ok(true);
        }
        acl::sender_in_owners(self, event, account_id).await
    }

    async fn comments(
        &self,
        client: &ApiClient,
        event: &Event,
        number: u64,
    ) -> Result<Vec<ActivityComment>, ProviderError> {
        let activities: Vec<Activity> = Self::paged(
            client,
            &format!("{}/pull-requests/{}/activities", Self::repo_path(event), number),
        )
        .await?;
        Ok(activities.into_iter().filter_map(|a| a.comment).collect())
    }
}

fn build_state(options: &StatusOptions) -> (&'static str, &'static str) {
    if options.status != RunStatus::Completed {
        return ("INPROGRESS", "CI has started");
    }
    match options.conclusion {
        CommitStatus::Success => ("SUCCESSFUL", "Commit has been validated"),
        CommitStatus::Failure => ("FAILED", "Failed"),
        CommitStatus::Skipped => ("FAILED", "Skipping this commit"),
        CommitStatus::Neutral | CommitStatus::Cancelled => ("FAILED", "CI has stopped"),
        CommitStatus::Pending => ("INPROGRESS", "CI has started"),
    }
}

fn status_key(options: &StatusOptions, title: &str) -> String {
    let name = if options.pipeline_run_name.is_empty() {
        title
    } else {
        options.pipeline_run_name.as_str()
    };
    if options.application_name.is_empty() {
        name.to_string()
    } else {
        format!("{} / {}", options.application_name, name)
    }
}

#[async_trait]
impl Provider for BitbucketDataCenterProvider {
    fn name(&self) -> &'static str {
        "bitbucket-datacenter"
    }

    fn detect(&self, request: &WebhookRequest) -> Result<Detection, ProviderError> {
        let Some(event) = request.header(EVENT_HEADER).filter(|e| is_own_event(e)) else {
            return Ok(Detection::default());
        };
        let payload = parse(&request.body)?;

        let detection = if PULL_REQUEST_OPENED.contains(&event) || PULL_REQUEST_CLOSED.contains(&event)
        {
            Detection::matched()
        } else if PULL_REQUEST_COMMENT.contains(&event) {
            let text = payload.comment.map(|c| c.text).unwrap_or_default();
            if opscomments::is_gitops_command(&text, opscomments::DEFAULT_PREFIX) {
                Detection::gitops_comment()
            } else {
                Detection::matched()
            }
        } else if event == PUSH {
            if payload.changes.is_empty() {
                Detection::skipped("push event contains no changes")
            } else if payload
                .changes
                .iter()
                .any(|c| c.kind == "DELETE" && c.to_hash == ZERO_SHA)
            {
                Detection::skipped("branch delete event is not supported")
            } else {
                Detection::matched()
            }
        } else {
            Detection::skipped(format!(
                "bitbucket-datacenter: event \"{}\" is not supported",
                event
            ))
        };
        Ok(detection)
    }

    #[instrument(skip_all, fields(provider = "bitbucket-datacenter"))]
    async fn parse_payload(&self, request: &WebhookRequest) -> Result<Event, ProviderError> {
        let kind = request.header(EVENT_HEADER).unwrap_or_default().to_string();
        let payload = parse(&request.body)?;

        let mut event = if kind.starts_with("pr:") {
            let pr = payload
                .pull_request
                .as_ref()
                .ok_or_else(|| invalid("pull request event without pullRequest"))?;
            if pr.id == 0 {
                return Err(invalid("pull request ID is zero"));
            }
            let to = &pr.to_ref;
            let from = &pr.from_ref;
            let project = to
                .repository
                .project_key()
                .ok_or_else(|| invalid("toRef project key is empty"))?;
            if to.latest_commit.is_empty() || from.latest_commit.is_empty() {
                return Err(invalid("pull request refs carry no latest commit"));
            }

            let mut event = Event::new(event_types::PULL_REQUEST, TriggerType::PullRequest);
            if PULL_REQUEST_COMMENT.contains(&kind.as_str()) {
                let text = payload.comment.as_ref().map(|c| c.text.clone()).unwrap_or_default();
                opscomments::apply_comment_trigger(&mut event, &text, opscomments::DEFAULT_PREFIX);
            } else if PULL_REQUEST_CLOSED.contains(&kind.as_str()) {
                event.trigger_target = TriggerType::PullRequestClosed;
            } else if !PULL_REQUEST_OPENED.contains(&kind.as_str()) {
                return Err(ProviderError::UnsupportedEvent { event_type: kind });
            }
            event.organization = project.to_string();
            event.repository = to.repository.slug();
            event.sha = from.latest_commit.clone();
            event.base_branch = to.display_id.clone();
            event.head_branch = from.display_id.clone();
            event.url = to
                .repository
                .self_link()
                .ok_or_else(|| invalid("toRef repository has no self link"))?;
            event.head_url = from.repository.self_link().unwrap_or_default();
            event.clone_url = from.repository.http_clone_link();
            event.pull_request_number = Some(pr.id);
            event.pull_request_title = pr.title.clone();
            event
        } else if kind == PUSH {
            let repo = payload
                .repository
                .as_ref()
                .ok_or_else(|| invalid("push event without repository"))?;
            let change = payload
                .changes
                .first()
                .ok_or_else(|| invalid("push event contains no changes"))?;
            if payload
                .changes
                .iter()
                .any(|c| c.kind == "DELETE" && c.to_hash == ZERO_SHA)
            {
                return Err(invalid("branch delete event is not supported"));
            }

            let mut event = Event::new(event_types::PUSH, TriggerType::Push);
            event.organization = repo
                .project_key()
                .ok_or_else(|| invalid("repository project key is empty"))?
                .to_string();
            event.repository = repo.slug();
            event.sha = change.to_hash.clone();
            event.base_branch = change.ref_id.clone();
            event.head_branch = change.ref_id.clone();
            event.url = repo
                .self_link()
                .ok_or_else(|| invalid("repository has no self link"))?;
            event.head_url = event.url.clone();
            event.clone_url = repo.http_clone_link();
            event
        } else {
            return Err(ProviderError::UnsupportedEvent { event_type: kind });
        };

        if payload.actor.id == 0 {
            return Err(invalid("actor ID is zero"));
        }
        event.account_id = payload.actor.id.to_string();
        event.sender = if payload.actor.slug.is_empty() {
            payload.actor.name.clone()
        } else {
            payload.actor.slug.clone()
        };
        event.headers = request.headers.clone();
        event.payload = request.body.clone();
        Ok(event)
    }

    fn validate(&self, event: &Event) -> Result<(), ProviderError> {
        let signature = event
            .headers
            .get(SIGNATURE_HEADER)
            .map(String::as_str)
            .unwrap_or_default();
        let secret = event
            .provider
            .webhook_secret
            .as_ref()
            .map(|s| s.expose_secret())
            .unwrap_or_default();
        if secret.is_empty() && !signature.is_empty() {
            return Err(ProviderError::InvalidSignature {
                message: "bitbucket-datacenter failed validation: failed to find webhook secret"
                    .to_string(),
            });
        }
        signature::verify_prefixed(signature, &event.payload, secret)
    }

    #[instrument(skip_all, fields(provider = "bitbucket-datacenter", repository = %_repo.name()))]
    async fn set_client(
        &self,
        event: &mut Event,
        _repo: &Repository,
        _settings: &Settings,
    ) -> Result<(), ProviderError> {
        if event.provider.user.is_empty() {
            return Err(ProviderError::Configuration {
                message: "no spec.git_provider.user has been set in the repo crd".to_string(),
            });
        }
        if event.provider.token.as_ref().map_or(true, |t| t.is_empty()) {
            return Err(ProviderError::Configuration {
                message: "no spec.git_provider.secret has been set in the repo crd".to_string(),
            });
        }
        if event.provider.url.is_empty() {
            return Err(ProviderError::Configuration {
                message: "no spec.git_provider.url has been set in the repo crd".to_string(),
            });
        }
        event.provider.url = Self::rest_url(&event.provider.url);
        info!(user = %event.provider.user, provider_url = %event.provider.url, "bitbucket-datacenter: initialized client with provided token");

        let user = event.provider.user.clone();
        match self
            .client(event)
            .get_json::<serde_json::Value>(&format!("/api/1.0/users/{}", user))
            .await
        {
            Ok(_) => Ok(()),
            Err(ProviderError::Authentication { message }) => Err(ProviderError::Authentication {
                message: format!("cannot get user {} with token: {}", user, message),
            }),
            Err(e) => Err(e),
        }
    }

    async fn get_commit_info(&self, event: &mut Event) -> Result<(), ProviderError> {
        let client = self.client(event);
        let repo = Self::repo_path(event);
        let commit: CommitInfo = client
            .get_json(&format!("{}/commits/{}", repo, event.sha))
            .await?;
        event.sha_title = commit.message.lines().next().unwrap_or_default().to_string();
        let instance = Self::rest_url(&event.provider.url);
        event.sha_url = format!(
            "{}/projects/{}/repos/{}/commits/{}",
            instance.trim_end_matches("/rest"),
            event.organization,
            event.repository,
            event.sha
        );
        event.sha_author_name = commit.author.name;
        if commit.author_timestamp > 0 {
            if let Some(date) = Utc.timestamp_millis_opt(commit.author_timestamp).single() {
                event.sha_author_date = date.to_rfc3339();
            }
        }
        event.sha_committer_name = commit.committer.name;

        let branch: Branch = client
            .get_json(&format!("{}/branches/default", repo))
            .await?;
        event.default_branch = branch.display_id;
        Ok(())
    }

    #[instrument(skip(self, event), fields(provider = "bitbucket-datacenter", sha = %event.sha))]
    async fn get_tekton_dir(
        &self,
        event: &Event,
        path: &str,
    ) -> Result<Vec<TektonFile>, ProviderError> {
        let client = self.client(event);
        let dir = path.trim_matches('/');
        let listing = format!("{}/files/{}?at={}", Self::repo_path(event), dir, event.sha);
        let names: Vec<String> = match Self::paged(&client, &listing).await {
            Ok(names) => names,
            Err(ProviderError::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        for name in names
            .iter()
            .filter(|n| n.ends_with(".yaml") || n.ends_with(".yml"))
        {
            let file_path = format!("{}/{}", dir, name);
            let content = self.get_file_inside_repo(event, &file_path, "").await?;
            files.push(TektonFile {
                path: file_path,
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
        let reference = if branch.is_empty() {
            event.sha.clone()
        } else {
            format!("refs/heads/{}", branch)
        };
        self.client(event)
            .get_text(&format!(
                "{}/raw/{}?at={}",
                Self::repo_path(event),
                path.trim_start_matches('/'),
                urlencoding::encode(&reference)
            ))
            .await
    }

    async fn get_files(&self, event: &Event) -> Result<ChangedFiles, ProviderError> {
        let client = self.client(event);
        let repo = Self::repo_path(event);
        let path = match event.pull_request_number {
            Some(number) => format!("{}/pull-requests/{}/changes", repo, number),
            None => format!("{}/commits/{}/changes", repo, event.sha),
        };
        let changes: Vec<FileChange> = Self::paged(&client, &path).await?;

        let mut changed = ChangedFiles::default();
        for change in changes {
            let name = change.path.full;
            match change.kind.as_str() {
                "ADD" | "COPY" => changed.added.push(name.clone()),
                "DELETE" => changed.deleted.push(name.clone()),
                "MOVE" => changed.renamed.push(name.clone()),
                "MODIFY" => changed.modified.push(name.clone()),
                _ => {}
            }
            changed.all.push(name);
        }
        Ok(changed)
    }

    #[instrument(skip_all, fields(provider = "bitbucket-datacenter", sender = %event.sender))]
    async fn is_allowed(
        &self,
        event: &Event,
        _repo: &Repository,
        settings: &Settings,
    ) -> Result<bool, ProviderError> {
        let client = self.client(event);
        if self.check_member(&client, event, &event.account_id).await? {
            return Ok(true);
        }

        let Some(number) = event.pull_request_number else {
            return Ok(false);
        };
        if !settings.remember_ok_to_test {
            return Ok(false);
        }
        let comments: Vec<PullRequestComment> = self
            .comments(&client, event, number)
            .await?
            .into_iter()
            .map(|c| PullRequestComment {
                author: c.author.id.to_string(),
                body: c.text,
            })
            .collect();
        for account_id in acl::ok_to_test_authors(&comments) {
            if account_id != event.account_id
                && self.check_member(&client, event, &account_id).await?
            {
                info!(approver = %account_id, "Pull request allowed by an /ok-to-test comment");
                return Ok(true);
            }
        }
        Ok(false)
    }

    #[instrument(skip_all, fields(provider = "bitbucket-datacenter", conclusion = %options.conclusion))]
    async fn create_status(
        &self,
        event: &Event,
        options: &StatusOptions,
    ) -> Result<(), ProviderError> {
        if event.provider.token.is_none() {
            return Err(ProviderError::Configuration {
                message: "no token has been set, cannot set status".to_string(),
            });
        }
        let (state, title) = build_state(options);
        let details_url = if options.details_url.is_empty() {
            event.url.clone()
        } else {
            options.details_url.clone()
        };
        self.client(event)
            .send_json_unit(
                Method::POST,
                &format!("/build-status/1.0/commits/{}", event.sha),
                &json!({
                    "state": state,
                    "key": status_key(options, title),
                    "url": details_url,
                    "description": title,
                }),
            )
            .await?;

        if options.status == RunStatus::Completed
            && options.conclusion != CommitStatus::Skipped
            && !options.text.is_empty()
            && event.pull_request_number.is_some()
        {
            let on_pr = if options.original_pipeline_run_name.is_empty() {
                String::new()
            } else {
                format!("/{}", options.original_pipeline_run_name)
            };
            let body = format!(
                "**{}{}** - {}\n\n{}",
                options.application_name, on_pr, title, options.text
            );
            self.create_comment(event, &body, None).await?;
        }
        Ok(())
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
        let comments_path = format!("{}/pull-requests/{}/comments", Self::repo_path(event), number);
        if let Some(key) = dedup_key {
            let existing = self.comments(&client, event, number).await?;
            if let Some(comment) = existing.iter().find(|c| c.text.starts_with(key)) {
                return client
                    .send_json_unit(
                        Method::PUT,
                        &format!("{}/{}", comments_path, comment.id),
                        &json!({ "text": body, "version": comment.version }),
                    )
                    .await;
            }
        }
        client
            .send_json_unit(Method::POST, &comments_path, &json!({ "text": body }))
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

#[cfg(test)]
#[path = "bitbucket_datacenter_tests.rs"]
mod tests;
