//! # Bitbucket Cloud Provider
//!
//! Integration with bitbucket.org through the 2.0 REST API.
//!
//! Bitbucket Cloud identifies users by account id rather than login, so the
//! event carries `account_id` and both the OWNERS file and workspace
//! membership are matched on it.

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
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::acl::{self, PullRequestComment};
use crate::client::{http_client, ApiClient, Auth};
use crate::signature;

pub const EVENT_HEADER: &str = "x-event-key";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const SIGNATURE_HEADER: &str = "x-hub-signature";
pub const API_URL: &str = "https://api.bitbucket.org/2.0";

const PULL_REQUEST_OPENED: &[&str] = &["pullrequest:created", "pullrequest:updated"];
const PULL_REQUEST_COMMENT: &str = "pullrequest:comment_created";
const PULL_REQUEST_CLOSED: &[&str] = &["pullrequest:fulfilled", "pullrequest:rejected"];
const PUSH: &str = "repo:push";

/// Page cap for `next` link pagination.
const MAX_PAGES: usize = 20;

// ============================================================================
// Webhook Payloads
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct Href {
    #[serde(default)]
    href: String,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    html: Href,
}

#[derive(Debug, Default, Deserialize)]
struct Account {
    #[serde(default)]
    account_id: String,
    #[serde(default)]
    nickname: String,
}

#[derive(Debug, Default, Deserialize)]
struct Workspace {
    #[serde(default)]
    slug: String,
}

#[derive(Debug, Default, Deserialize)]
struct Repo {
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    workspace: Workspace,
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Default, Deserialize)]
struct NamedRef {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct CommitRef {
    #[serde(default)]
    hash: String,
}

#[derive(Debug, Default, Deserialize)]
struct Endpoint {
    #[serde(default)]
    branch: NamedRef,
    #[serde(default)]
    commit: CommitRef,
    #[serde(default)]
    repository: Option<Repo>,
}

#[derive(Debug, Default, Deserialize)]
struct PullRequest {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: Account,
    #[serde(default)]
    source: Endpoint,
    #[serde(default)]
    destination: Endpoint,
}

#[derive(Debug, Default, Deserialize)]
struct Content {
    #[serde(default)]
    raw: String,
}

#[derive(Debug, Default, Deserialize)]
struct Comment {
    #[serde(default)]
    content: Content,
}

#[derive(Debug, Default, Deserialize)]
struct Target {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Default, Deserialize)]
struct RefState {
    #[serde(default)]
    name: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    target: Target,
}

#[derive(Debug, Default, Deserialize)]
struct Change {
    #[serde(default)]
    new: Option<RefState>,
    #[serde(default)]
    old: Option<RefState>,
}

#[derive(Debug, Default, Deserialize)]
struct Push {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    repository: Repo,
    #[serde(default)]
    actor: Account,
    #[serde(default)]
    pullrequest: Option<PullRequest>,
    #[serde(default)]
    comment: Option<Comment>,
    #[serde(default)]
    push: Option<Push>,
}

fn parse(body: &[u8]) -> Result<Payload, ProviderError> {
    serde_json::from_slice(body).map_err(|e| ProviderError::InvalidPayload {
        message: format!("cannot parse Bitbucket Cloud payload: {}", e),
    })
}

fn is_own_event(name: &str) -> bool {
    name.starts_with("pullrequest:") || name == PUSH
}

// ============================================================================
// API Shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SourceEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Default, Deserialize)]
struct CommitUser {
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct CommitAuthor {
    #[serde(default)]
    raw: String,
    #[serde(default)]
    user: Option<CommitUser>,
}

#[derive(Debug, Deserialize)]
struct CommitInfo {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    links: Links,
    #[serde(default)]
    author: CommitAuthor,
}

#[derive(Debug, Default, Deserialize)]
struct MainBranch {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryInfo {
    #[serde(default)]
    mainbranch: MainBranch,
}

#[derive(Debug, Deserialize)]
struct Member {
    user: Account,
}

#[derive(Debug, Default, Deserialize)]
struct DiffPath {
    #[serde(default)]
    path: String,
}

#[derive(Debug, Deserialize)]
struct DiffStat {
    #[serde(default)]
    status: String,
    #[serde(default)]
    old: Option<DiffPath>,
    #[serde(default)]
    new: Option<DiffPath>,
}

#[derive(Debug, Deserialize)]
struct PullRequestCommentEntry {
    id: i64,
    #[serde(default)]
    content: Content,
    #[serde(default)]
    user: Account,
}

// ============================================================================
// Provider
// ============================================================================

/// Bitbucket Cloud integration, authenticated with an app password.
#[derive(Debug, Clone)]
pub struct BitbucketCloudProvider {
    http: reqwest::Client,
}

impl Default for BitbucketCloudProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl BitbucketCloudProvider {
    pub fn new() -> Self {
        Self { http: http_client() }
    }

    /// The provider URL only overrides the API when it points at an API.
    fn api_url(event: &Event) -> String {
        let url = event.provider.url.trim_end_matches('/');
        if url.is_empty() || !url.ends_with("/2.0") {
            API_URL.to_string()
        } else {
            url.to_string()
        }
    }

    fn client(&self, event: &Event) -> ApiClient {
        let auth = match &event.provider.token {
            Some(token) if !token.is_empty() => Auth::Basic {
                user: event.provider.user.clone(),
                password: token.expose_secret().to_string(),
            },
            _ => Auth::None,
        };
        ApiClient::new(self.http.clone(), Self::api_url(event), auth)
    }

    fn repo_path(event: &Event) -> String {
        format!("/repositories/{}/{}", event.organization, event.repository)
    }

    /// Follows the `next` URLs of a paginated listing.
    async fn paged<T: DeserializeOwned>(
        client: &ApiClient,
        path: &str,
    ) -> Result<Vec<T>, ProviderError> {
        let mut values = Vec::new();
        let mut next = Some(path.to_string());
        let mut pages = 0;
        while let Some(url) = next {
            let page: Page<T> = client.get_json(&url).await?;
            values.extend(page.values);
            next = page.next;
            pages += 1;
            if pages >= MAX_PAGES {
                debug!(path = %path, "Stopping pagination at the page cap");
                break;
            }
        }
        Ok(values)
    }

    async fn is_workspace_member(
        &self,
        client: &ApiClient,
        event: &Event,
        account_id: &str,
    ) -> Result<bool, ProviderError> {
        let members: Vec<Member> =
            Self::paged(client, &format!("/workspaces/{}/members", event.organization)).await?;
        Ok(members.iter().any(|m| m.user.account_id == account_id))
    }

    async fn check_member(
        &self,
        client: &ApiClient,
        event: &Event,
        account_id: &str,
    ) -> Result<bool, ProviderError> {
        if account_id.is_empty() {
            return Ok(false);
        }
        if self.is_workspace_member(client, event, account_id).await? {
            return Ok(true);
        }
        acl::sender_in_owners(self, event, account_id).await
    }

    async fn comments(
        &self,
        client: &ApiClient,
        event: &Event,
        number: u64,
    ) -> Result<Vec<PullRequestCommentEntry>, ProviderError> {
        Self::paged(
            client,
            &format!("{}/pullrequests/{}/comments", Self::repo_path(event), number),
        )
        .await
    }
}

/// Build state and title shown next to the commit.
fn build_state(options: &StatusOptions) -> (&'static str, &'static str) {
    if options.status != RunStatus::Completed {
        return ("INPROGRESS", "CI has started");
    }
    match options.conclusion {
        CommitStatus::Skipped => ("STOPPED", "Skipping this commit"),
        CommitStatus::Neutral | CommitStatus::Cancelled => ("STOPPED", "CI has stopped"),
        CommitStatus::Failure => ("FAILED", "Failed"),
        CommitStatus::Pending => ("INPROGRESS", "CI has started"),
        CommitStatus::Success => ("SUCCESSFUL", "Commit has been validated"),
    }
}

#[async_trait]
impl Provider for BitbucketCloudProvider {
    fn name(&self) -> &'static str {
        "bitbucket-cloud"
    }

    fn detect(&self, request: &WebhookRequest) -> Result<Detection, ProviderError> {
        let Some(event) = request.header(EVENT_HEADER).filter(|e| is_own_event(e)) else {
            return Ok(Detection::default());
        };
        let payload = parse(&request.body)?;

        let detection = if PULL_REQUEST_OPENED.contains(&event)
            || PULL_REQUEST_CLOSED.contains(&event)
        {
            Detection::matched()
        } else if event == PULL_REQUEST_COMMENT {
            let body = payload.comment.map(|c| c.content.raw).unwrap_or_default();
            if opscomments::is_gitops_command(&body, opscomments::DEFAULT_PREFIX) {
                Detection::gitops_comment()
            } else {
                Detection::matched()
            }
        } else if event == PUSH {
            if payload.push.is_some_and(|p| !p.changes.is_empty()) {
                Detection::matched()
            } else {
                Detection::skipped("push event without changes")
            }
        } else {
            Detection::skipped(format!("bitbucket-cloud: event \"{}\" is not supported", event))
        };
        Ok(detection)
    }

    #[instrument(skip_all, fields(provider = "bitbucket-cloud"))]
    async fn parse_payload(&self, request: &WebhookRequest) -> Result<Event, ProviderError> {
        let kind = request.header(EVENT_HEADER).unwrap_or_default().to_string();
        let payload = parse(&request.body)?;
        let repository = payload
            .repository
            .full_name
            .split_once('/')
            .map(|(_, name)| name.to_string())
            .unwrap_or_default();

        let mut event = if kind.starts_with("pullrequest:") {
            let pr = payload
                .pullrequest
                .as_ref()
                .ok_or_else(|| ProviderError::InvalidPayload {
                    message: "pull request event without pullrequest".to_string(),
                })?;
            let mut event = Event::new(event_types::PULL_REQUEST, TriggerType::PullRequest);
            event.account_id = pr.author.account_id.clone();
            event.sender = pr.author.nickname.clone();
            if kind == PULL_REQUEST_COMMENT {
                let body = payload
                    .comment
                    .as_ref()
                    .map(|c| c.content.raw.clone())
                    .unwrap_or_default();
                opscomments::apply_comment_trigger(&mut event, &body, opscomments::DEFAULT_PREFIX);
                event.account_id = payload.actor.account_id.clone();
                event.sender = payload.actor.nickname.clone();
            } else if PULL_REQUEST_CLOSED.contains(&kind.as_str()) {
                event.trigger_target = TriggerType::PullRequestClosed;
            } else if !PULL_REQUEST_OPENED.contains(&kind.as_str()) {
                return Err(ProviderError::UnsupportedEvent { event_type: kind });
            }
            event.sha = pr.source.commit.hash.clone();
            event.base_branch = pr.destination.branch.name.clone();
            event.head_branch = pr.source.branch.name.clone();
            event.head_url = pr
                .source
                .repository
                .as_ref()
                .map(|r| r.links.html.href.clone())
                .unwrap_or_default();
            event.pull_request_number = Some(pr.id);
            event.pull_request_title = pr.title.clone();
            event
        } else if kind == PUSH {
            let change = payload
                .push
                .as_ref()
                .and_then(|p| p.changes.first())
                .ok_or_else(|| ProviderError::InvalidPayload {
                    message: "push event contains no changes".to_string(),
                })?;
            let new = change.new.as_ref().ok_or_else(|| ProviderError::InvalidPayload {
                message: "push event deletes a reference".to_string(),
            })?;
            let mut event = Event::new(event_types::PUSH, TriggerType::Push);
            event.sha = new.target.hash.clone();
            event.sha_url = new.target.links.html.href.clone();
            event.sha_title = new.target.message.lines().next().unwrap_or_default().to_string();
            event.base_branch = if new.kind == "tag" {
                format!("refs/tags/{}", new.name)
            } else {
                new.name.clone()
            };
            event.head_branch = change
                .old
                .as_ref()
                .map(|o| o.name.clone())
                .unwrap_or_else(|| new.name.clone());
            event.account_id = payload.actor.account_id.clone();
            event.sender = payload.actor.nickname.clone();
            event
        } else {
            return Err(ProviderError::UnsupportedEvent { event_type: kind });
        };

        event.organization = payload.repository.workspace.slug.clone();
        event.repository = repository;
        event.url = payload.repository.links.html.href.clone();
        event.clone_url = event.url.clone();
        if event.head_url.is_empty() {
            event.head_url = event.url.clone();
        }
        event.headers = request.headers.clone();
        event.payload = request.body.clone();
        Ok(event)
    }

    /// Bitbucket Cloud only signs deliveries of hooks that have a secret.
    fn validate(&self, event: &Event) -> Result<(), ProviderError> {
        let secret = event
            .provider
            .webhook_secret
            .as_ref()
            .map(|s| s.expose_secret())
            .unwrap_or_default();
        match event.headers.get(SIGNATURE_HEADER) {
            Some(signature) if !secret.is_empty() => {
                signature::verify_prefixed(signature, &event.payload, secret)
            }
            _ => Ok(()),
        }
    }

    #[instrument(skip_all, fields(provider = "bitbucket-cloud", repository = %_repo.name()))]
    async fn set_client(
        &self,
        event: &mut Event,
        _repo: &Repository,
        _settings: &Settings,
    ) -> Result<(), ProviderError> {
        if event.provider.user.is_empty() {
            return Err(ProviderError::Configuration {
                message: "no git_provider.user has been set in the repo crd".to_string(),
            });
        }
        if event.provider.token.as_ref().map_or(true, |t| t.is_empty()) {
            return Err(ProviderError::Configuration {
                message: "no git_provider.secret has been set in the repo crd".to_string(),
            });
        }
        info!(user = %event.provider.user, "bitbucket-cloud: initialized API client");
        Ok(())
    }

    async fn get_commit_info(&self, event: &mut Event) -> Result<(), ProviderError> {
        let client = self.client(event);
        let repo = Self::repo_path(event);
        let reference = if event.sha.is_empty() {
            event.head_branch.clone()
        } else {
            event.sha.clone()
        };
        let commit: CommitInfo = client
            .get_json(&format!("{}/commit/{}", repo, urlencoding::encode(&reference)))
            .await?;
        event.sha = commit.hash;
        event.sha_url = commit.links.html.href;
        event.sha_title = commit.message.lines().next().unwrap_or_default().to_string();
        event.sha_author_name = commit
            .author
            .user
            .map(|u| u.display_name)
            .unwrap_or(commit.author.raw);
        event.sha_author_date = commit.date;

        let info: RepositoryInfo = client.get_json(&repo).await?;
        event.default_branch = info.mainbranch.name;
        Ok(())
    }

    #[instrument(skip(self, event), fields(provider = "bitbucket-cloud", sha = %event.sha))]
    async fn get_tekton_dir(
        &self,
        event: &Event,
        path: &str,
    ) -> Result<Vec<TektonFile>, ProviderError> {
        let client = self.client(event);
        let listing = format!(
            "{}/src/{}/{}/?max_depth=10&pagelen=100",
            Self::repo_path(event),
            event.sha,
            path.trim_matches('/')
        );
        let entries: Vec<SourceEntry> = match Self::paged(&client, &listing).await {
            Ok(entries) => entries,
            Err(ProviderError::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        for entry in entries.iter().filter(|e| {
            e.kind == "commit_file" && (e.path.ends_with(".yaml") || e.path.ends_with(".yml"))
        }) {
            let content = self.get_file_inside_repo(event, &entry.path, "").await?;
            files.push(TektonFile {
                path: entry.path.clone(),
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
        self.client(event)
            .get_text(&format!(
                "{}/src/{}/{}",
                Self::repo_path(event),
                urlencoding::encode(reference),
                path.trim_start_matches('/')
            ))
            .await
    }

    async fn get_files(&self, event: &Event) -> Result<ChangedFiles, ProviderError> {
        let client = self.client(event);
        let repo = Self::repo_path(event);
        let path = match event.pull_request_number {
            Some(number) => format!("{}/pullrequests/{}/diffstat", repo, number),
            None => format!("{}/diffstat/{}", repo, event.sha),
        };
        let stats: Vec<DiffStat> = Self::paged(&client, &path).await?;

        let mut changed = ChangedFiles::default();
        for stat in stats {
            let name = stat
                .new
                .as_ref()
                .or(stat.old.as_ref())
                .map(|p| p.path.clone())
                .unwrap_or_default();
            match stat.status.as_str() {
                "added" => changed.added.push(name.clone()),
                "removed" => changed.deleted.push(name.clone()),
                "renamed" => changed.renamed.push(name.clone()),
                "modified" => changed.modified.push(name.clone()),
                _ => {}
            }
            changed.all.push(name);
        }
        Ok(changed)
    }

    #[instrument(skip_all, fields(provider = "bitbucket-cloud", sender = %event.sender))]
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
        let entries = self.comments(&client, event, number).await?;
        let comments: Vec<PullRequestComment> = entries
            .iter()
            .map(|c| PullRequestComment {
                author: c.user.account_id.clone(),
                body: c.content.raw.clone(),
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

    #[instrument(skip_all, fields(provider = "bitbucket-cloud", conclusion = %options.conclusion))]
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
                &format!(
                    "{}/commit/{}/statuses/build",
                    Self::repo_path(event),
                    event.sha
                ),
                &json!({
                    "key": options.application_name,
                    "url": details_url,
                    "state": state,
                    "description": title,
                }),
            )
            .await?;

        if state != "STOPPED"
            && options.status == RunStatus::Completed
            && !options.text.is_empty()
            && event.pull_request_number.is_some()
        {
            let body = format!(
                "**{}** - {}\n\n{}",
                options.application_name, title, options.text
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
        let comments_path = format!("{}/pullrequests/{}/comments", Self::repo_path(event), number);
        let content = json!({ "content": { "raw": body } });
        if let Some(key) = dedup_key {
            let existing = self.comments(&client, event, number).await?;
            if let Some(comment) = existing.iter().find(|c| c.content.raw.starts_with(key)) {
                return client
                    .send_json_unit(
                        Method::PUT,
                        &format!("{}/{}", comments_path, comment.id),
                        &content,
                    )
                    .await;
            }
        }
        client
            .send_json_unit(Method::POST, &comments_path, &content)
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
#[path = "bitbucket_cloud_tests.rs"]
mod tests;
