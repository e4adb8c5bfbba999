//! GitHub webhook payload shapes and their conversion into events.

use pac_core::event::{event_types, Event, TriggerType};
use pac_core::opscomments;
use pac_core::provider::{Detection, ProviderError, WebhookRequest};
use serde::Deserialize;

pub const EVENT_HEADER: &str = "x-github-event";
pub const DELIVERY_HEADER: &str = "x-github-delivery";
pub const ENTERPRISE_HOST_HEADER: &str = "x-github-enterprise-host";
pub const SIGNATURE_256_HEADER: &str = "x-hub-signature-256";
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

/// Gitea sends GitHub headers too and marks itself with this one.
pub const GITEA_EVENT_HEADER: &str = "x-gitea-event-type";

const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

const PULL_REQUEST_ACTIONS: &[&str] = &["opened", "synchronize", "synchronized", "reopened"];

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Account {
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Repo {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub clone_url: String,
    #[serde(default)]
    pub default_branch: String,
    #[serde(default)]
    pub owner: Account,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Branch {
    #[serde(default, rename = "ref")]
    pub ref_: String,
    #[serde(default)]
    pub sha: String,
    #[serde(default)]
    pub repo: Option<Repo>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Label {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PullRequest {
    #[serde(default)]
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub user: Account,
    #[serde(default)]
    pub head: Branch,
    #[serde(default)]
    pub base: Branch,
    #[serde(default)]
    pub labels: Vec<Label>,
}

#[derive(Debug, Default, Deserialize)]
struct Installation {
    #[serde(default)]
    id: i64,
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
struct IssueLinks {
    #[serde(default)]
    html_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct Issue {
    #[serde(default)]
    number: u64,
    #[serde(default)]
    state: String,
    #[serde(default)]
    pull_request: Option<IssueLinks>,
}

#[derive(Debug, Default, Deserialize)]
struct Comment {
    #[serde(default)]
    body: String,
}

#[derive(Debug, Default, Deserialize)]
struct PullRequestRef {
    #[serde(default)]
    number: u64,
}

#[derive(Debug, Default, Deserialize)]
struct CheckSuite {
    #[serde(default)]
    head_sha: String,
    #[serde(default)]
    head_branch: String,
    #[serde(default)]
    pull_requests: Vec<PullRequestRef>,
}

#[derive(Debug, Default, Deserialize)]
struct CheckRun {
    #[serde(default)]
    check_suite: CheckSuite,
}

/// Union of the fields PaC reads from any GitHub webhook.
#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    action: String,
    #[serde(default, rename = "ref")]
    ref_: String,
    #[serde(default)]
    before: String,
    #[serde(default)]
    after: String,
    #[serde(default)]
    head_commit: Option<HeadCommit>,
    #[serde(default)]
    pusher: Option<serde_json::Value>,
    #[serde(default)]
    repository: Repo,
    #[serde(default)]
    sender: Account,
    #[serde(default)]
    installation: Option<Installation>,
    #[serde(default)]
    pull_request: Option<PullRequest>,
    #[serde(default)]
    issue: Option<Issue>,
    #[serde(default)]
    comment: Option<Comment>,
    #[serde(default)]
    check_run: Option<CheckRun>,
    #[serde(default)]
    check_suite: Option<CheckSuite>,
}

fn parse(body: &[u8]) -> Result<Payload, ProviderError> {
    serde_json::from_slice(body).map_err(|e| ProviderError::InvalidPayload {
        message: format!("cannot parse GitHub payload: {}", e),
    })
}

/// Decides from the event header and payload whether GitHub owns the
/// request and whether it should be processed.
pub(crate) fn detect(request: &WebhookRequest) -> Result<Detection, ProviderError> {
    if request.header(GITEA_EVENT_HEADER).is_some() {
        return Ok(Detection::default());
    }
    let Some(event) = request.header(EVENT_HEADER) else {
        return Ok(Detection::default());
    };
    let payload = parse(&request.body)?;
    let prefix = opscomments::DEFAULT_PREFIX;

    let detection = match event {
        "pull_request" => match payload.action.as_str() {
            a if PULL_REQUEST_ACTIONS.contains(&a) => Detection::matched(),
            "closed" | "labeled" => Detection::matched(),
            other => Detection::skipped(format!("pull_request: unsupported action \"{}\"", other)),
        },
        "push" => {
            if payload.pusher.is_none() {
                Detection::skipped("push: no pusher in event")
            } else if payload.after == ZERO_SHA {
                Detection::skipped("push: branch or tag deletion")
            } else {
                Detection::matched()
            }
        }
        "issue_comment" => {
            let on_open_pr = payload.action == "created"
                && payload
                    .issue
                    .as_ref()
                    .is_some_and(|i| i.pull_request.is_some() && i.state == "open");
            if !on_open_pr {
                Detection::skipped("issue: not a gitops pull request comment")
            } else {
                let body = payload.comment.map(|c| c.body).unwrap_or_default();
                if opscomments::is_gitops_command(&body, prefix) {
                    Detection::gitops_comment()
                } else {
                    Detection::matched()
                }
            }
        }
        "check_run" => {
            if payload.action == "rerequested" && payload.check_run.is_some() {
                Detection::matched()
            } else {
                Detection::skipped(format!("check_run: unsupported action \"{}\"", payload.action))
            }
        }
        "check_suite" => {
            if payload.action == "rerequested" && payload.check_suite.is_some() {
                Detection::matched()
            } else {
                Detection::skipped(format!("check_suite: unsupported action \"{}\"", payload.action))
            }
        }
        other => Detection::skipped(format!("github: event \"{}\" is not supported", other)),
    };
    Ok(detection)
}

/// A parsed payload. Comment and re-request events only carry the pull
/// request number; the rest is fetched once a client is bound.
#[derive(Debug)]
pub(crate) struct Parsed {
    pub event: Event,
    pub repository_id: i64,
}

fn base_event(event_type: &str, trigger: TriggerType, payload: &Payload) -> Event {
    let mut event = Event::new(event_type, trigger);
    event.organization = payload.repository.owner.login.clone();
    event.repository = payload.repository.name.clone();
    event.url = payload.repository.html_url.clone();
    event.clone_url = payload.repository.clone_url.clone();
    event.default_branch = payload.repository.default_branch.clone();
    event.sender = payload.sender.login.clone();
    event.installation_id = payload.installation.as_ref().map(|i| i.id).filter(|id| *id > 0);
    event
}

fn apply_pull_request(event: &mut Event, pr: &PullRequest) {
    event.pull_request_number = Some(pr.number);
    event.pull_request_title = pr.title.clone();
    event.sha = pr.head.sha.clone();
    event.head_branch = pr.head.ref_.clone();
    event.base_branch = pr.base.ref_.clone();
    event.head_url = pr
        .head
        .repo
        .as_ref()
        .map(|r| r.html_url.clone())
        .unwrap_or_default();
    if let Some(base_repo) = &pr.base.repo {
        if !base_repo.html_url.is_empty() {
            event.url = base_repo.html_url.clone();
        }
        if !base_repo.default_branch.is_empty() {
            event.default_branch = base_repo.default_branch.clone();
        }
    }
    event.pull_request_labels = pr.labels.iter().map(|l| l.name.clone()).collect();
}

/// Pull request fields as returned by `GET /repos/{o}/{r}/pulls/{n}`.
pub(crate) fn complete_from_pull_request(event: &mut Event, pr: &PullRequest) {
    apply_pull_request(event, pr);
    event.sha_url = format!("{}/commit/{}", pr.html_url, pr.head.sha);
    if event.sender.is_empty() {
        event.sender = pr.user.login.clone();
    }
}

fn pull_request_number_from_url(url: &str) -> Result<u64, ProviderError> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|n| n.parse::<u64>().ok())
        .ok_or_else(|| ProviderError::InvalidPayload {
            message: format!("bad pull request number html_url number: {}", url),
        })
}

/// Builds the event of a detected payload.
pub(crate) fn parse_event(event_name: &str, body: &[u8]) -> Result<Parsed, ProviderError> {
    let payload = parse(body)?;
    let repository_id = payload.repository.id;

    let event = match event_name {
        "push" => {
            let mut event = base_event(event_types::PUSH, TriggerType::Push, &payload);
            let head = payload.head_commit.as_ref();
            event.sha = head.map(|c| c.id.clone()).unwrap_or_default();
            if event.sha.is_empty() {
                event.sha = payload.before.clone();
            }
            event.sha_url = head.map(|c| c.url.clone()).unwrap_or_default();
            event.sha_title = head
                .map(|c| c.message.split("\n\n").next().unwrap_or_default().to_string())
                .unwrap_or_default();
            event.base_branch = payload.ref_.clone();
            event.head_branch = payload.ref_.clone();
            event.head_url = event.url.clone();
            event
        }
        "pull_request" => {
            let trigger = match payload.action.as_str() {
                "closed" => TriggerType::PullRequestClosed,
                "labeled" => TriggerType::PullRequestLabeled,
                _ => TriggerType::PullRequest,
            };
            let Some(pr) = payload.pull_request.as_ref() else {
                return Err(ProviderError::InvalidPayload {
                    message: "pull_request event without pull_request".to_string(),
                });
            };
            let mut event = base_event(event_types::PULL_REQUEST, trigger, &payload);
            apply_pull_request(&mut event, pr);
            event.sender = pr.user.login.clone();
            event
        }
        "issue_comment" => {
            let mut event = base_event(event_types::PULL_REQUEST, TriggerType::PullRequest, &payload);
            let issue = payload.issue.as_ref().ok_or_else(|| ProviderError::InvalidPayload {
                message: "issue comment is not coming from a pull_request".to_string(),
            })?;
            let links = issue.pull_request.as_ref().ok_or_else(|| ProviderError::InvalidPayload {
                message: "issue comment is not coming from a pull_request".to_string(),
            })?;
            event.pull_request_number = if links.html_url.is_empty() {
                Some(issue.number)
            } else {
                Some(pull_request_number_from_url(&links.html_url)?)
            };
            let body = payload.comment.as_ref().map(|c| c.body.clone()).unwrap_or_default();
            opscomments::apply_comment_trigger(&mut event, &body, opscomments::DEFAULT_PREFIX);
            event
        }
        "check_run" | "check_suite" => {
            let suite = match (&payload.check_run, &payload.check_suite) {
                (Some(run), _) => &run.check_suite,
                (None, Some(suite)) => suite,
                (None, None) => {
                    return Err(ProviderError::InvalidPayload {
                        message: format!("{} event without check suite", event_name),
                    })
                }
            };
            let mut event = match suite.pull_requests.first() {
                Some(pr) => {
                    let mut event =
                        base_event(event_types::PULL_REQUEST, TriggerType::PullRequest, &payload);
                    event.pull_request_number = Some(pr.number);
                    event
                }
                None => {
                    let mut event = base_event(event_types::PUSH, TriggerType::Push, &payload);
                    event.base_branch = suite.head_branch.clone();
                    event
                }
            };
            event.sha = suite.head_sha.clone();
            event.head_branch = suite.head_branch.clone();
            event
        }
        other => {
            return Err(ProviderError::UnsupportedEvent {
                event_type: other.to_string(),
            })
        }
    };

    Ok(Parsed {
        event,
        repository_id,
    })
}

#[cfg(test)]
#[path = "payload_tests.rs"]
mod tests;
