//! Tests for the LLM analyzer.

use super::*;
use pac_core::event::{Event, TriggerType};
use pac_core::kube::MemoryKubeClient;
use pac_core::provider::ScriptedProvider;
use pac_core::repository::{ContextItems, Repository, RepositorySettings, SecretRef};
use pac_core::resources::{Condition, ObjectMeta, Secret};
use pac_core::settings::Settings;
use pac_core::tekton::{PipelineRun, PipelineRunStatus};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ANSWER: &str = "The unit step failed because test b asserts on a stale fixture.";

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        delay: Duration::from_millis(10),
    }
}

fn kube() -> Arc<MemoryKubeClient> {
    let kube = MemoryKubeClient::new();
    let mut data = std::collections::BTreeMap::new();
    data.insert("token".to_string(), "sk-test".to_string());
    kube.insert_secret(Secret::new(ObjectMeta::named("ci", "llm-token"), data));
    Arc::new(kube)
}

fn role(name: &str, on_cel: &str) -> AnalysisRole {
    AnalysisRole {
        name: name.to_string(),
        prompt: "Explain why the pipeline failed".to_string(),
        on_cel: on_cel.to_string(),
        output: OUTPUT_PR_COMMENT.to_string(),
        context_items: Some(ContextItems {
            error_content: true,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn config(server: &MockServer, roles: Vec<AnalysisRole>) -> AiAnalysisConfig {
    AiAnalysisConfig {
        enabled: true,
        provider: "openai".to_string(),
        api_url: format!("{}/v1", server.uri()),
        secret_ref: SecretRef {
            name: "llm-token".to_string(),
            key: String::new(),
        },
        roles,
        ..Default::default()
    }
}

fn repository(ai: Option<AiAnalysisConfig>) -> Repository {
    let mut repo = Repository::new("ci", "app", "https://github.com/org/app");
    repo.spec.settings = Some(RepositorySettings {
        ai_analysis: ai,
        ..Default::default()
    });
    repo
}

fn event(pull_request: Option<u64>) -> Event {
    let trigger = if pull_request.is_some() {
        TriggerType::PullRequest
    } else {
        TriggerType::Push
    };
    let mut event = Event::new("pull_request", trigger);
    event.sha = "abc123".to_string();
    event.organization = "org".to_string();
    event.repository = "app".to_string();
    event.pull_request_number = pull_request;
    event
}

fn failed_run() -> PipelineRun {
    PipelineRun {
        metadata: ObjectMeta::named("ci", "build-x1y2z"),
        status: Some(PipelineRunStatus {
            conditions: vec![Condition::succeeded("False", "Failed", "Tasks failed")],
            ..Default::default()
        }),
        ..Default::default()
    }
}

async fn mount_answer(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": ANSWER}}],
            "usage": {"total_tokens": 120}
        })))
        .mount(server)
        .await;
}

struct Fixture {
    event: Event,
    repository: Repository,
    pipeline_run: PipelineRun,
    settings: Settings,
    provider: ScriptedProvider,
}

impl Fixture {
    fn new(repository: Repository, event: Event) -> Self {
        Self {
            event,
            repository,
            pipeline_run: failed_run(),
            settings: Settings::default(),
            provider: ScriptedProvider::new(),
        }
    }

    fn run(&self) -> CompletedRun<'_> {
        CompletedRun {
            event: &self.event,
            repository: &self.repository,
            pipeline_run: &self.pipeline_run,
            task_runs: &[],
            settings: &self.settings,
            provider: &self.provider,
        }
    }
}

#[tokio::test]
async fn test_unconfigured_repository_is_skipped() {
    let analyzer = LlmAnalyzer::new(kube());
    let fixture = Fixture::new(repository(None), event(Some(1)));

    let results = analyzer.analyze(&fixture.run()).await.unwrap();

    assert!(results.is_empty());
}

#[tokio::test]
async fn test_disabled_analysis_is_skipped() {
    let server = MockServer::start().await;
    let mut ai = config(&server, vec![role("failure", "")]);
    ai.enabled = false;
    let analyzer = LlmAnalyzer::new(kube());
    let fixture = Fixture::new(repository(Some(ai)), event(Some(1)));

    let results = analyzer.analyze(&fixture.run()).await.unwrap();

    assert!(results.is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[test]
fn test_config_validation() {
    let base = AiAnalysisConfig {
        enabled: true,
        provider: "gemini".to_string(),
        secret_ref: SecretRef {
            name: "llm".to_string(),
            key: String::new(),
        },
        roles: vec![role("failure", "")],
        ..Default::default()
    };
    assert_eq!(validate_config(&base).unwrap(), LlmProvider::Gemini);

    let mut no_roles = base.clone();
    no_roles.roles.clear();
    assert!(matches!(validate_config(&no_roles), Err(LlmError::Configuration { .. })));

    let mut bad_output = base.clone();
    bad_output.roles[0].output = "check-run".to_string();
    assert!(matches!(validate_config(&bad_output), Err(LlmError::Configuration { .. })));

    let mut no_secret = base.clone();
    no_secret.secret_ref.name.clear();
    assert!(validate_config(&no_secret).is_err());

    let mut unknown = base;
    unknown.provider = "mistral".to_string();
    assert!(matches!(validate_config(&unknown), Err(LlmError::UnsupportedProvider(_))));
}

#[tokio::test]
async fn test_missing_token_secret_fails_analysis() {
    let server = MockServer::start().await;
    let analyzer = LlmAnalyzer::new(Arc::new(MemoryKubeClient::new()));
    let fixture = Fixture::new(
        repository(Some(config(&server, vec![role("failure", "")]))),
        event(Some(1)),
    );

    let err = analyzer.analyze(&fixture.run()).await.unwrap_err();

    assert!(matches!(err, LlmError::Secret { ref name, .. } if name == "llm-token"));
    assert_eq!(err.error_category(), pac_core::ErrorCategory::Configuration);
}

/// Verify that only roles whose filter matches query the backend.
#[tokio::test]
async fn test_roles_are_filtered_by_cel() {
    let server = MockServer::start().await;
    mount_answer(&server).await;
    let roles = vec![
        role(
            "failure",
            "body.pipelineRun.status.conditions[0].reason == 'Failed'",
        ),
        role("push-only", "body.event.trigger_target == 'push'"),
    ];
    let analyzer = LlmAnalyzer::new(kube()).with_retry(fast_retry());
    let fixture = Fixture::new(repository(Some(config(&server, roles))), event(Some(1)));

    let results = analyzer.analyze(&fixture.run()).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].role, "failure");
    assert_eq!(results[0].outcome.as_ref().unwrap().content, ANSWER);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_broken_filter_is_reported_per_role() {
    let server = MockServer::start().await;
    mount_answer(&server).await;
    let roles = vec![role("broken", "body.pipelineRun.status ==")];
    let analyzer = LlmAnalyzer::new(kube());
    let fixture = Fixture::new(repository(Some(config(&server, roles))), event(Some(1)));

    let results = analyzer.analyze(&fixture.run()).await.unwrap();

    assert_eq!(results.len(), 1);
    assert!(matches!(results[0].outcome, Err(LlmError::Filter(_))));
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_answer(&server).await;
    let analyzer = LlmAnalyzer::new(kube()).with_retry(fast_retry());
    let fixture = Fixture::new(
        repository(Some(config(&server, vec![role("failure", "")]))),
        event(Some(1)),
    );

    let results = analyzer.analyze(&fixture.run()).await.unwrap();

    assert!(results[0].is_success());
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_retries_stop_after_three_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;
    let analyzer = LlmAnalyzer::new(kube()).with_retry(fast_retry());
    let fixture = Fixture::new(
        repository(Some(config(&server, vec![role("failure", "")]))),
        event(Some(1)),
    );

    let results = analyzer.analyze(&fixture.run()).await.unwrap();

    assert!(matches!(results[0].outcome, Err(LlmError::Api { status: 502, .. })));
}

#[tokio::test]
async fn test_permanent_failures_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    let analyzer = LlmAnalyzer::new(kube()).with_retry(fast_retry());
    let fixture = Fixture::new(
        repository(Some(config(&server, vec![role("failure", "")]))),
        event(Some(1)),
    );

    let results = analyzer.analyze(&fixture.run()).await.unwrap();

    assert!(matches!(results[0].outcome, Err(LlmError::Authentication { .. })));
}

#[tokio::test]
async fn test_cancelled_analysis_makes_no_calls() {
    let server = MockServer::start().await;
    mount_answer(&server).await;
    let token = CancellationToken::new();
    token.cancel();
    let analyzer = LlmAnalyzer::new(kube()).with_cancellation(token);
    let fixture = Fixture::new(
        repository(Some(config(&server, vec![role("failure", "")]))),
        event(Some(1)),
    );

    let results = analyzer.analyze(&fixture.run()).await.unwrap();

    assert!(matches!(results[0].outcome, Err(LlmError::Cancelled)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

/// Verify that the hook posts one comment per role and replaces it on the
/// next analysis.
#[tokio::test]
async fn test_hook_posts_and_replaces_pull_request_comment() {
    let server = MockServer::start().await;
    mount_answer(&server).await;
    let analyzer = LlmAnalyzer::new(kube()).with_retry(fast_retry());
    let fixture = Fixture::new(
        repository(Some(config(&server, vec![role("failure", "")]))),
        event(Some(42)),
    );

    analyzer.on_completed(&fixture.run()).await;
    analyzer.on_completed(&fixture.run()).await;

    let comments = fixture.provider.comments();
    assert_eq!(comments.len(), 1);
    assert!(comments[0].body.starts_with(&comment_marker("failure")));
    assert!(comments[0].body.contains(ANSWER));
    assert!(comments[0].body.contains("`build-x1y2z`"));
    assert_eq!(comments[0].dedup_key.as_deref(), Some(comment_marker("failure").as_str()));
}

#[tokio::test]
async fn test_hook_does_not_comment_on_push_events() {
    let server = MockServer::start().await;
    mount_answer(&server).await;
    let analyzer = LlmAnalyzer::new(kube()).with_retry(fast_retry());
    let fixture = Fixture::new(
        repository(Some(config(&server, vec![role("failure", "")]))),
        event(None),
    );

    analyzer.on_completed(&fixture.run()).await;

    assert!(fixture.provider.comments().is_empty());
}
