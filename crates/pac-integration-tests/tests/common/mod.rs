//! Common test utilities for the end-to-end tests
//!
//! This module provides:
//! - A harness wiring the HTTP surface to the in-memory Kubernetes store
//! - PipelineRun template and event builders
//! - Request helpers for the router
//! - A log writer capturing warnings emitted during a test

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use pac_api::{create_router, AppState, ServerConfig};
use pac_core::concurrency::{QueueManager, SyncManager};
use pac_core::event::{Event, TriggerType};
use pac_core::provider::scripted::SCRIPTED_EVENT_HEADER;
use pac_core::provider::Provider;
use pac_core::reconciler::Reconciler;
use pac_core::resources::Condition;
use pac_core::settings::ControllerInfo;
use pac_core::tekton::{PipelineRun, PipelineRunStatus};
use pac_core::{KubeClient, MemoryKubeClient, Orchestrator, Repository};
use pac_providers::ProviderRegistry;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;
use tracing_subscriber::fmt::MakeWriter;

pub const REPO_URL: &str = "https://github.com/org/app";

// ============================================================================
// Harness
// ============================================================================

/// The controller's HTTP surface over an in-memory cluster.
pub struct TestHarness {
    pub kube: Arc<MemoryKubeClient>,
    pub queues: Arc<QueueManager>,
    pub providers: Vec<Arc<dyn Provider>>,
    pub state: AppState,
}

impl TestHarness {
    /// Harness holding the `ci/app` Repository with the given concurrency
    /// limit.
    pub fn new(providers: Vec<Arc<dyn Provider>>, concurrency_limit: Option<i32>) -> Self {
        let kube = Arc::new(MemoryKubeClient::new());
        let mut repo = Repository::new("ci", "app", REPO_URL);
        repo.spec.concurrency_limit = concurrency_limit;
        kube.insert_repository(repo);
        Self::with_kube(kube, providers)
    }

    pub fn with_kube(kube: Arc<MemoryKubeClient>, providers: Vec<Arc<dyn Provider>>) -> Self {
        let registry = providers
            .iter()
            .fold(ProviderRegistry::new(), |r, p| r.register(Arc::clone(p)));
        let queues = Arc::new(QueueManager::new());
        let kube_dyn: Arc<dyn KubeClient> = kube.clone();
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&kube_dyn),
            ControllerInfo::default(),
        ));
        let scheduler = Arc::new(
            SyncManager::new(Arc::clone(&kube_dyn), Arc::clone(&queues))
                .with_poll_interval(Duration::from_millis(10)),
        );
        let state = AppState::new(
            ServerConfig::default(),
            Arc::new(registry),
            kube_dyn,
            orchestrator,
            scheduler,
        );
        state.mark_ready();

        Self {
            kube,
            queues,
            providers,
            state,
        }
    }

    /// Reconciler sharing the harness queues and providers.
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.kube.clone(),
            self.providers.clone(),
            ControllerInfo::default(),
            Arc::clone(&self.queues),
        )
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = create_router(self.state.clone())
            .oneshot(request)
            .await
            .expect("router call");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, body)
    }

    /// Stored run whose name starts with `prefix`.
    pub fn run_named(&self, prefix: &str) -> PipelineRun {
        self.kube
            .pipeline_runs()
            .into_iter()
            .find(|pr| pr.metadata.name.starts_with(prefix))
            .unwrap_or_else(|| panic!("no PipelineRun named {}*", prefix))
    }

    /// Marks the stored run `name` as succeeded.
    pub fn finish(&self, name: &str) {
        let mut pr = self.run_named(name);
        pr.status = Some(PipelineRunStatus {
            conditions: vec![Condition::succeeded("True", "Succeeded", "done")],
            ..Default::default()
        });
        self.kube.insert_pipeline_run(pr);
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Webhook claimed by the scripted provider.
pub fn scripted_webhook() -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/")
        .header(SCRIPTED_EVENT_HEADER, "event")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .expect("request")
}

pub fn register_request(namespace: &str, name: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/register/pipelinerun/{}/{}", namespace, name))
        .body(Body::empty())
        .expect("request")
}

// ============================================================================
// Fixtures
// ============================================================================

/// A PipelineRun template with the given event and target branch
/// annotations plus any extra annotation lines.
pub fn template(name: &str, on_event: &str, extra_annotations: &str) -> String {
    format!(
        r#"
apiVersion: tekton.dev/v1
kind: PipelineRun
metadata:
  name: {name}
  annotations:
    pipelinesascode.tekton.dev/on-event: "[{on_event}]"
    pipelinesascode.tekton.dev/on-target-branch: "[main]"
{extra_annotations}
spec:
  params:
    - name: revision
      value: "{{{{ revision }}}}"
  pipelineSpec:
    tasks:
      - name: noop
        taskSpec:
          steps:
            - name: echo
              image: alpine
              script: echo {{{{ repo_name }}}}
"#
    )
}

pub fn pull_request_event() -> Event {
    let mut event = Event::new("pull_request", TriggerType::PullRequest);
    event.sha = "abc123".to_string();
    event.base_branch = "main".to_string();
    event.head_branch = "feature".to_string();
    event.url = REPO_URL.to_string();
    event.organization = "org".to_string();
    event.repository = "app".to_string();
    event.sender = "octocat".to_string();
    event.pull_request_number = Some(7);
    event
}

pub fn push_event(sha: &str) -> Event {
    let mut event = Event::new("push", TriggerType::Push);
    event.sha = sha.to_string();
    event.base_branch = "main".to_string();
    event.head_branch = "main".to_string();
    event.url = REPO_URL.to_string();
    event.organization = "org".to_string();
    event.repository = "app".to_string();
    event.sender = "octocat".to_string();
    event
}

// ============================================================================
// Log capture
// ============================================================================

/// In-memory log sink shared with a `tracing` subscriber.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    /// Installs a WARN-level subscriber for the current thread until the
    /// returned guard is dropped.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
