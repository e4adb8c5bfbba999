//! Label and annotation keys placed on PipelineRuns and related objects.
//!
//! Every key lives under the `pipelinesascode.tekton.dev/` prefix except the
//! standard `app.kubernetes.io/managed-by` label. Keys used in label
//! selectors carry a sanitised value as a label and the raw value as an
//! annotation.

/// API group of the Repository custom resource.
pub const GROUP_NAME: &str = "pipelinesascode.tekton.dev";

/// API version of the Repository custom resource.
pub const REPOSITORY_API_VERSION: &str = "pipelinesascode.tekton.dev/v1alpha1";

/// Finalizer attached to Repository objects.
pub const FINALIZER: &str = "pipelinesascode.tekton.dev/finalizer";

/// Value of the `app.kubernetes.io/managed-by` label.
pub const MANAGED_BY_VALUE: &str = "pipelines-as-code";

pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";

// Matching annotations
pub const ON_EVENT: &str = "pipelinesascode.tekton.dev/on-event";
pub const ON_TARGET_BRANCH: &str = "pipelinesascode.tekton.dev/on-target-branch";
pub const ON_CEL_EXPRESSION: &str = "pipelinesascode.tekton.dev/on-cel-expression";
pub const ON_COMMENT: &str = "pipelinesascode.tekton.dev/on-comment";
pub const ON_LABEL: &str = "pipelinesascode.tekton.dev/on-label";
pub const ON_PATH_CHANGE: &str = "pipelinesascode.tekton.dev/on-path-change";
pub const ON_PATH_CHANGE_IGNORE: &str = "pipelinesascode.tekton.dev/on-path-change-ignore";

// Resolution annotations
pub const TASK: &str = "pipelinesascode.tekton.dev/task";
pub const PIPELINE: &str = "pipelinesascode.tekton.dev/pipeline";

// Lifecycle annotations
pub const MAX_KEEP_RUNS: &str = "pipelinesascode.tekton.dev/max-keep-runs";
pub const TARGET_NAMESPACE: &str = "pipelinesascode.tekton.dev/target-namespace";
pub const CANCEL_IN_PROGRESS: &str = "pipelinesascode.tekton.dev/cancel-in-progress";
pub const EXECUTION_ORDER: &str = "pipelinesascode.tekton.dev/execution-order";
pub const STATE: &str = "pipelinesascode.tekton.dev/state";
pub const LOG_URL: &str = "pipelinesascode.tekton.dev/log-url";
pub const GIT_AUTH_SECRET: &str = "pipelinesascode.tekton.dev/git-auth-secret";
pub const SCM_REPORTING_PLR_STARTED: &str =
    "pipelinesascode.tekton.dev/scm-reporting-plr-started";
pub const CONTROLLER_INFO: &str = "pipelinesascode.tekton.dev/controller-info";

// Event description
pub const URL_ORG: &str = "pipelinesascode.tekton.dev/url-org";
pub const URL_REPOSITORY: &str = "pipelinesascode.tekton.dev/url-repository";
pub const SHA: &str = "pipelinesascode.tekton.dev/sha";
pub const SHA_TITLE: &str = "pipelinesascode.tekton.dev/sha-title";
pub const SHA_URL: &str = "pipelinesascode.tekton.dev/sha-url";
pub const SENDER: &str = "pipelinesascode.tekton.dev/sender";
pub const EVENT_TYPE: &str = "pipelinesascode.tekton.dev/event-type";
pub const TRIGGER_TARGET: &str = "pipelinesascode.tekton.dev/trigger-target";
pub const BRANCH: &str = "pipelinesascode.tekton.dev/branch";
pub const SOURCE_BRANCH: &str = "pipelinesascode.tekton.dev/source-branch";
pub const REPOSITORY: &str = "pipelinesascode.tekton.dev/repository";
pub const GIT_PROVIDER: &str = "pipelinesascode.tekton.dev/git-provider";
pub const REPO_URL: &str = "pipelinesascode.tekton.dev/repo-url";
pub const SOURCE_REPO_URL: &str = "pipelinesascode.tekton.dev/source-repo-url";
pub const PULL_REQUEST: &str = "pipelinesascode.tekton.dev/pull-request";
pub const INSTALLATION_ID: &str = "pipelinesascode.tekton.dev/installation-id";
pub const GHE_URL: &str = "pipelinesascode.tekton.dev/ghe-url";
pub const SOURCE_PROJECT_ID: &str = "pipelinesascode.tekton.dev/source-project-id";
pub const TARGET_PROJECT_ID: &str = "pipelinesascode.tekton.dev/target-project-id";
pub const ORIGINAL_PRNAME: &str = "pipelinesascode.tekton.dev/original-prname";
pub const CHECK_RUN_ID: &str = "pipelinesascode.tekton.dev/check-run-id";

/// Tekton label linking a TaskRun to its PipelineRun.
pub const TEKTON_PIPELINE_RUN: &str = "tekton.dev/pipelineRun";

/// Tekton label naming the pipeline task a TaskRun executes.
pub const TEKTON_PIPELINE_TASK: &str = "tekton.dev/pipelineTask";

/// Values of the `state` annotation and label.
pub mod state {
    pub const STARTED: &str = "started";
    pub const QUEUED: &str = "queued";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}
