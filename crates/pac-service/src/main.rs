//! # Pipelines-as-Code Service
//!
//! Binary entry point of the controller.
//!
//! This executable:
//! - Loads configuration from files and the environment
//! - Installs the tracing subscriber
//! - Wires the Kubernetes client, providers, orchestrator, scheduler and
//!   reconciler
//! - Serves the webhook API until SIGTERM or Ctrl+C

mod config;
mod reconcile_loop;
mod telemetry;

use anyhow::Context;
use crate::config::ServiceConfig;
use pac_api::{shutdown_signal, start_server, AppState};
use pac_core::concurrency::{QueueManager, SyncManager};
use pac_core::kube::{HttpKubeClient, KubeHttpConfig};
use pac_core::reconciler::Reconciler;
use pac_core::{KubeClient, MemoryKubeClient, Orchestrator};
use pac_llm::LlmAnalyzer;
use pac_providers::{AppTokenSource, ProviderRegistry};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

/// Exit code for unusable configuration.
const EXIT_CONFIG: i32 = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -------------------------------------------------------------------------
    // Load configuration
    //
    // Logging is not installed yet, so failures go to stderr.
    // -------------------------------------------------------------------------
    let config = match ServiceConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration; aborting: {}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Service configuration is invalid; aborting: {}", e);
        std::process::exit(EXIT_CONFIG);
    }

    if let Err(e) = telemetry::init(&config.logging) {
        eprintln!("{}", e);
        std::process::exit(EXIT_CONFIG);
    }

    let span = info_span!("controller", logger = %config.logging.name);
    run(config).instrument(span).await
}

async fn run(config: ServiceConfig) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        controller = %config.controller.name,
        "Starting Pipelines-as-Code controller"
    );

    // 1. Kubernetes client
    let kube: Arc<dyn KubeClient> = if config.kube.in_memory {
        warn!("Using the in-memory Kubernetes store; nothing is persisted");
        Arc::new(MemoryKubeClient::new())
    } else {
        let http_config = KubeHttpConfig::in_cluster(&config.kube.api_url, &config.kube.token_file)
            .context("cannot configure the Kubernetes client")?;
        Arc::new(HttpKubeClient::new(http_config).context("cannot build the Kubernetes client")?)
    };

    // 2. Controller identity and providers
    let controller = config.controller_info();
    let app = AppTokenSource::new(Arc::clone(&kube), controller.controller_secret());
    let registry = Arc::new(ProviderRegistry::with_defaults(Some(app)));
    info!(providers = ?registry.names(), "Provider integrations registered");

    // 3. Queues rebuilt from the PipelineRuns already in the cluster
    let queues = Arc::new(QueueManager::new());
    if let Err(e) = queues.init_queues(kube.as_ref()).await {
        warn!(error = %e, "Cannot rebuild concurrency queues; starting empty");
    }

    let shutdown = CancellationToken::new();

    // 4. Reconciler with the LLM analysis hook
    let analyzer = LlmAnalyzer::new(Arc::clone(&kube)).with_cancellation(shutdown.child_token());
    let reconciler = Arc::new(
        Reconciler::new(
            Arc::clone(&kube),
            registry.providers(),
            controller.clone(),
            Arc::clone(&queues),
        )
        .with_hook(Arc::new(analyzer)),
    );
    let reconcile_task = tokio::spawn(reconcile_loop::run(
        reconciler,
        config.reconciler.interval(),
        shutdown.clone(),
    ));

    // 5. Webhook API
    let scheduler = Arc::new(
        SyncManager::new(Arc::clone(&kube), Arc::clone(&queues))
            .with_poll_interval(config.reconciler.scheduler_poll())
            .with_cancellation(shutdown.child_token()),
    );
    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&kube), controller));
    let state = AppState::new(config.server.clone(), registry, kube, orchestrator, scheduler);
    state.mark_ready();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    // 6. Serve until shutdown, then stop the background work
    let served = start_server(state, shutdown.clone().cancelled_owned()).await;
    shutdown.cancel();

    match reconcile_task.await {
        Ok(passes) => info!(passes, "Reconciler stopped"),
        Err(e) => error!(error = %e, "Reconciler task failed"),
    }

    served.context("webhook server failed")?;
    info!("Pipelines-as-Code controller stopped");
    Ok(())
}
