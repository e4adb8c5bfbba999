//! # Pipelines-as-Code HTTP Surface
//!
//! HTTP server receiving VCS webhooks and turning them into PipelineRuns.
//!
//! Endpoints:
//! - `POST /`: provider webhooks, routed to the provider that recognises them
//! - `POST /incoming`: incoming webhook triggers declared on a Repository
//! - `POST /register/pipelinerun/{namespace}/{name}`: scheduler registration
//!   of a pending PipelineRun
//! - `GET /health`, `GET /ready`: liveness and readiness probes

pub mod config;
pub mod errors;
pub mod responses;

pub use config::ServerConfig;
pub use errors::{ApiError, ServiceError};
pub use responses::{HealthResponse, ReadinessResponse, RegisterResponse, WebhookResponse};

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use pac_core::concurrency::SyncManager;
use pac_core::incoming;
use pac_core::provider::WebhookRequest;
use pac_core::{KubeClient, Orchestrator};
use pac_providers::ProviderRegistry;
use std::collections::BTreeMap;
use std::future::{Future, IntoFuture};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, instrument, warn};

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Server settings
    pub config: ServerConfig,

    /// Provider integrations, tried in order
    pub registry: Arc<ProviderRegistry>,

    pub kube: Arc<dyn KubeClient>,

    /// Event pipeline
    pub orchestrator: Arc<Orchestrator>,

    /// Scheduler behind the registration endpoint
    pub scheduler: Arc<SyncManager>,

    /// Set once startup work (queue recovery) is done
    pub ready: Arc<AtomicBool>,
}

impl AppState {
    /// Create new application state; not ready until [`AppState::mark_ready`].
    pub fn new(
        config: ServerConfig,
        registry: Arc<ProviderRegistry>,
        kube: Arc<dyn KubeClient>,
        orchestrator: Arc<Orchestrator>,
        scheduler: Arc<SyncManager>,
    ) -> Self {
        Self {
            config,
            registry,
            kube,
            orchestrator,
            scheduler,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let webhook_routes = Router::new()
        .route("/", post(handle_webhook))
        .route("/incoming", post(handle_incoming));

    let scheduler_routes = Router::new().route(
        "/register/pipelinerun/{namespace}/{name}",
        post(handle_register),
    );

    let health_routes = Router::new()
        .route("/health", get(handle_health_check))
        .route("/ready", get(handle_readiness_check));

    let max_body_bytes = state.config.max_body_bytes;

    Router::new()
        .merge(webhook_routes)
        .merge(scheduler_routes)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(request_logging_middleware))
                .into_inner(),
        )
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Start HTTP server and serve until `shutdown` resolves.
///
/// In-flight requests get `shutdown_timeout_seconds` to complete once the
/// shutdown future fires.
pub async fn start_server<F>(state: AppState, shutdown: F) -> Result<(), ServiceError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let config = state.config.clone();
    config
        .validate()
        .map_err(|message| ServiceError::Configuration { message })?;
    let addr = config
        .socket_addr()
        .map_err(|message| ServiceError::Configuration { message })?;

    let app = create_router(state);
    let listener =
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServiceError::BindFailed {
                address: addr.to_string(),
                message: e.to_string(),
            })?;

    info!("Starting HTTP server on {}", addr);

    let shutdown_timeout = config.shutdown_timeout();
    let (stopping_tx, stopping_rx) = tokio::sync::oneshot::channel::<()>();
    let graceful = async move {
        shutdown.await;
        info!(
            timeout_seconds = shutdown_timeout.as_secs(),
            "Shutdown requested, draining in-flight requests"
        );
        let _ = stopping_tx.send(());
    };

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(graceful)
        .into_future();
    let drain_deadline = async move {
        if stopping_rx.await.is_ok() {
            tokio::time::sleep(shutdown_timeout).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = server => {
            result.map_err(|e| ServiceError::ServerFailed {
                message: e.to_string(),
            })?;
        }
        _ = drain_deadline => {
            warn!("Graceful shutdown timed out, dropping remaining connections");
        }
    }

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

// ============================================================================
// Webhook Handlers
// ============================================================================

/// Builds the provider-neutral request: lowercase header names, query
/// parameters and the body untouched for signature checks.
pub fn webhook_request(
    headers: &HeaderMap,
    query: BTreeMap<String, String>,
    body: Bytes,
) -> WebhookRequest {
    let header_map: BTreeMap<String, String> = headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_lowercase(),
                v.to_str().unwrap_or("").to_string(),
            )
        })
        .collect();
    WebhookRequest::new(header_map, body).with_query(query)
}

/// Handle provider webhooks
///
/// 1. Route the request to the provider that recognises it
/// 2. Parse the payload into an event
/// 3. Run the event through the orchestrator and report what it created
///
/// Requests no provider owns are answered 200 so senders do not retry them.
#[instrument(skip_all)]
pub async fn handle_webhook(
    State(state): State<AppState>,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let request = webhook_request(&headers, query, body);

    // 1. Provider detection
    let Some(routed) = state.registry.detect(&request)? else {
        info!("No provider recognised the webhook");
        return Ok(Json(WebhookResponse::skipped(
            "no git provider recognised this request",
        )));
    };
    let provider = routed.provider;
    if !routed.detection.matched {
        let reason = routed
            .detection
            .skip_reason
            .unwrap_or_else(|| "event is not supported".to_string());
        info!(provider = provider.name(), reason = %reason, "Skipping webhook");
        return Ok(Json(WebhookResponse::skipped(reason)));
    }

    // 2. Parsing
    let event = provider.parse_payload(&request).await?;
    let event_id = event.event_id.to_string();
    info!(
        event_id = %event_id,
        provider = provider.name(),
        event_type = %event.event_type,
        repository = %event.url,
        "Received webhook"
    );

    // 3. Orchestration
    let outcome = state.orchestrator.run(provider.as_ref(), event).await?;
    if !outcome.failures.is_empty() {
        warn!(
            event_id = %event_id,
            failures = outcome.failures.len(),
            "Some PipelineRuns could not be fully submitted"
        );
    }

    Ok(Json(WebhookResponse::from_outcome(
        event_id,
        provider.name(),
        &outcome,
    )))
}

/// Handle incoming webhook triggers
#[instrument(skip_all)]
pub async fn handle_incoming(
    State(state): State<AppState>,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let request = webhook_request(&headers, query, body);
    let trigger = incoming::resolve(state.kube.as_ref(), &request).await?;

    let provider = state.registry.get(trigger.provider).ok_or_else(|| {
        ApiError::internal(format!(
            "provider {} is not registered on this controller",
            trigger.provider
        ))
    })?;

    let event_id = trigger.event.event_id.to_string();
    info!(
        event_id = %event_id,
        repository = %trigger.repository.metadata.key(),
        pipelinerun = %trigger.event.target_pipeline_run,
        "Received incoming webhook"
    );

    let outcome = state.orchestrator.run(provider.as_ref(), trigger.event).await?;
    Ok(Json(WebhookResponse::from_outcome(
        event_id,
        provider.name(),
        &outcome,
    )))
}

// ============================================================================
// Scheduler Handler
// ============================================================================

/// Register a pending PipelineRun with the scheduler
#[instrument(skip(state))]
pub async fn handle_register(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let started = state.scheduler.register(&namespace, &name).await?;
    info!(
        pipelinerun = %format!("{}/{}", namespace, name),
        started = started.len(),
        "Registered PipelineRun"
    );
    Ok(Json(RegisterResponse {
        message: "request registered successfully!".to_string(),
        started,
    }))
}

// ============================================================================
// Health Check Handlers
// ============================================================================

/// Liveness probe
async fn handle_health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        providers: state
            .registry
            .names()
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}

/// Readiness probe; 503 until startup completes
async fn handle_readiness_check(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let response = ReadinessResponse {
        ready: state.is_ready(),
        timestamp: chrono::Utc::now(),
    };

    if response.ready {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Request logging middleware with correlation ID tracking
///
/// Reuses the caller's `x-correlation-id` or generates one, records it on
/// the span and echoes it in the response headers.
#[instrument(skip(request, next), fields(
    method = %request.method(),
    uri = %request.uri().path(),
    correlation_id
))]
async fn request_logging_middleware(
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = request.method().clone();
    // Path only: incoming webhooks may carry secrets in the query string.
    let path = request.uri().path().to_string();
    let start = std::time::Instant::now();

    let correlation_id = request
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::Span::current().record("correlation_id", correlation_id.as_str());
    request.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    if let Ok(header_value) = correlation_id.parse() {
        response
            .headers_mut()
            .insert("x-correlation-id", header_value);
    }

    let status = response.status();
    if status.is_server_error() {
        error!(
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        info!(
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed"
        );
    }

    response
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
