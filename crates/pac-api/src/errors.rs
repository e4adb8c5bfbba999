//! Error types for the HTTP surface

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use pac_core::concurrency::SchedulerError;
use pac_core::incoming::IncomingError;
use pac_core::secrets::SecretError;
use pac_core::{OrchestratorError, ProviderError};
use tracing::{error, warn};

/// Seconds a sender should wait before retrying a transient failure.
pub const RETRY_AFTER_SECONDS: u64 = 60;

/// Request handling errors with HTTP status code mapping
///
/// - `400 Bad Request`: malformed payloads, scheduler validation failures
/// - `401 Unauthorized`: webhook signature or incoming secret mismatch
/// - `404 Not Found`: incoming webhook naming an unknown Repository
/// - `500 Internal Server Error`: everything unexpected; details stay in logs
/// - `503 Service Unavailable`: transient cluster or provider failures,
///   answered with a `Retry-After` header
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Provider could not parse or authenticate the webhook
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Event processing failed as a whole
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// Incoming webhook rejected
    #[error(transparent)]
    Incoming(#[from] IncomingError),

    /// Scheduler registration rejected
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Unexpected internal error
    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Status code answered for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Provider(e) => provider_status(e),
            Self::Orchestrator(e) => orchestrator_status(e),
            Self::Incoming(e) => StatusCode::from_u16(e.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Scheduler(e) if e.is_validation() => StatusCode::BAD_REQUEST,
            Self::Scheduler(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Scheduler(_) | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_transient(),
            Self::Orchestrator(e) => e.is_transient(),
            Self::Incoming(e) => e.is_transient(),
            Self::Scheduler(e) => e.is_transient(),
            Self::Internal { .. } => false,
        }
    }

    pub fn error_category(&self) -> pac_core::ErrorCategory {
        match self {
            Self::Provider(e) => e.error_category(),
            Self::Orchestrator(e) => e.error_category(),
            Self::Incoming(e) => e.error_category(),
            Self::Scheduler(e) => e.error_category(),
            Self::Internal { .. } => pac_core::ErrorCategory::Permanent,
        }
    }
}

fn provider_status(e: &ProviderError) -> StatusCode {
    match e {
        ProviderError::InvalidPayload { .. } | ProviderError::UnsupportedEvent { .. } => {
            StatusCode::BAD_REQUEST
        }
        ProviderError::InvalidSignature { .. } => StatusCode::UNAUTHORIZED,
        _ if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn orchestrator_status(e: &OrchestratorError) -> StatusCode {
    match e {
        OrchestratorError::Secret(SecretError::Validation(_)) => StatusCode::UNAUTHORIZED,
        OrchestratorError::Provider(inner) => provider_status(inner),
        _ if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = if status.is_server_error() && !self.is_transient() {
            // Log detailed error server-side but return generic message to client
            error!(error = %self, category = ?self.error_category(), "Request failed");
            "Internal server error occurred. Please try again later.".to_string()
        } else {
            warn!(error = %self, status = %status, "Request rejected");
            self.to_string()
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::SERVICE_UNAVAILABLE {
            if let Ok(header_value) = RETRY_AFTER_SECONDS.to_string().parse() {
                response.headers_mut().insert("Retry-After", header_value);
            }
        }

        response
    }
}

/// Server lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Invalid server configuration: {message}")]
    Configuration { message: String },

    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;
