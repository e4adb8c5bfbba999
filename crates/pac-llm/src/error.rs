//! # LLM Errors
//!
//! Failures of an analysis: configuration problems caught before any call,
//! transport and API failures of the LLM backend, and cancellation.

use pac_core::cel::CelError;
use pac_core::{ErrorCategory, KubeError};

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("invalid AI analysis configuration: {message}")]
    Configuration { message: String },

    #[error("unsupported LLM provider '{0}'")]
    UnsupportedProvider(String),

    #[error("cannot read token secret {namespace}/{name}: {source}")]
    Secret {
        namespace: String,
        name: String,
        #[source]
        source: KubeError,
    },

    #[error("secret {namespace}/{name} key {key} is empty")]
    EmptySecret {
        namespace: String,
        name: String,
        key: String,
    },

    #[error("{provider} request failed: {message}")]
    Transport {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} rate limit exceeded: {message}")]
    RateLimited {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} rejected the API key: {message}")]
    Authentication {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} API error (status {status}): {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("{provider} returned an unreadable response: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} returned no content")]
    EmptyResponse { provider: &'static str },

    #[error("role filter failed: {0}")]
    Filter(#[from] CelError),

    #[error("analysis cancelled")]
    Cancelled,
}

impl LlmError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Maps a non-success HTTP status of an LLM API.
    pub(crate) fn from_status(provider: &'static str, status: u16, message: String) -> Self {
        match status {
            429 => Self::RateLimited { provider, message },
            401 | 403 => Self::Authentication { provider, message },
            _ => Self::Api {
                provider,
                status,
                message,
            },
        }
    }

    /// Transport failures, throttling and server errors may go away on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Secret { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. }
            | Self::UnsupportedProvider(_)
            | Self::EmptySecret { .. } => ErrorCategory::Configuration,
            Self::Secret { source, .. } if source.is_not_found() => ErrorCategory::Configuration,
            Self::Authentication { .. } => ErrorCategory::Security,
            Self::Filter(_) => ErrorCategory::Permanent,
            _ if self.is_transient() => ErrorCategory::Transient,
            _ => ErrorCategory::Permanent,
        }
    }
}
