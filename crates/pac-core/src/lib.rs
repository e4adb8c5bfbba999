//! # Pipelines-as-Code Core
//!
//! Event-to-PipelineRun orchestration for the Pipelines-as-Code controller.
//!
//! This crate turns a parsed VCS webhook into zero or more Tekton
//! PipelineRuns: it binds credentials, matches `.tekton/` templates against
//! the event, resolves remote tasks, computes parameters, admits runs under
//! the Repository's concurrency policy and reports status back to the VCS.
//!
//! ## Architecture
//!
//! - Business logic depends only on trait abstractions ([`provider::Provider`],
//!   [`kube::KubeClient`])
//! - Concrete VCS clients live in `pac-providers`; the HTTP surface in `pac-api`
//! - In-memory adapters back the tests and local runs
//!
//! ## Usage
//!
//! ```rust
//! use pac_core::{EventId, SecretValue};
//!
//! let event_id = EventId::new();
//! let token = SecretValue::from_string("ghp_example".to_string());
//! assert_eq!(format!("{:?}", token), "SecretValue(<REDACTED>)");
//! assert!(!event_id.as_str().is_empty());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

pub use ulid::Ulid;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Correlation identifier of one webhook delivery.
///
/// Uses ULID so identifiers sort by arrival time in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Ulid);

impl EventId {
    /// Generate a new unique event ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get string representation of event ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

// ============================================================================
// Secret Values
// ============================================================================

/// Container for credential material.
///
/// The buffer is zeroed on drop and never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue {
    inner: Zeroizing<String>,
}

impl SecretValue {
    /// Create secret value from string
    pub fn from_string(value: String) -> Self {
        Self {
            inner: Zeroizing::new(value),
        }
    }

    /// Get secret as string (only for immediate use)
    pub fn expose_secret(&self) -> &str {
        &self.inner
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// True when the value carries trailing whitespace, usually the result
    /// of base64-encoding a secret without `echo -n`.
    pub fn has_trailing_whitespace(&self) -> bool {
        self.inner.ends_with('\n') || self.inner.ends_with(' ')
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretValue(<REDACTED>)")
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// High-level error categorization for retry and alerting decisions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Temporary failures that may succeed on a later event
    Transient,
    /// Permanent failures caused by user input
    Permanent,
    /// Authentication or signature failures
    Security,
    /// Controller configuration errors
    Configuration,
}

/// Error type for string parsing failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

// ============================================================================
// Module declarations
// ============================================================================

/// Annotation and label keys
pub mod keys;

/// Provider-neutral event model
pub mod event;

/// Kubernetes object shapes
pub mod resources;

/// Tekton object model
pub mod tekton;

/// Repository custom resource
pub mod repository;

/// Label sanitising and text helpers
pub mod formatting;

/// Controller settings read from the ConfigMap
pub mod settings;

/// Kubernetes client abstraction and adapters
pub mod kube;

/// `{{ var }}` substitution on raw template text
pub mod templates;

/// Glob patterns for branches and paths
pub mod glob;

/// CEL expression evaluation
pub mod cel;

/// GitOps comment grammar
pub mod opscomments;

/// Standard and user-declared PipelineRun parameters
pub mod customparams;

/// VCS provider capability contract
pub mod provider;

/// Incoming webhook triggers
pub mod incoming;

/// Template matching
pub mod matcher;

/// Remote task and pipeline resolution
pub mod resolve;

/// Admission, cancel-in-progress and queueing
pub mod concurrency;

/// Credential binding for providers and git auth secrets
pub mod secrets;

/// External status and Repository run history
pub mod status;

/// Post-run reconciliation and cleanup
pub mod reconciler;

/// Top-level event sequencer
pub mod orchestrator;

pub use event::{ChangedFiles, Event, EventState, ProviderCredentials, TriggerType};
pub use kube::{KubeClient, KubeError, LabelSelector, MemoryKubeClient};
pub use orchestrator::{Orchestrator, OrchestratorError, OrchestratorOutcome};
pub use provider::{CommitStatus, Provider, ProviderError, StatusOptions};
pub use repository::{Repository, RepositoryRunStatus, RepositorySpec};
pub use settings::Settings;
pub use tekton::PipelineRun;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
