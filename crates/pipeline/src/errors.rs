//! Top-level error, error-kind, and retry-policy types for the Taskwright domain.
//!
//! [`TaskwrightError`] covers conditions that halt a handled event. Component-level
//! errors (patch parsing, strategy exhaustion, refacing gates, graph validation,
//! provider and tracker failures) are defined in their respective modules and
//! convert into it with `?`.
//!
//! [`ErrorKind`] is the stable, machine-readable taxonomy an automated follow-up
//! step uses to decide what to do next (e.g. escalate an unresolvable diff to a
//! full-file rewrite). [`RetryPolicy`] is a cross-cutting concern: any error type
//! that participates in retry decisions must be able to produce one.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::apply::ApplyError;
use crate::graph::GraphError;
use crate::patch::PatchError;
use crate::ports::{LlmError, TrackerError, TreeError};
use crate::reface::RefaceError;
use crate::workflow::WorkflowError;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by infrastructure error types to let the orchestrator decide
/// whether to re-invoke an operation without escalating.
///
/// - `Retryable` errors: API timeouts, transient rate-limit responses.
/// - `NonRetryable` errors: policy violations, invalid configuration,
///   authentication failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying (e.g.
    /// derived from a `Retry-After` response header).
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Taxonomy
// ---------------------------------------------------------------------------

/// Stable classification of every terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PolicyViolation,
    MalformedPatch,
    UnresolvableConflict,
    BaseChanged,
    KeepBlockViolated,
    ValidationFailed,
    LowConfidence,
    GraphCycle,
    DependencyGap,
    TransientProviderError,
    PermissionDenied,
    /// An event that the workflow refuses in the task's current state.
    InvalidTransition,
    /// Misconfiguration or a missing credential.
    Configuration,
    /// Any other infrastructure failure (I/O, unexpected API response).
    Infrastructure,
}

impl ErrorKind {
    /// Snake-case tag, suitable for log fields and comment headers.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PolicyViolation => "policy_violation",
            Self::MalformedPatch => "malformed_patch",
            Self::UnresolvableConflict => "unresolvable_conflict",
            Self::BaseChanged => "base_changed",
            Self::KeepBlockViolated => "keep_block_violated",
            Self::ValidationFailed => "validation_failed",
            Self::LowConfidence => "low_confidence",
            Self::GraphCycle => "graph_cycle",
            Self::DependencyGap => "dependency_gap",
            Self::TransientProviderError => "transient_provider_error",
            Self::PermissionDenied => "permission_denied",
            Self::InvalidTransition => "invalid_transition",
            Self::Configuration => "configuration",
            Self::Infrastructure => "infrastructure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Pipeline-level errors
// ---------------------------------------------------------------------------

/// Errors that end the handling of one trigger event.
#[derive(Debug, Error)]
pub enum TaskwrightError {
    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Reface(#[from] RefaceError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    /// The handler stopped deliberately (not a transient failure).
    #[error("Pipeline halted: {reason}")]
    PipelineHalt {
        /// Human-readable description of why handling stopped.
        reason: String,
    },

    /// The runtime configuration is invalid or a required credential is absent.
    ///
    /// Produced at load time; handlers never start with an invalid config.
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Description of the configuration problem.
        message: String,
    },
}

impl TaskwrightError {
    /// Classifies this error against the stable taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Patch(e) => e.kind(),
            Self::Apply(e) => e.kind(),
            Self::Reface(e) => e.kind(),
            Self::Graph(e) => e.kind(),
            Self::Workflow(e) => e.kind(),
            Self::Llm(e) => e.kind(),
            Self::Tracker(e) => e.kind(),
            Self::Tree(_) => ErrorKind::Infrastructure,
            Self::PipelineHalt { .. } => ErrorKind::InvalidTransition,
            Self::ConfigurationError { .. } => ErrorKind::Configuration,
        }
    }

    /// Whether the failing operation may be retried as-is.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Llm(e) => e.retry_policy(),
            Self::Tracker(e) => e.retry_policy(),
            Self::Reface(RefaceError::BaseChanged { .. }) => RetryPolicy::Retryable { after: None },
            _ => RetryPolicy::NonRetryable,
        }
    }
}
