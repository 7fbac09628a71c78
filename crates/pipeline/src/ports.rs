//! Port traits implemented by infrastructure crates.
//!
//! ## Architectural Layer
//!
//! **Port definitions.** The pipeline defines *what* it needs from the
//! outside world; `llm`, `github`, and `worktree` define *how*. Nodes hold
//! these as `Arc<dyn Trait>` so tests can substitute in-memory fakes.
//!
//! Network-facing ports are async. Filesystem and subprocess ports are
//! synchronous: every event handler runs them to completion before the next
//! step and they never overlap.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::apply::FileChange;
use crate::errors::{ErrorKind, RetryPolicy};
use crate::identifiers::{BranchName, CommitSha, LabelName, ModelName, PullRequestId, RepoPath, StatusOptionId};
use crate::workflow::{FreshnessToken, PullRequestState};

// ---------------------------------------------------------------------------
// LLM
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub model: ModelName,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LlmError {
    #[error("{provider} rate limited the request")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("{provider} did not answer within {seconds}s")]
    Timeout { provider: String, seconds: u64 },

    #[error("{provider} returned a transient error ({status}): {message}")]
    Transient {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("{provider} rejected the credentials: {message}")]
    Authentication { provider: String, message: String },

    #[error("{provider} request failed ({status}): {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("{provider} returned an unreadable response: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("No LLM credential configured; set {expected}")]
    MissingCredential { expected: String },
}

impl LlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::Transient { .. } => {
                ErrorKind::TransientProviderError
            }
            Self::Authentication { .. } => ErrorKind::PermissionDenied,
            Self::MissingCredential { .. } => ErrorKind::Configuration,
            Self::Api { .. } | Self::InvalidResponse { .. } => ErrorKind::Infrastructure,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::RateLimited { retry_after, .. } => RetryPolicy::Retryable { after: *retry_after },
            Self::Timeout { .. } | Self::Transient { .. } => RetryPolicy::Retryable { after: None },
            _ => RetryPolicy::NonRetryable,
        }
    }
}

/// One configured model provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logs and error attribution.
    fn name(&self) -> &str;

    fn model(&self) -> &ModelName;

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;
}

// ---------------------------------------------------------------------------
// Issue tracker, pull requests, project board
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackerError {
    #[error("Permission denied for {operation}: {message}")]
    PermissionDenied { operation: String, message: String },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("Rate limited during {operation}")]
    RateLimited {
        operation: String,
        retry_after: Option<Duration>,
    },

    #[error("Transient failure during {operation} ({status}): {message}")]
    Transient {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("{operation} failed ({status}): {message}")]
    Api {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("Unreadable response for {operation}: {reason}")]
    InvalidResponse { operation: String, reason: String },

    #[error("No repository token configured; set GITHUB_TOKEN")]
    MissingToken,
}

impl TrackerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::RateLimited { .. } | Self::Transient { .. } => ErrorKind::TransientProviderError,
            Self::MissingToken => ErrorKind::Configuration,
            Self::NotFound { .. } | Self::Api { .. } | Self::InvalidResponse { .. } => {
                ErrorKind::Infrastructure
            }
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::RateLimited { retry_after, .. } => RetryPolicy::Retryable { after: *retry_after },
            Self::Transient { .. } => RetryPolicy::Retryable { after: None },
            _ => RetryPolicy::NonRetryable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<LabelName>,
    pub state: IssueState,
}

impl Issue {
    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.as_str() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueComment {
    pub id: u64,
    pub body: String,
}

/// Issues, labels, and comments. Pull requests share the issue number space
/// for labels and comments.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn get_issue(&self, number: u64) -> Result<Issue, TrackerError>;

    /// Creates an issue and returns its number.
    async fn create_issue(&self, issue: &NewIssue) -> Result<u64, TrackerError>;

    async fn add_label(&self, number: u64, label: &str) -> Result<(), TrackerError>;

    /// Removing a label that is not present succeeds.
    async fn remove_label(&self, number: u64, label: &str) -> Result<(), TrackerError>;

    async fn list_comments(&self, number: u64) -> Result<Vec<IssueComment>, TrackerError>;

    async fn create_comment(&self, number: u64, body: &str) -> Result<u64, TrackerError>;

    async fn update_comment(&self, comment_id: u64, body: &str) -> Result<(), TrackerError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: PullRequestId,
    pub title: String,
    pub body: String,
    pub state: PullRequestState,
    pub head_branch: BranchName,
    pub head_sha: CommitSha,
    pub base_branch: BranchName,
    pub labels: Vec<LabelName>,
}

impl PullRequest {
    pub fn freshness(&self) -> FreshnessToken {
        FreshnessToken {
            state: self.state,
            head_sha: self.head_sha.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub head: BranchName,
    pub base: BranchName,
}

#[async_trait]
pub trait PullRequestManager: Send + Sync {
    async fn get_pull_request(&self, number: PullRequestId) -> Result<PullRequest, TrackerError>;

    /// Unified diff of the pull request against its base.
    async fn get_diff(&self, number: PullRequestId) -> Result<String, TrackerError>;

    async fn find_open_for_branch(&self, head: &BranchName) -> Result<Option<PullRequest>, TrackerError>;

    async fn create_pull_request(&self, pr: &NewPullRequest) -> Result<PullRequestId, TrackerError>;
}

/// Mirror of task status on an external project board. Never authoritative.
#[async_trait]
pub trait ProjectBoard: Send + Sync {
    /// Sets the status field of the board item for issue `number`, adding
    /// the issue to the board first if needed.
    async fn set_status(&self, number: u64, option: &StatusOptionId) -> Result<(), TrackerError>;
}

// ---------------------------------------------------------------------------
// Working tree and repository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("`{command}` did not finish within {seconds}s")]
    Timeout { command: String, seconds: u64 },

    #[error("Commit of {path} failed and the rollback also failed: {message}")]
    Rollback { path: String, message: String },
}

/// Files of the checked-out branch.
pub trait WorkingTree: Send + Sync {
    /// Current content, or `None` if the file does not exist.
    fn read_file(&self, path: &RepoPath) -> Result<Option<String>, TreeError>;

    /// Every tracked file, sorted.
    fn list_files(&self) -> Result<Vec<RepoPath>, TreeError>;

    /// Writes every change or none. Files are staged next to their targets
    /// and renamed into place; a failed rename restores the files already
    /// replaced.
    fn commit(&self, changes: &[FileChange]) -> Result<(), TreeError>;
}

/// Version-control operations around the patch step.
pub trait CodeRepository: Send + Sync {
    /// Checks out `branch`, creating it from `base` if it does not exist
    /// locally or on the remote.
    fn prepare_branch(&self, branch: &BranchName, base: &BranchName) -> Result<(), TreeError>;

    /// Commits every change in the tree. `None` when there was nothing to
    /// commit.
    fn commit_all(&self, message: &str) -> Result<Option<CommitSha>, TreeError>;

    fn push(&self, branch: &BranchName) -> Result<(), TreeError>;
}

// ---------------------------------------------------------------------------
// Validation and formatting
// ---------------------------------------------------------------------------

/// Best-effort syntax check per language family.
pub trait SourceValidator: Send + Sync {
    /// `Ok(())` for valid content and for languages without a grammar.
    fn validate(&self, path: &RepoPath, content: &str) -> Result<(), String>;
}

/// External code formatter.
pub trait Formatter: Send + Sync {
    /// Formatted content, `Ok(None)` when no formatter handles `path`.
    fn format(&self, path: &RepoPath, content: &str) -> Result<Option<String>, String>;
}
