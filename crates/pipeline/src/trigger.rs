//! Trigger events: the external signals that start one handled run.
//!
//! The `listener` crate decodes hosting-platform webhooks into these; the CLI
//! can also synthesize them. Each event is handled once, against freshly
//! fetched state.

use serde::{Deserialize, Serialize};

use crate::identifiers::{LabelName, PullRequestId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerEvent {
    /// A label was added to an issue.
    IssueLabeled { issue: u64, label: LabelName },
    /// A pull request was opened, reopened, or received new commits.
    PullRequestUpdated { pr: PullRequestId },
    /// A pull request was closed, merged or not.
    PullRequestClosed { pr: PullRequestId, merged: bool },
    /// An issue was closed.
    IssueClosed { issue: u64 },
}

impl std::fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IssueLabeled { issue, label } => write!(f, "label '{label}' added to #{issue}"),
            Self::PullRequestUpdated { pr } => write!(f, "pull request {pr} updated"),
            Self::PullRequestClosed { pr, merged: true } => write!(f, "pull request {pr} merged"),
            Self::PullRequestClosed { pr, merged: false } => write!(f, "pull request {pr} closed"),
            Self::IssueClosed { issue } => write!(f, "issue #{issue} closed"),
        }
    }
}
