//! Core orchestration domain for Taskwright.
//!
//! This crate contains every domain concept of the change lifecycle: turning
//! agent-produced change proposals into verified working-tree mutations,
//! validating task graphs, gating reviews, and sequencing tasks through the
//! workflow state machine. Infrastructure crates implement the traits in
//! [`ports`]; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype domain identifiers (`TaskId`, `RepoPath`, `PullRequestId`, etc.) |
//! | [`types`] | Shared value types (`Confidence`, `ContentHash`, `Severity`, `Timestamp`) |
//! | [`errors`] | Top-level error, error-kind, and retry-policy types |
//! | [`config`] | `.taskwright/config.toml` shape, defaults, and validation |
//! | [`glob`] | Repository path globs |
//! | [`patch`] | Patch Normalizer: extraction, parsing, path policy |
//! | [`apply`] | Patch Applier: the four-strategy chain and three-way merge |
//! | [`reface`] | Full-File Refacer gates and KEEP regions |
//! | [`graph`] | Task Graph Builder |
//! | [`review`] | Review Gate |
//! | [`workflow`] | Workflow State Machine, label vocabulary, freshness tokens |
//! | [`ledger`] | Persisted task ledger |
//! | [`links`] | `Closes #n` / `Parent: #n` references |
//! | [`payload`] | JSON payload extraction from model responses |
//! | [`trigger`] | External events that start a run |
//! | [`ports`] | Traits implemented by infrastructure crates |

pub mod apply;
pub mod config;
pub mod errors;
pub mod glob;
pub mod graph;
pub mod identifiers;
pub mod ledger;
pub mod links;
pub mod patch;
pub mod payload;
pub mod ports;
pub mod reface;
pub mod review;
pub mod trigger;
pub mod types;
pub mod workflow;

// Re-export the most used items at the crate root for ergonomic usage by downstream crates.
pub use errors::{ErrorKind, RetryPolicy, TaskwrightError};
pub use identifiers::{
    BranchName, CommitSha, LabelName, ModelName, PipelineRunId, ProjectId, PullRequestId, RepoPath,
    RepositoryId, StatusFieldId, StatusOptionId, SubWorkItemId, TaskId, WorkItemId,
};
pub use trigger::TriggerEvent;
pub use types::{Confidence, ContentHash, Estimate, Severity, Timestamp};
