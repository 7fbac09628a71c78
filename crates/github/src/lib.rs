//! Taskwright GitHub adapter.
//!
//! Implements the hosting-facing traits defined in the [`pipeline`] crate
//! ([`IssueTracker`](pipeline::ports::IssueTracker),
//! [`PullRequestManager`](pipeline::ports::PullRequestManager),
//! [`ProjectBoard`](pipeline::ports::ProjectBoard)) over the GitHub REST and
//! GraphQL APIs.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules. Status code
//! classification, pagination, and authentication are handled here; the
//! [`pipeline`] crate only sees [`TrackerError`](pipeline::ports::TrackerError).
//!
//! | HTTP status | Error |
//! |-------------|-------|
//! | 401, 403 | `PermissionDenied` |
//! | 404 | `NotFound` |
//! | 429, 403 with exhausted rate limit | `RateLimited` |
//! | 5xx | `Transient` |
//! | anything else | `Api` |

mod client;
mod issues;
mod project;
mod pulls;

pub use client::GitHubClient;
pub use project::GitHubProjectBoard;
