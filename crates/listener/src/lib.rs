//! Taskwright trigger decoding.
//!
//! Turns a GitHub webhook delivery (event name plus JSON payload) into the
//! [`TriggerEvent`] the executor dispatches. Deliveries that do not start a
//! node decode to `None`.
//!
//! | Event | Actions | Trigger |
//! |-------|---------|---------|
//! | `issues` | `labeled` | [`TriggerEvent::IssueLabeled`] |
//! | `issues` | `closed` | [`TriggerEvent::IssueClosed`] |
//! | `pull_request` | `opened`, `synchronize`, `reopened`, `ready_for_review` | [`TriggerEvent::PullRequestUpdated`] |
//! | `pull_request` | `closed` | [`TriggerEvent::PullRequestClosed`] |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Payload shapes stay here; the [`pipeline`] crate sees
//! only [`TriggerEvent`].

use std::path::{Path, PathBuf};

use pipeline::{LabelName, PullRequestId, TriggerEvent};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Environment variable naming the event type in a workflow run.
pub const EVENT_NAME_VAR: &str = "GITHUB_EVENT_NAME";

/// Environment variable pointing at the JSON payload of a workflow run.
pub const EVENT_PATH_VAR: &str = "GITHUB_EVENT_PATH";

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("{variable} is not set")]
    MissingVariable { variable: &'static str },

    #[error("Could not read event payload {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed '{event}' payload: {reason}")]
    Malformed { event: String, reason: String },
}

#[derive(Deserialize)]
struct IssuesPayload {
    action: String,
    issue: IssueRef,
    label: Option<LabelRef>,
}

#[derive(Deserialize)]
struct IssueRef {
    number: u64,
    /// Present when the "issue" is a pull request.
    pull_request: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct LabelRef {
    name: String,
}

#[derive(Deserialize)]
struct PullRequestPayload {
    action: String,
    pull_request: PullRef,
}

#[derive(Deserialize)]
struct PullRef {
    number: u64,
    #[serde(default)]
    merged: bool,
}

/// Decodes one webhook delivery.
pub fn decode_event(event: &str, payload: &str) -> Result<Option<TriggerEvent>, ListenerError> {
    let malformed = |e: serde_json::Error| ListenerError::Malformed {
        event: event.to_string(),
        reason: e.to_string(),
    };

    let trigger = match event {
        "issues" => {
            let p: IssuesPayload = serde_json::from_str(payload).map_err(malformed)?;
            if p.issue.pull_request.is_some() {
                None
            } else {
                match p.action.as_str() {
                    "labeled" => {
                        let label = p
                            .label
                            .and_then(|l| LabelName::new(l.name))
                            .ok_or_else(|| ListenerError::Malformed {
                                event: event.to_string(),
                                reason: "labeled action without a label".into(),
                            })?;
                        Some(TriggerEvent::IssueLabeled {
                            issue: p.issue.number,
                            label,
                        })
                    }
                    "closed" => Some(TriggerEvent::IssueClosed { issue: p.issue.number }),
                    _ => None,
                }
            }
        }
        "pull_request" | "pull_request_target" => {
            let p: PullRequestPayload = serde_json::from_str(payload).map_err(malformed)?;
            let pr = PullRequestId::new(p.pull_request.number);
            match p.action.as_str() {
                "opened" | "synchronize" | "reopened" | "ready_for_review" => {
                    Some(TriggerEvent::PullRequestUpdated { pr })
                }
                "closed" => Some(TriggerEvent::PullRequestClosed {
                    pr,
                    merged: p.pull_request.merged,
                }),
                _ => None,
            }
        }
        _ => None,
    };

    if trigger.is_none() {
        debug!(event, "delivery does not start a node");
    }
    Ok(trigger)
}

/// Reads the payload file and decodes it.
pub fn decode_file(event: &str, path: &Path) -> Result<Option<TriggerEvent>, ListenerError> {
    let payload = std::fs::read_to_string(path).map_err(|source| ListenerError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    decode_event(event, &payload)
}

/// Decodes the event of the current workflow run from `GITHUB_EVENT_NAME`
/// and `GITHUB_EVENT_PATH`.
pub fn from_actions_env() -> Result<Option<TriggerEvent>, ListenerError> {
    let event = std::env::var(EVENT_NAME_VAR).map_err(|_| ListenerError::MissingVariable {
        variable: EVENT_NAME_VAR,
    })?;
    let path = std::env::var_os(EVENT_PATH_VAR).ok_or(ListenerError::MissingVariable {
        variable: EVENT_PATH_VAR,
    })?;
    decode_file(&event, Path::new(&path))
}
