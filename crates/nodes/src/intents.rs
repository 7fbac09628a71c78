//! Carries out the side-effect intents produced by the workflow machine and
//! the review gate.
//!
//! Labels and comments must succeed. Project status mirroring is best effort:
//! it is skipped when no board is configured, and any failure (a permission
//! error in particular) is logged as a warning without stopping the run.

use std::sync::Arc;

use pipeline::config::ProjectSettings;
use pipeline::ledger::TaskLedger;
use pipeline::ports::{IssueTracker, ProjectBoard};
use pipeline::workflow::{Intent, Target, TaskStatus};
use pipeline::{ErrorKind, TaskwrightError};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct IntentExecutor {
    tracker: Arc<dyn IssueTracker>,
    board: Option<(Arc<dyn ProjectBoard>, ProjectSettings)>,
}

impl IntentExecutor {
    pub fn new(tracker: Arc<dyn IssueTracker>, board: Option<(Arc<dyn ProjectBoard>, ProjectSettings)>) -> Self {
        Self { tracker, board }
    }

    /// Executes `intents` in order. Task targets resolve through `ledger`;
    /// a task without a sub-issue is skipped.
    pub async fn execute(&self, ledger: Option<&TaskLedger>, intents: &[Intent]) -> Result<(), TaskwrightError> {
        for intent in intents {
            match intent {
                Intent::AddLabel { target, label } => {
                    if let Some(number) = resolve(ledger, *target) {
                        self.tracker.add_label(number, label).await?;
                    }
                }
                Intent::RemoveLabel { target, label } => {
                    if let Some(number) = resolve(ledger, *target) {
                        self.tracker.remove_label(number, label).await?;
                    }
                }
                Intent::Comment { target, body } => {
                    if let Some(number) = resolve(ledger, *target) {
                        self.tracker.create_comment(number, body).await?;
                    }
                }
                Intent::MirrorStatus { target, status } => {
                    if let Some(number) = resolve(ledger, *target) {
                        self.mirror(number, *status).await;
                    }
                }
            }
        }
        Ok(())
    }

    async fn mirror(&self, number: u64, status: TaskStatus) {
        let Some((board, project)) = &self.board else {
            debug!(issue = number, status = %status, "project mirroring disabled");
            return;
        };
        let Some(option) = project.status_options.get(status.board_name()) else {
            warn!(issue = number, status = status.board_name(), "no project option for status; mirror skipped");
            return;
        };
        if let Err(e) = board.set_status(number, option).await {
            if e.kind() == ErrorKind::PermissionDenied {
                warn!(issue = number, status = status.board_name(), error = %e, "permission denied mirroring project status; continuing");
            } else {
                warn!(issue = number, status = status.board_name(), error = %e, "project status mirror failed; continuing");
            }
        }
    }
}

fn resolve(ledger: Option<&TaskLedger>, target: Target) -> Option<u64> {
    match (ledger, target) {
        (_, Target::PullRequest(pr)) => Some(pr.as_u64()),
        (Some(l), t) => l.resolve(t),
        (None, t) => {
            debug!(target = ?t, "intent target needs a ledger; skipped");
            None
        }
    }
}
