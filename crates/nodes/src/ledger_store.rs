//! Loads and persists the task ledger comment on a parent issue.

use std::sync::Arc;

use pipeline::ledger::TaskLedger;
use pipeline::links::{closing_references, parent_reference};
use pipeline::ports::{IssueTracker, PullRequest};
use pipeline::{TaskwrightError, Timestamp, WorkItemId};
use tracing::debug;

/// A ledger together with the comment it was read from.
#[derive(Debug, Clone)]
pub struct StoredLedger {
    pub comment_id: Option<u64>,
    pub ledger: TaskLedger,
}

#[derive(Clone)]
pub struct LedgerStore {
    tracker: Arc<dyn IssueTracker>,
}

impl LedgerStore {
    pub fn new(tracker: Arc<dyn IssueTracker>) -> Self {
        Self { tracker }
    }

    /// The most recent ledger comment on `parent`, if any.
    pub async fn load(&self, parent: WorkItemId) -> Result<Option<StoredLedger>, TaskwrightError> {
        let comments = self.tracker.list_comments(parent.as_u64()).await?;
        let Some(comment) = comments.iter().rev().find(|c| TaskLedger::is_ledger_comment(&c.body)) else {
            return Ok(None);
        };
        let ledger = TaskLedger::parse(&comment.body)?;
        Ok(Some(StoredLedger {
            comment_id: Some(comment.id),
            ledger,
        }))
    }

    /// The ledger of the parent a pull request belongs to: named by a
    /// `Parent:` line in its body, or by the task issue it closes.
    pub async fn for_pull_request(&self, pr: &PullRequest) -> Result<Option<StoredLedger>, TaskwrightError> {
        let mut parent = parent_reference(&pr.body);
        if parent.is_none() {
            for issue in closing_references(&pr.body) {
                let task_issue = self.tracker.get_issue(issue.as_u64()).await?;
                parent = parent_reference(&task_issue.body);
                if parent.is_some() {
                    break;
                }
            }
        }
        match parent {
            Some(parent) => self.load(parent).await,
            None => Ok(None),
        }
    }

    /// Writes `stored.ledger` back, creating the comment on first save.
    pub async fn save(&self, stored: &mut StoredLedger) -> Result<(), TaskwrightError> {
        stored.ledger.updated_at = Timestamp::now();
        let body = stored.ledger.render()?;
        match stored.comment_id {
            Some(id) => self.tracker.update_comment(id, &body).await?,
            None => {
                let id = self
                    .tracker
                    .create_comment(stored.ledger.parent.as_u64(), &body)
                    .await?;
                stored.comment_id = Some(id);
            }
        }
        debug!(parent = %stored.ledger.parent, "ledger saved");
        Ok(())
    }
}
