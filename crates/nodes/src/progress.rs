//! Progress node: advances the task plan when a pull request is merged or
//! closed, and archives it when the parent issue closes.

use pipeline::links::closing_references;
use pipeline::workflow::{PullRequestState, WorkflowEvent};
use pipeline::{PullRequestId, TaskwrightError, WorkItemId};
use tracing::{info, instrument};

use crate::context::NodeContext;
use crate::executor::NodeOutcome;
use crate::ledger_store::StoredLedger;

pub struct Progress<'a> {
    ctx: &'a NodeContext,
}

impl<'a> Progress<'a> {
    pub fn new(ctx: &'a NodeContext) -> Self {
        Self { ctx }
    }

    /// Handles a closed pull request, merged or not.
    #[instrument(skip(self), fields(run_id = %self.ctx.run_id))]
    pub async fn on_pull_request_closed(&self, number: PullRequestId) -> Result<NodeOutcome, TaskwrightError> {
        let pr = self.ctx.pulls.get_pull_request(number).await?;
        let Some(stored) = self.ctx.ledgers().for_pull_request(&pr).await? else {
            return Ok(NodeOutcome::skipped(format!("pull request {number} is not linked to a task plan")));
        };

        let event = match pr.state {
            PullRequestState::Merged => WorkflowEvent::PullRequestMerged {
                pr: number,
                closes: closing_references(&pr.body),
            },
            PullRequestState::Closed => WorkflowEvent::PullRequestClosed { pr: number },
            PullRequestState::Open => {
                return Ok(NodeOutcome::skipped(format!("pull request {number} is still open")));
            }
        };
        self.advance(stored, &event).await
    }

    /// Archives the plan of a closed parent issue.
    #[instrument(skip(self), fields(run_id = %self.ctx.run_id))]
    pub async fn on_parent_closed(&self, parent: WorkItemId) -> Result<NodeOutcome, TaskwrightError> {
        let Some(stored) = self.ctx.ledgers().load(parent).await? else {
            return Ok(NodeOutcome::skipped(format!("issue {parent} has no task plan")));
        };
        self.advance(stored, &WorkflowEvent::ParentClosed).await
    }

    async fn advance(&self, mut stored: StoredLedger, event: &WorkflowEvent) -> Result<NodeOutcome, TaskwrightError> {
        let parent = stored.ledger.parent;
        let transition = self.ctx.machine().apply(&stored.ledger, event)?;
        if !transition.changed {
            return Ok(NodeOutcome::skipped(format!("{} already applied to {parent}", event.name())));
        }
        stored.ledger = transition.ledger;
        self.ctx.ledgers().save(&mut stored).await?;
        self.ctx
            .intents()
            .execute(Some(&stored.ledger), &transition.intents)
            .await?;
        info!(parent = %parent, event = event.name(), "task plan advanced");
        Ok(NodeOutcome::completed(format!("{} applied to {parent}", event.name())))
    }
}
