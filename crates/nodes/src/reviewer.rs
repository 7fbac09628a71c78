//! Reviewer node: reviews a pull request and publishes the verdict.

use pipeline::graph::Task;
use pipeline::links::closing_references;
use pipeline::ports::PullRequest;
use pipeline::review::{ReviewGate, ReviewPolicy, ReviewReport, ReviewVerdict};
use pipeline::workflow::{PullRequestState, WorkflowError, WorkflowEvent};
use pipeline::{PullRequestId, TaskwrightError};
use tracing::{info, instrument, warn};

use crate::context::NodeContext;
use crate::executor::NodeOutcome;
use crate::ledger_store::StoredLedger;
use crate::prompts::REVIEWER_SYSTEM;

pub struct Reviewer<'a> {
    ctx: &'a NodeContext,
}

impl<'a> Reviewer<'a> {
    pub fn new(ctx: &'a NodeContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self), fields(run_id = %self.ctx.run_id))]
    pub async fn run(&self, number: PullRequestId) -> Result<NodeOutcome, TaskwrightError> {
        let pr = self.ctx.pulls.get_pull_request(number).await?;
        if pr.state != PullRequestState::Open {
            return Ok(NodeOutcome::skipped(format!("pull request {number} is not open")));
        }
        let token = pr.freshness();

        let linked = self.ctx.ledgers().for_pull_request(&pr).await?;
        let task = linked
            .as_ref()
            .and_then(|stored| task_for_pr(stored, &pr))
            .cloned();

        let policy = ReviewPolicy::from_labels(&pr.labels)
            .or_else(|| linked.as_ref().map(|s| s.ledger.graph.policy))
            .unwrap_or(self.ctx.settings.review.default_policy);

        let diff = self.ctx.pulls.get_diff(number).await?;
        let verdict = if diff.trim().is_empty() {
            ReviewGate::evaluate(policy, ReviewReport::default(), Some("the pull request has no changes"))
        } else {
            let prompt = self.ctx.prompts.review(policy, task.as_ref(), &pr, &diff)?;
            let response = self.ctx.llm.complete(REVIEWER_SYSTEM, &prompt).await?;
            ReviewGate::evaluate(policy, ReviewReport::from_response(&response), None)
        };
        info!(
            pr = %number,
            policy = %policy,
            outcome = %verdict.outcome,
            findings = verdict.findings.len(),
            "review verdict"
        );

        let latest = self.ctx.pulls.get_pull_request(number).await?;
        if !token.is_current(&latest.freshness()) {
            warn!(
                pr = %number,
                captured = %token.head_sha,
                current = %latest.head_sha,
                state = ?latest.state,
                "pull request changed during review; verdict discarded"
            );
            return Ok(NodeOutcome::skipped(format!("review of {number} is stale and was discarded")));
        }

        self.publish(number, &verdict, linked).await?;
        Ok(NodeOutcome::completed(format!("pull request {number} reviewed: {}", verdict.outcome)))
    }

    async fn publish(
        &self,
        number: PullRequestId,
        verdict: &ReviewVerdict,
        linked: Option<StoredLedger>,
    ) -> Result<(), TaskwrightError> {
        self.ctx
            .tracker
            .create_comment(number.as_u64(), &verdict.render_comment())
            .await?;
        self.ctx.intents().execute(None, &verdict.label_intents(number)).await?;

        let Some(linked) = linked else {
            return Ok(());
        };
        // Re-read: the ledger may have moved while the model was reviewing.
        let parent = linked.ledger.parent;
        let Some(mut stored) = self.ctx.ledgers().load(parent).await? else {
            warn!(pr = %number, parent = %parent, "task plan disappeared during review; labels only");
            return Ok(());
        };
        let event = WorkflowEvent::ReviewCompleted {
            pr: number,
            outcome: verdict.outcome,
        };
        let transition = match self.ctx.machine().apply(&stored.ledger, &event) {
            Ok(t) => t,
            Err(e @ (WorkflowError::UnknownPullRequest { .. } | WorkflowError::Archived { .. })) => {
                warn!(pr = %number, reason = %e, "verdict not recorded in the task plan; labels only");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if transition.changed {
            stored.ledger = transition.ledger;
            self.ctx.ledgers().save(&mut stored).await?;
        }
        self.ctx
            .intents()
            .execute(Some(&stored.ledger), &transition.intents)
            .await
    }
}

fn task_for_pr<'l>(stored: &'l StoredLedger, pr: &PullRequest) -> Option<&'l Task> {
    let graph = &stored.ledger.graph;
    graph
        .tasks()
        .iter()
        .find(|t| t.open_pr == Some(pr.number))
        .or_else(|| {
            closing_references(&pr.body)
                .into_iter()
                .find_map(|issue| graph.task_for_issue(issue))
        })
}
