//! Routes one trigger event to the node that handles it.

use pipeline::workflow::labels;
use pipeline::{SubWorkItemId, TaskwrightError, TriggerEvent, WorkItemId};
use tracing::{info, instrument};

use crate::analyzer::Analyzer;
use crate::context::NodeContext;
use crate::developer::Developer;
use crate::progress::Progress;
use crate::reviewer::Reviewer;

/// How a handled event ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    Completed { summary: String },
    /// Nothing to do for this event; not an error.
    Skipped { reason: String },
}

impl NodeOutcome {
    pub fn completed(summary: impl Into<String>) -> Self {
        Self::Completed {
            summary: summary.into(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped { reason: reason.into() }
    }
}

impl std::fmt::Display for NodeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed { summary } => write!(f, "completed: {summary}"),
            Self::Skipped { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

pub struct PipelineExecutor {
    ctx: NodeContext,
}

impl PipelineExecutor {
    pub fn new(ctx: NodeContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &NodeContext {
        &self.ctx
    }

    #[instrument(skip(self, event), fields(run_id = %self.ctx.run_id, event = %event))]
    pub async fn dispatch(&self, event: TriggerEvent) -> Result<NodeOutcome, TaskwrightError> {
        let outcome = match event {
            TriggerEvent::IssueLabeled { issue, label } => match label.as_str() {
                labels::ANALYZE => Analyzer::new(&self.ctx).run(WorkItemId::new(issue)).await?,
                labels::IMPLEMENT => Developer::new(&self.ctx).run(SubWorkItemId::new(issue)).await?,
                other => NodeOutcome::skipped(format!("label '{other}' does not trigger a node")),
            },
            TriggerEvent::PullRequestUpdated { pr } => Reviewer::new(&self.ctx).run(pr).await?,
            TriggerEvent::PullRequestClosed { pr, .. } => {
                Progress::new(&self.ctx)
                    .on_pull_request_closed(pr)
                    .await?
            }
            TriggerEvent::IssueClosed { issue } => Progress::new(&self.ctx).on_parent_closed(WorkItemId::new(issue)).await?,
        };
        info!(outcome = %outcome, "event handled");
        Ok(outcome)
    }
}
