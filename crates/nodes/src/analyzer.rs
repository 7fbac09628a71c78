//! Analyzer node: decomposes a parent issue into a task graph and ingests it.

use pipeline::graph::{Task, TaskGraph, TaskGraphBuilder};
use pipeline::ledger::TaskLedger;
use pipeline::links::parent_line;
use pipeline::ports::{Issue, IssueState, NewIssue};
use pipeline::review::ReviewPolicy;
use pipeline::workflow::{labels, WorkflowEvent};
use pipeline::{SubWorkItemId, TaskwrightError, Timestamp, WorkItemId};
use tracing::{info, instrument, warn};

use crate::context::NodeContext;
use crate::executor::NodeOutcome;
use crate::ledger_store::StoredLedger;
use crate::prompts::PLANNER_SYSTEM;

pub struct Analyzer<'a> {
    ctx: &'a NodeContext,
}

impl<'a> Analyzer<'a> {
    pub fn new(ctx: &'a NodeContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self), fields(run_id = %self.ctx.run_id))]
    pub async fn run(&self, parent: WorkItemId) -> Result<NodeOutcome, TaskwrightError> {
        let issue = self.ctx.tracker.get_issue(parent.as_u64()).await?;
        if issue.state == IssueState::Closed {
            return Ok(NodeOutcome::skipped(format!("issue {parent} is closed")));
        }

        let store = self.ctx.ledgers();
        if let Some(existing) = store.load(parent).await? {
            if !existing.ledger.archived {
                return Ok(NodeOutcome::skipped(format!("issue {parent} already has a task plan")));
            }
        }

        let policy = ReviewPolicy::from_labels(&issue.labels).unwrap_or(self.ctx.settings.review.default_policy);
        let mut graph = self.plan(&issue, policy).await?;

        for id in graph.topological_order()? {
            let Some(task) = graph.task(id) else { continue };
            let number = self.ctx.tracker.create_issue(&sub_issue(parent, &graph, task)).await?;
            info!(task = %id, issue = number, "sub-issue created");
            graph.set_issue(id, SubWorkItemId::new(number));
        }
        self.ctx
            .tracker
            .add_label(parent.as_u64(), &graph.policy.label())
            .await?;

        let ledger = TaskLedger::new(parent, graph, Timestamp::now());
        let transition = self.ctx.machine().apply(&ledger, &WorkflowEvent::PlanIngested)?;
        let mut stored = StoredLedger {
            comment_id: None,
            ledger: transition.ledger,
        };
        store.save(&mut stored).await?;
        self.ctx
            .intents()
            .execute(Some(&stored.ledger), &transition.intents)
            .await?;
        self.ctx
            .tracker
            .remove_label(parent.as_u64(), labels::ANALYZE)
            .await?;

        let count = stored.ledger.graph.len();
        info!(parent = %parent, tasks = count, "plan ingested");
        Ok(NodeOutcome::completed(format!("issue {parent} planned into {count} tasks")))
    }

    /// Requests a plan, regenerating with the rejection reason as feedback
    /// until it validates or the regeneration budget runs out.
    async fn plan(&self, issue: &Issue, policy: ReviewPolicy) -> Result<TaskGraph, TaskwrightError> {
        let planning = &self.ctx.settings.planning;
        let builder = TaskGraphBuilder::new(planning);
        let mut feedback: Option<String> = None;
        let mut attempt = 0;
        loop {
            let prompt = self.ctx.prompts.plan(issue, planning, feedback.as_deref())?;
            let response = self.ctx.llm.complete(PLANNER_SYSTEM, &prompt).await?;
            match builder.build(&response, policy) {
                Ok(graph) => return Ok(graph),
                Err(e) if attempt < planning.max_regenerations => {
                    attempt += 1;
                    warn!(attempt, kind = %e.kind(), error = %e, "plan rejected; requesting regeneration");
                    feedback = Some(e.to_string());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn sub_issue(parent: WorkItemId, graph: &TaskGraph, task: &Task) -> NewIssue {
    let mut body = format!("{}\n\n{}\n\n### Acceptance criteria\n", parent_line(parent), task.description);
    for criterion in &task.acceptance {
        body.push_str(&format!("- [ ] {criterion}\n"));
    }
    if !task.depends_on.is_empty() {
        body.push_str("\n### Depends on\n");
        for dep in &task.depends_on {
            match graph.task(*dep).and_then(|d| d.issue) {
                Some(issue) => body.push_str(&format!("- {dep} ({issue})\n")),
                None => body.push_str(&format!("- {dep}\n")),
            }
        }
    }

    let mut labels = vec![
        labels::TASK.to_string(),
        format!("{}{}", labels::PRIORITY_PREFIX, task.severity.tag().to_ascii_lowercase()),
    ];
    if let Some(sprint) = &task.sprint {
        labels.push(format!("{}{sprint}", labels::SPRINT_PREFIX));
    }
    labels.extend(task.labels.iter().map(|l| l.to_string()));

    NewIssue {
        title: format!("[{}] {}", task.id, task.title),
        body,
        labels,
    }
}
