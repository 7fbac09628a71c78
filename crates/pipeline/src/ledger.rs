//! Task ledger: the authoritative task graph for one parent issue.
//!
//! Persisted as a marker comment on the parent issue: a human-readable status
//! table followed by a fenced JSON block. Every event handler re-reads it;
//! nothing survives in process memory between events.

use serde::{Deserialize, Serialize};

use crate::graph::TaskGraph;
use crate::identifiers::{SubWorkItemId, WorkItemId};
use crate::payload::extract_json_object;
use crate::types::Timestamp;
use crate::workflow::{Target, WorkflowError};

/// First line of every ledger comment.
pub const LEDGER_MARKER: &str = "<!-- taskwright:ledger -->";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLedger {
    pub parent: WorkItemId,
    pub graph: TaskGraph,
    #[serde(default)]
    pub archived: bool,
    pub updated_at: Timestamp,
}

impl TaskLedger {
    pub fn new(parent: WorkItemId, graph: TaskGraph, updated_at: Timestamp) -> Self {
        Self {
            parent,
            graph,
            archived: false,
            updated_at,
        }
    }

    pub fn is_ledger_comment(body: &str) -> bool {
        body.trim_start().starts_with(LEDGER_MARKER)
    }

    /// Reads a ledger comment body.
    pub fn parse(body: &str) -> Result<Self, WorkflowError> {
        if !Self::is_ledger_comment(body) {
            return Err(WorkflowError::CorruptLedger {
                reason: "comment does not carry the ledger marker".into(),
            });
        }
        let json = extract_json_object(body).ok_or_else(|| WorkflowError::CorruptLedger {
            reason: "no JSON block after the marker".into(),
        })?;
        serde_json::from_str(json).map_err(|e| WorkflowError::CorruptLedger { reason: e.to_string() })
    }

    /// Renders the comment body.
    pub fn render(&self) -> Result<String, WorkflowError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| WorkflowError::CorruptLedger { reason: e.to_string() })?;

        let mut out = format!("{LEDGER_MARKER}\n### Task plan for {}\n\n", self.parent);
        out.push_str("| Task | Issue | Status | Depends on |\n|---|---|---|---|\n");
        for task in self.graph.tasks() {
            let issue = task.issue.map(|i| i.to_string()).unwrap_or_else(|| "-".into());
            let deps = if task.depends_on.is_empty() {
                "-".to_string()
            } else {
                task.depends_on.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
            };
            out.push_str(&format!(
                "| {} {} | {issue} | {} | {deps} |\n",
                task.id,
                task.title.replace('|', "\\|"),
                task.status.board_name()
            ));
        }
        if self.archived {
            out.push_str("\n_Archived._\n");
        }
        out.push_str(&format!(
            "\n<details><summary>Ledger data (updated {})</summary>\n\n```json\n{json}\n```\n</details>\n",
            self.updated_at
        ));
        Ok(out)
    }

    /// Issue or pull request number an intent target refers to.
    pub fn resolve(&self, target: Target) -> Option<u64> {
        match target {
            Target::Parent => Some(self.parent.as_u64()),
            Target::Task(id) => self.graph.task(id)?.issue.map(SubWorkItemId::as_u64),
            Target::PullRequest(pr) => Some(pr.as_u64()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::two_task_graph;
    use crate::identifiers::{PullRequestId, TaskId};

    fn ledger() -> TaskLedger {
        let mut graph = two_task_graph();
        graph.set_issue(TaskId::new(1).unwrap(), SubWorkItemId::new(11));
        TaskLedger::new(WorkItemId::new(10), graph, Timestamp::now())
    }

    #[test]
    fn rendered_ledger_reads_back() {
        let original = ledger();
        let body = original.render().unwrap();

        assert!(TaskLedger::is_ledger_comment(&body));
        assert!(body.contains("| T1 Arithmetic module | #11 | Backlog | - |"));
        assert_eq!(TaskLedger::parse(&body).unwrap(), original);
    }

    #[test]
    fn other_comments_are_not_ledgers() {
        assert!(matches!(
            TaskLedger::parse("Thanks! {\"a\": 1}"),
            Err(WorkflowError::CorruptLedger { .. })
        ));
        assert!(matches!(
            TaskLedger::parse(&format!("{LEDGER_MARKER}\n```json\n{{\"parent\": 1}}\n```")),
            Err(WorkflowError::CorruptLedger { .. })
        ));
    }

    #[test]
    fn targets_resolve_to_numbers() {
        let l = ledger();
        assert_eq!(l.resolve(Target::Parent), Some(10));
        assert_eq!(l.resolve(Target::Task(TaskId::new(1).unwrap())), Some(11));
        assert_eq!(l.resolve(Target::Task(TaskId::new(2).unwrap())), None);
        assert_eq!(l.resolve(Target::PullRequest(PullRequestId::new(4))), Some(4));
    }
}
