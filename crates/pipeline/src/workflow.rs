//! Workflow State Machine.
//!
//! Task status moves `Backlog → InProgress → InReview → {InProgress | Done}`.
//! [`WorkflowMachine::apply`] is a pure function from a ledger and one event
//! to the next ledger plus the [`Intent`]s an executor must carry out (label
//! changes, project status mirroring, comments). It never performs I/O.
//!
//! Replaying an event against a task already in the event's target state is
//! a no-op: the returned [`Transition`] has `changed == false` and carries no
//! intents.
//!
//! At most one task per issue is in flight (`InProgress` or `InReview`).
//! Completing a task starts exactly one successor: the lowest-id Backlog task
//! whose dependencies are all Done.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::WorkflowSettings;
use crate::errors::ErrorKind;
use crate::identifiers::{CommitSha, PullRequestId, SubWorkItemId, TaskId, WorkItemId};
use crate::ledger::TaskLedger;
use crate::review::ReviewOutcome;

/// The externally visible label vocabulary.
pub mod labels {
    pub const ANALYZE: &str = "bot:analyze";
    pub const IMPLEMENT: &str = "bot:implement";
    pub const NEED_FIX: &str = "need-fix";
    pub const READY_TO_MERGE: &str = "ready-to-merge";
    pub const TASK: &str = "task";
    pub const POLICY_PREFIX: &str = "policy:";
    pub const PRIORITY_PREFIX: &str = "priority:";
    pub const SPRINT_PREFIX: &str = "sprint:";
}

// ---------------------------------------------------------------------------
// States and events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    InProgress,
    InReview,
    Done,
}

impl TaskStatus {
    /// Option name on the project board's status field.
    pub fn board_name(self) -> &'static str {
        match self {
            Self::Backlog => "Backlog",
            Self::InProgress => "In Progress",
            Self::InReview => "In Review",
            Self::Done => "Done",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Backlog => "backlog",
            Self::InProgress => "in_progress",
            Self::InReview => "in_review",
            Self::Done => "done",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowEvent {
    /// A freshly planned ledger was persisted.
    PlanIngested,
    /// `bot:implement` was added to a task issue.
    StartRequested { task: TaskId },
    /// A pull request for `task` was opened or received new commits.
    PullRequestOpened { task: TaskId, pr: PullRequestId },
    /// A fresh review verdict for `pr`.
    ReviewCompleted { pr: PullRequestId, outcome: ReviewOutcome },
    /// `pr` was merged; `closes` are the task issues its body closes.
    PullRequestMerged {
        pr: PullRequestId,
        closes: Vec<SubWorkItemId>,
    },
    /// `pr` was closed without merging.
    PullRequestClosed { pr: PullRequestId },
    /// The parent issue was closed.
    ParentClosed,
}

impl WorkflowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PlanIngested => "plan_ingested",
            Self::StartRequested { .. } => "start_requested",
            Self::PullRequestOpened { .. } => "pull_request_opened",
            Self::ReviewCompleted { .. } => "review_completed",
            Self::PullRequestMerged { .. } => "pull_request_merged",
            Self::PullRequestClosed { .. } => "pull_request_closed",
            Self::ParentClosed => "parent_closed",
        }
    }
}

/// What an intent applies to. Task targets resolve to the task's sub-issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Parent,
    Task(TaskId),
    PullRequest(PullRequestId),
}

/// A side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    AddLabel { target: Target, label: String },
    RemoveLabel { target: Target, label: String },
    /// Best effort: a failure is logged and never blocks progression.
    MirrorStatus { target: Target, status: TaskStatus },
    Comment { target: Target, body: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub ledger: TaskLedger,
    pub intents: Vec<Intent>,
    pub changed: bool,
}

impl Transition {
    fn unchanged(ledger: &TaskLedger) -> Self {
        Self {
            ledger: ledger.clone(),
            intents: Vec::new(),
            changed: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("Task {task} is not part of the ledger for {parent}")]
    UnknownTask { parent: WorkItemId, task: TaskId },

    #[error("Pull request {pr} is not linked to any task of {parent}")]
    UnknownPullRequest { parent: WorkItemId, pr: PullRequestId },

    #[error("Cannot start {task}: {in_flight} is still in flight{}", with_pr(.pr))]
    TaskInFlight {
        task: TaskId,
        in_flight: TaskId,
        pr: Option<PullRequestId>,
    },

    #[error("Cannot start {task}: waiting on {}", join_ids(.waiting_on))]
    Blocked { task: TaskId, waiting_on: Vec<TaskId> },

    #[error("Merged pull request {pr} is linked to {linked} tasks; exactly one is required")]
    AmbiguousMerge { pr: PullRequestId, linked: usize },

    #[error("Task {task} is {from}; {event} does not apply")]
    InvalidTransition {
        task: TaskId,
        from: TaskStatus,
        event: &'static str,
    },

    #[error("The ledger for {parent} is archived")]
    Archived { parent: WorkItemId },

    #[error("Task ledger could not be read: {reason}")]
    CorruptLedger { reason: String },
}

fn with_pr(pr: &Option<PullRequestId>) -> String {
    pr.map(|p| format!(" with open pull request {p}")).unwrap_or_default()
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Blocked { .. } => ErrorKind::DependencyGap,
            Self::CorruptLedger { .. } => ErrorKind::ValidationFailed,
            _ => ErrorKind::InvalidTransition,
        }
    }
}

// ---------------------------------------------------------------------------
// Freshness
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestState {
    Open,
    Closed,
    Merged,
}

/// Pull request state captured before a long-running step.
///
/// Re-read immediately before any mutating side effect; a mismatch means the
/// result was superseded and must be discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessToken {
    pub state: PullRequestState,
    pub head_sha: CommitSha,
}

impl FreshnessToken {
    pub fn is_current(&self, latest: &FreshnessToken) -> bool {
        latest.state == PullRequestState::Open && self == latest
    }
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

pub struct WorkflowMachine {
    max_fix_iterations: Option<u32>,
}

impl WorkflowMachine {
    pub fn new(settings: &WorkflowSettings) -> Self {
        Self {
            max_fix_iterations: settings.max_fix_iterations,
        }
    }

    pub fn apply(&self, ledger: &TaskLedger, event: &WorkflowEvent) -> Result<Transition, WorkflowError> {
        if ledger.archived {
            return match event {
                WorkflowEvent::ParentClosed => Ok(Transition::unchanged(ledger)),
                _ => Err(WorkflowError::Archived { parent: ledger.parent }),
            };
        }

        let mut next = ledger.clone();
        let mut intents = Vec::new();
        let changed = match event {
            WorkflowEvent::PlanIngested => ingest(&mut next, &mut intents),
            WorkflowEvent::StartRequested { task } => start(&mut next, *task, &mut intents)?,
            WorkflowEvent::PullRequestOpened { task, pr } => opened(&mut next, *task, *pr, &mut intents)?,
            WorkflowEvent::ReviewCompleted { pr, outcome } => {
                self.reviewed(&mut next, *pr, *outcome, &mut intents)?
            }
            WorkflowEvent::PullRequestMerged { pr, closes } => merged(&mut next, *pr, closes, &mut intents)?,
            WorkflowEvent::PullRequestClosed { pr } => closed(&mut next, *pr, &mut intents),
            WorkflowEvent::ParentClosed => {
                next.archived = true;
                true
            }
        };

        if !changed && intents.is_empty() {
            return Ok(Transition::unchanged(ledger));
        }
        Ok(Transition {
            ledger: next,
            intents,
            changed,
        })
    }

    fn reviewed(
        &self,
        ledger: &mut TaskLedger,
        pr: PullRequestId,
        outcome: ReviewOutcome,
        intents: &mut Vec<Intent>,
    ) -> Result<bool, WorkflowError> {
        let parent = ledger.parent;
        let task = ledger
            .graph
            .tasks()
            .iter()
            .find(|t| t.open_pr == Some(pr))
            .map(|t| (t.id, t.status, t.fix_iterations, t.escalated))
            .ok_or(WorkflowError::UnknownPullRequest { parent, pr })?;
        let (id, status, iterations, escalated) = task;

        match (status, outcome) {
            (TaskStatus::InReview, ReviewOutcome::ReadyToMerge) => Ok(false),
            // Already moved back by this verdict.
            (TaskStatus::InProgress, _) => Ok(false),
            // Already handed over; replays stay silent.
            (TaskStatus::InReview, ReviewOutcome::NeedFix) if escalated => Ok(false),
            (TaskStatus::InReview, ReviewOutcome::NeedFix) => {
                if let Some(max) = self.max_fix_iterations {
                    if iterations >= max {
                        warn!(task = %id, pr = %pr, iterations, max, "need-fix cap reached; escalating");
                        let Some(t) = ledger.graph.task_mut(id) else {
                            return Err(WorkflowError::UnknownTask { parent, task: id });
                        };
                        t.escalated = true;
                        intents.push(Intent::Comment {
                            target: Target::PullRequest(pr),
                            body: format!(
                                "Task {id} still needs fixes after {iterations} automated iterations \
                                 (limit {max}). Handing over for manual follow-up."
                            ),
                        });
                        return Ok(true);
                    }
                }
                let Some(t) = ledger.graph.task_mut(id) else {
                    return Err(WorkflowError::UnknownTask { parent, task: id });
                };
                t.fix_iterations += 1;
                t.status = TaskStatus::InProgress;
                info!(task = %id, pr = %pr, iteration = t.fix_iterations, "need-fix iteration");
                intents.push(Intent::MirrorStatus {
                    target: Target::Task(id),
                    status: TaskStatus::InProgress,
                });
                intents.push(Intent::RemoveLabel {
                    target: Target::Task(id),
                    label: labels::IMPLEMENT.into(),
                });
                intents.push(Intent::AddLabel {
                    target: Target::Task(id),
                    label: labels::IMPLEMENT.into(),
                });
                Ok(true)
            }
            (from, _) => Err(WorkflowError::InvalidTransition {
                task: id,
                from,
                event: "review_completed",
            }),
        }
    }
}

fn ingest(ledger: &mut TaskLedger, intents: &mut Vec<Intent>) -> bool {
    if ledger.graph.tasks().iter().any(|t| t.status != TaskStatus::Backlog) {
        return false;
    }
    for task in ledger.graph.tasks() {
        intents.push(Intent::MirrorStatus {
            target: Target::Task(task.id),
            status: TaskStatus::Backlog,
        });
    }
    intents.push(Intent::MirrorStatus {
        target: Target::Parent,
        status: TaskStatus::InProgress,
    });
    advance(ledger, intents);
    true
}

fn start(ledger: &mut TaskLedger, id: TaskId, intents: &mut Vec<Intent>) -> Result<bool, WorkflowError> {
    let parent = ledger.parent;
    let task = ledger
        .graph
        .task(id)
        .ok_or(WorkflowError::UnknownTask { parent, task: id })?;
    match task.status {
        TaskStatus::InProgress => return Ok(false),
        TaskStatus::Backlog => {}
        from => {
            return Err(WorkflowError::InvalidTransition {
                task: id,
                from,
                event: "start_requested",
            })
        }
    }
    if let Some(other) = ledger.graph.in_flight() {
        return Err(WorkflowError::TaskInFlight {
            task: id,
            in_flight: other.id,
            pr: other.open_pr,
        });
    }
    if !ledger.graph.is_unblocked(id) {
        let waiting_on = task
            .depends_on
            .iter()
            .copied()
            .filter(|d| ledger.graph.task(*d).is_some_and(|t| t.status != TaskStatus::Done))
            .collect();
        return Err(WorkflowError::Blocked { task: id, waiting_on });
    }

    set_status(ledger, id, TaskStatus::InProgress, intents);
    Ok(true)
}

fn opened(
    ledger: &mut TaskLedger,
    id: TaskId,
    pr: PullRequestId,
    intents: &mut Vec<Intent>,
) -> Result<bool, WorkflowError> {
    let parent = ledger.parent;
    let Some(task) = ledger.graph.task_mut(id) else {
        return Err(WorkflowError::UnknownTask { parent, task: id });
    };
    match task.status {
        TaskStatus::InReview if task.open_pr == Some(pr) => Ok(false),
        TaskStatus::InProgress => {
            task.open_pr = Some(pr);
            set_status(ledger, id, TaskStatus::InReview, intents);
            Ok(true)
        }
        from => Err(WorkflowError::InvalidTransition {
            task: id,
            from,
            event: "pull_request_opened",
        }),
    }
}

fn merged(
    ledger: &mut TaskLedger,
    pr: PullRequestId,
    closes: &[SubWorkItemId],
    intents: &mut Vec<Intent>,
) -> Result<bool, WorkflowError> {
    let linked: Vec<TaskId> = ledger
        .graph
        .tasks()
        .iter()
        .filter(|t| t.open_pr == Some(pr) || t.issue.is_some_and(|i| closes.contains(&i)))
        .map(|t| t.id)
        .collect();
    let id = match linked.as_slice() {
        [] => {
            return Err(WorkflowError::UnknownPullRequest {
                parent: ledger.parent,
                pr,
            })
        }
        [one] => *one,
        many => {
            return Err(WorkflowError::AmbiguousMerge {
                pr,
                linked: many.len(),
            })
        }
    };

    let Some(task) = ledger.graph.task_mut(id) else {
        return Err(WorkflowError::UnknownTask {
            parent: ledger.parent,
            task: id,
        });
    };
    match task.status {
        TaskStatus::Done => Ok(false),
        TaskStatus::InProgress | TaskStatus::InReview => {
            task.open_pr = Some(pr);
            set_status(ledger, id, TaskStatus::Done, intents);
            info!(task = %id, pr = %pr, "task done");
            advance(ledger, intents);
            Ok(true)
        }
        from => Err(WorkflowError::InvalidTransition {
            task: id,
            from,
            event: "pull_request_merged",
        }),
    }
}

fn closed(ledger: &mut TaskLedger, pr: PullRequestId, intents: &mut Vec<Intent>) -> bool {
    let Some(task) = ledger.graph.tasks().iter().find(|t| {
        t.open_pr == Some(pr) && matches!(t.status, TaskStatus::InProgress | TaskStatus::InReview)
    }) else {
        return false;
    };
    let id = task.id;
    if let Some(t) = ledger.graph.task_mut(id) {
        t.open_pr = None;
    }
    set_status(ledger, id, TaskStatus::Backlog, intents);
    intents.push(Intent::RemoveLabel {
        target: Target::Task(id),
        label: labels::IMPLEMENT.into(),
    });
    info!(task = %id, pr = %pr, "pull request closed unmerged; task returned to backlog");
    true
}

/// Starts the next unblocked task, or completes the parent when every task
/// is done. Does nothing while a task is in flight.
fn advance(ledger: &mut TaskLedger, intents: &mut Vec<Intent>) {
    if ledger.graph.in_flight().is_some() {
        return;
    }
    if let Some(next) = ledger.graph.next_unblocked() {
        set_status(ledger, next, TaskStatus::InProgress, intents);
        intents.push(Intent::AddLabel {
            target: Target::Task(next),
            label: labels::IMPLEMENT.into(),
        });
        info!(task = %next, "next task started");
    } else if ledger.graph.all_done() {
        intents.push(Intent::MirrorStatus {
            target: Target::Parent,
            status: TaskStatus::Done,
        });
        intents.push(Intent::Comment {
            target: Target::Parent,
            body: format!("All {} tasks are done.", ledger.graph.len()),
        });
    }
}

fn set_status(ledger: &mut TaskLedger, id: TaskId, status: TaskStatus, intents: &mut Vec<Intent>) {
    if let Some(task) = ledger.graph.task_mut(id) {
        task.status = status;
        intents.push(Intent::MirrorStatus {
            target: Target::Task(id),
            status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::two_task_graph;
    use crate::types::Timestamp;

    fn id(n: u32) -> TaskId {
        TaskId::new(n).unwrap()
    }

    fn ledger() -> TaskLedger {
        let mut graph = two_task_graph();
        graph.set_issue(id(1), SubWorkItemId::new(11));
        graph.set_issue(id(2), SubWorkItemId::new(12));
        TaskLedger::new(WorkItemId::new(10), graph, Timestamp::now())
    }

    fn machine() -> WorkflowMachine {
        WorkflowMachine::new(&WorkflowSettings::default())
    }

    fn status(ledger: &TaskLedger, n: u32) -> TaskStatus {
        ledger.graph.task(id(n)).unwrap().status
    }

    fn run(ledger: &TaskLedger, events: &[WorkflowEvent]) -> TaskLedger {
        events.iter().fold(ledger.clone(), |l, e| machine().apply(&l, e).unwrap().ledger)
    }

    const PR: PullRequestId = PullRequestId::new(20);

    #[test]
    fn ingestion_starts_exactly_the_first_task() {
        let t = machine().apply(&ledger(), &WorkflowEvent::PlanIngested).unwrap();
        assert_eq!(status(&t.ledger, 1), TaskStatus::InProgress);
        assert_eq!(status(&t.ledger, 2), TaskStatus::Backlog);
        assert!(t.intents.contains(&Intent::AddLabel {
            target: Target::Task(id(1)),
            label: labels::IMPLEMENT.into()
        }));
        assert!(!t.intents.contains(&Intent::AddLabel {
            target: Target::Task(id(2)),
            label: labels::IMPLEMENT.into()
        }));
    }

    #[test]
    fn merging_a_unblocks_b_and_starts_only_b() {
        let before = run(
            &ledger(),
            &[
                WorkflowEvent::PlanIngested,
                WorkflowEvent::PullRequestOpened { task: id(1), pr: PR },
            ],
        );
        let t = machine()
            .apply(
                &before,
                &WorkflowEvent::PullRequestMerged {
                    pr: PR,
                    closes: vec![SubWorkItemId::new(11)],
                },
            )
            .unwrap();

        assert_eq!(status(&t.ledger, 1), TaskStatus::Done);
        assert_eq!(status(&t.ledger, 2), TaskStatus::InProgress);
        let started: Vec<_> = t
            .intents
            .iter()
            .filter(|i| matches!(i, Intent::AddLabel { label, .. } if label == labels::IMPLEMENT))
            .collect();
        assert_eq!(started.len(), 1);
    }

    #[test]
    fn replaying_events_is_idempotent() {
        let events = [
            WorkflowEvent::PlanIngested,
            WorkflowEvent::StartRequested { task: id(1) },
            WorkflowEvent::PullRequestOpened { task: id(1), pr: PR },
            WorkflowEvent::ReviewCompleted {
                pr: PR,
                outcome: ReviewOutcome::NeedFix,
            },
            WorkflowEvent::PullRequestOpened { task: id(1), pr: PR },
            WorkflowEvent::PullRequestMerged { pr: PR, closes: vec![] },
            WorkflowEvent::PullRequestClosed { pr: PR },
            WorkflowEvent::ParentClosed,
        ];
        let mut current = ledger();
        for event in &events {
            let once = machine().apply(&current, event).unwrap();
            let twice = machine().apply(&once.ledger, event).unwrap();
            assert_eq!(twice.ledger, once.ledger, "{}", event.name());
            assert!(!twice.changed, "{}", event.name());
            current = once.ledger;
        }
    }

    #[test]
    fn need_fix_loop_counts_iterations_and_retriggers() {
        let in_review = run(
            &ledger(),
            &[
                WorkflowEvent::PlanIngested,
                WorkflowEvent::PullRequestOpened { task: id(1), pr: PR },
            ],
        );
        let t = machine()
            .apply(
                &in_review,
                &WorkflowEvent::ReviewCompleted {
                    pr: PR,
                    outcome: ReviewOutcome::NeedFix,
                },
            )
            .unwrap();
        let task = t.ledger.graph.task(id(1)).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.fix_iterations, 1);
        assert_eq!(task.open_pr, Some(PR));
        assert!(t.intents.contains(&Intent::AddLabel {
            target: Target::Task(id(1)),
            label: labels::IMPLEMENT.into()
        }));
    }

    #[test]
    fn capped_need_fix_escalates_and_stays_in_review() {
        let capped = WorkflowMachine::new(&WorkflowSettings {
            max_fix_iterations: Some(1),
        });
        let need_fix = WorkflowEvent::ReviewCompleted {
            pr: PR,
            outcome: ReviewOutcome::NeedFix,
        };
        let opened = WorkflowEvent::PullRequestOpened { task: id(1), pr: PR };
        let mut l = run(&ledger(), &[WorkflowEvent::PlanIngested, opened.clone()]);
        l = capped.apply(&l, &need_fix).unwrap().ledger;
        l = capped.apply(&l, &opened).unwrap().ledger;

        let t = capped.apply(&l, &need_fix).unwrap();

        assert_eq!(status(&t.ledger, 1), TaskStatus::InReview);
        assert!(t.changed);
        assert!(t.ledger.graph.task(id(1)).unwrap().escalated);
        assert!(matches!(t.intents.as_slice(), [Intent::Comment { .. }]));

        // The same verdict again posts nothing new.
        let replay = capped.apply(&t.ledger, &need_fix).unwrap();
        assert!(!replay.changed);
        assert!(replay.intents.is_empty());
        assert_eq!(replay.ledger, t.ledger);
    }

    #[test]
    fn one_task_in_flight_at_a_time() {
        let l = run(&ledger(), &[WorkflowEvent::PlanIngested]);
        let mut rewound = l.clone();
        rewound.graph.task_mut(id(1)).unwrap().status = TaskStatus::Backlog;

        let err = machine()
            .apply(&rewound, &WorkflowEvent::StartRequested { task: id(2) })
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Blocked { .. }), "{err}");

        let mut parallel = l.clone();
        parallel.graph.task_mut(id(1)).unwrap().depends_on.clear();
        parallel.graph.task_mut(id(2)).unwrap().depends_on.clear();
        let err = machine()
            .apply(&parallel, &WorkflowEvent::StartRequested { task: id(2) })
            .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::TaskInFlight {
                task: id(2),
                in_flight: id(1),
                pr: None
            }
        );
    }

    #[test]
    fn merge_linked_to_two_tasks_is_ambiguous() {
        let l = run(&ledger(), &[WorkflowEvent::PlanIngested]);
        let err = machine()
            .apply(
                &l,
                &WorkflowEvent::PullRequestMerged {
                    pr: PR,
                    closes: vec![SubWorkItemId::new(11), SubWorkItemId::new(12)],
                },
            )
            .unwrap_err();
        assert_eq!(err, WorkflowError::AmbiguousMerge { pr: PR, linked: 2 });
    }

    #[test]
    fn closing_unmerged_returns_task_to_backlog() {
        let l = run(
            &ledger(),
            &[
                WorkflowEvent::PlanIngested,
                WorkflowEvent::PullRequestOpened { task: id(1), pr: PR },
                WorkflowEvent::PullRequestClosed { pr: PR },
            ],
        );
        let task = l.graph.task(id(1)).unwrap();
        assert_eq!(task.status, TaskStatus::Backlog);
        assert_eq!(task.open_pr, None);

        let restarted = machine()
            .apply(&l, &WorkflowEvent::StartRequested { task: id(1) })
            .unwrap();
        assert_eq!(status(&restarted.ledger, 1), TaskStatus::InProgress);
    }

    #[test]
    fn last_merge_completes_the_parent() {
        let pr2 = PullRequestId::new(21);
        let l = run(
            &ledger(),
            &[
                WorkflowEvent::PlanIngested,
                WorkflowEvent::PullRequestOpened { task: id(1), pr: PR },
                WorkflowEvent::PullRequestMerged { pr: PR, closes: vec![] },
                WorkflowEvent::PullRequestOpened { task: id(2), pr: pr2 },
            ],
        );
        let t = machine()
            .apply(&l, &WorkflowEvent::PullRequestMerged { pr: pr2, closes: vec![] })
            .unwrap();
        assert!(t.ledger.graph.all_done());
        assert!(t.intents.contains(&Intent::MirrorStatus {
            target: Target::Parent,
            status: TaskStatus::Done
        }));
    }

    #[test]
    fn archived_ledger_rejects_events() {
        let l = run(&ledger(), &[WorkflowEvent::ParentClosed]);
        assert!(l.archived);
        assert!(matches!(
            machine().apply(&l, &WorkflowEvent::PlanIngested),
            Err(WorkflowError::Archived { .. })
        ));
    }

    #[test]
    fn freshness_requires_open_and_same_head() {
        let token = FreshnessToken {
            state: PullRequestState::Open,
            head_sha: CommitSha::new("a".repeat(40)).unwrap(),
        };
        assert!(token.is_current(&token.clone()));
        let pushed = FreshnessToken {
            head_sha: CommitSha::new("b".repeat(40)).unwrap(),
            ..token.clone()
        };
        assert!(!token.is_current(&pushed));
        let closed = FreshnessToken {
            state: PullRequestState::Closed,
            ..token.clone()
        };
        assert!(!closed.is_current(&closed.clone()));
    }
}
