//! Task Graph Builder: turns a planning payload into a validated task DAG.
//!
//! Tasks live in an arena (`Vec<Task>`) and refer to each other by
//! [`TaskId`], which is the 1-based declared position. Validation rejects a
//! plan wholesale; the Analyzer node asks the model to regenerate with the
//! error message as feedback, up to `planning.max_regenerations` times.
//!
//! Checks, in order:
//!
//! 1. payload shape (one JSON object, every task has title and description)
//! 2. task count within the bounds for the declared complexity
//! 3. granularity: descriptions of at least `min_description_words` words,
//!    at least one acceptance criterion, no duplicate titles or ids
//! 4. every `depends_on` reference resolves (by id, then exact title)
//! 5. the dependency relation is acyclic
//! 6. no task depends on a task of a later category
//!    (setup < implementation < tests < docs)
//! 7. artifacts named in acceptance criteria are produced by the task itself
//!    or one of its ancestors

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::PlanningSettings;
use crate::errors::ErrorKind;
use crate::glob::PathGlob;
use crate::identifiers::{LabelName, PullRequestId, SubWorkItemId, TaskId};
use crate::payload::parse_json;
use crate::review::ReviewPolicy;
use crate::types::{Estimate, Severity};
use crate::workflow::TaskStatus;

static ARTIFACT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[A-Za-z0-9_.\-]+/)*[A-Za-z0-9_\-]{2,}\.[A-Za-z][A-Za-z0-9]{0,5}\b")
        .expect("static regex")
});

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("Plan payload rejected: {reason}")]
    MalformedPlan { reason: String },

    #[error("Plan has {count} tasks; {complexity} complexity allows {min} to {max}")]
    CountOutOfBounds {
        count: usize,
        complexity: Complexity,
        min: usize,
        max: usize,
    },

    #[error("Task {task} is too granular: {reason}")]
    TooGranular { task: TaskId, reason: String },

    #[error("Two tasks share the title '{title}'")]
    DuplicateTitle { title: String },

    #[error("Tasks {first} and {second} share the id '{id}'")]
    DuplicateId { id: String, first: TaskId, second: TaskId },

    #[error("Task {task} depends on '{reference}', which matches no task id or title")]
    UnresolvedDependency { task: TaskId, reference: String },

    #[error("Dependency cycle among tasks {}", join_ids(.tasks))]
    Cycle { tasks: Vec<TaskId> },

    #[error("Task {task} ({category}) depends on {dependency} ({dependency_category}), which must come later")]
    OrderingViolation {
        task: TaskId,
        category: TaskCategory,
        dependency: TaskId,
        dependency_category: TaskCategory,
    },

    #[error("Task {task} expects '{artifact}', which only {producer} produces and {producer} is not one of its dependencies")]
    DependencyGap {
        task: TaskId,
        artifact: String,
        producer: TaskId,
    },
}

impl GraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cycle { .. } => ErrorKind::GraphCycle,
            Self::UnresolvedDependency { .. } | Self::DependencyGap { .. } => ErrorKind::DependencyGap,
            Self::MalformedPlan { .. }
            | Self::CountOutOfBounds { .. }
            | Self::TooGranular { .. }
            | Self::DuplicateTitle { .. }
            | Self::DuplicateId { .. }
            | Self::OrderingViolation { .. } => ErrorKind::ValidationFailed,
        }
    }
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Declared size of the parent issue; selects the task-count bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

/// Ordering class of a task. Dependencies may only point at the same or an
/// earlier category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskCategory {
    Setup,
    Implementation,
    Tests,
    Docs,
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Setup => "setup",
            Self::Implementation => "implementation",
            Self::Tests => "tests",
            Self::Docs => "docs",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sprint {
    pub name: String,
    #[serde(default)]
    pub goal: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub labels: BTreeSet<LabelName>,
    pub severity: Severity,
    pub estimate: Estimate,
    pub sprint: Option<String>,
    pub paths: Vec<PathGlob>,
    pub depends_on: Vec<TaskId>,
    pub acceptance: Vec<String>,
    pub status: TaskStatus,
    /// Sub-issue tracking this task, once created.
    #[serde(default)]
    pub issue: Option<SubWorkItemId>,
    /// Pull request currently implementing this task.
    #[serde(default)]
    pub open_pr: Option<PullRequestId>,
    /// Completed need-fix iterations.
    #[serde(default)]
    pub fix_iterations: u32,
    /// Set once the need-fix cap was reached and handed over.
    #[serde(default)]
    pub escalated: bool,
}

impl Task {
    /// Category from labels first, then from the globs in `paths`.
    pub fn category(&self) -> TaskCategory {
        let from_labels = self.labels.iter().find_map(|l| match l.as_str().to_ascii_lowercase().as_str() {
            "setup" | "config" | "configuration" | "infra" | "chore" => Some(TaskCategory::Setup),
            "test" | "tests" | "testing" => Some(TaskCategory::Tests),
            "docs" | "doc" | "documentation" => Some(TaskCategory::Docs),
            "feature" | "implementation" | "enhancement" | "bug" | "refactor" => {
                Some(TaskCategory::Implementation)
            }
            _ => None,
        });
        if let Some(category) = from_labels {
            return category;
        }

        let mut categories = self.paths.iter().map(|g| path_category(g.as_str()));
        match categories.next() {
            Some(first) if categories.all(|c| c == first) => first,
            _ => TaskCategory::Implementation,
        }
    }

    pub fn produces(&self, path: &str) -> bool {
        self.paths.iter().any(|g| g.matches_str(path))
    }
}

fn path_category(pattern: &str) -> TaskCategory {
    let lower = pattern.to_ascii_lowercase();
    let file = lower.rsplit('/').next().unwrap_or(&lower);
    if lower.starts_with("docs/") || file.ends_with(".md") || file.ends_with(".rst") {
        TaskCategory::Docs
    } else if lower.starts_with("tests/")
        || lower.contains("/tests/")
        || file.starts_with("test_")
        || file.contains("_test.")
        || file.contains(".test.")
        || file.contains(".spec.")
    {
        TaskCategory::Tests
    } else if matches!(
        file,
        "cargo.toml" | "package.json" | "pyproject.toml" | "setup.py" | "setup.cfg" | "go.mod" | "makefile"
    ) || file.starts_with("requirements")
        || [".toml", ".yaml", ".yml", ".ini", ".cfg"].iter().any(|e| file.ends_with(e))
    {
        TaskCategory::Setup
    } else {
        TaskCategory::Implementation
    }
}

/// A validated task DAG for one parent issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskGraph {
    pub policy: ReviewPolicy,
    pub complexity: Complexity,
    pub sprints: Vec<Sprint>,
    tasks: Vec<Task>,
}

impl TaskGraph {
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id.index())
    }

    pub(crate) fn task_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id.index())
    }

    /// Records the sub-issue created for `id`.
    pub fn set_issue(&mut self, id: TaskId, issue: SubWorkItemId) {
        if let Some(task) = self.task_mut(id) {
            task.issue = Some(issue);
        }
    }

    pub fn task_for_issue(&self, issue: SubWorkItemId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.issue == Some(issue))
    }

    /// The task currently in progress or in review, if any.
    pub fn in_flight(&self) -> Option<&Task> {
        self.tasks
            .iter()
            .find(|t| matches!(t.status, TaskStatus::InProgress | TaskStatus::InReview))
    }

    pub fn all_done(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Done)
    }

    pub fn is_unblocked(&self, id: TaskId) -> bool {
        self.task(id).is_some_and(|t| {
            t.depends_on
                .iter()
                .all(|d| self.task(*d).is_some_and(|dep| dep.status == TaskStatus::Done))
        })
    }

    /// Lowest-id Backlog task whose dependencies are all Done.
    pub fn next_unblocked(&self) -> Option<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Backlog)
            .map(|t| t.id)
            .find(|id| self.is_unblocked(*id))
    }

    /// Transitive dependencies of `id`.
    pub fn ancestors(&self, id: TaskId) -> BTreeSet<TaskId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<TaskId> = self.task(id).map(|t| t.depends_on.clone()).unwrap_or_default();
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                if let Some(t) = self.task(next) {
                    stack.extend(t.depends_on.iter().copied());
                }
            }
        }
        seen
    }

    /// Kahn's algorithm; ready tasks are taken by category, then id.
    pub fn topological_order(&self) -> Result<Vec<TaskId>, GraphError> {
        let mut in_degree: Vec<usize> = self.tasks.iter().map(|t| t.depends_on.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.tasks.len()];
        for task in &self.tasks {
            for dep in &task.depends_on {
                dependents[dep.index()].push(task.id.index());
            }
        }

        let mut ready: BTreeSet<(TaskCategory, TaskId)> = self
            .tasks
            .iter()
            .filter(|t| t.depends_on.is_empty())
            .map(|t| (t.category(), t.id))
            .collect();
        let mut order = Vec::with_capacity(self.tasks.len());
        while let Some(entry) = ready.pop_first() {
            let (_, id) = entry;
            order.push(id);
            for &dependent in &dependents[id.index()] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    let t = &self.tasks[dependent];
                    ready.insert((t.category(), t.id));
                }
            }
        }

        if order.len() == self.tasks.len() {
            Ok(order)
        } else {
            let tasks = self
                .tasks
                .iter()
                .filter(|t| in_degree[t.id.index()] > 0)
                .map(|t| t.id)
                .collect();
            Err(GraphError::Cycle { tasks })
        }
    }

    fn check_ordering(&self) -> Result<(), GraphError> {
        for task in &self.tasks {
            let category = task.category();
            for dep in &task.depends_on {
                let dependency_category = self.tasks[dep.index()].category();
                if dependency_category > category {
                    return Err(GraphError::OrderingViolation {
                        task: task.id,
                        category,
                        dependency: *dep,
                        dependency_category,
                    });
                }
            }
        }
        Ok(())
    }

    fn check_artifacts(&self) -> Result<(), GraphError> {
        for task in &self.tasks {
            let ancestors = self.ancestors(task.id);
            for criterion in &task.acceptance {
                for artifact in ARTIFACT.find_iter(criterion).map(|m| m.as_str()) {
                    if task.produces(artifact) {
                        continue;
                    }
                    let producers: Vec<TaskId> = self
                        .tasks
                        .iter()
                        .filter(|t| t.id != task.id && t.produces(artifact))
                        .map(|t| t.id)
                        .collect();
                    if let Some(first) = producers.first() {
                        if !producers.iter().any(|p| ancestors.contains(p)) {
                            return Err(GraphError::DependencyGap {
                                task: task.id,
                                artifact: artifact.to_string(),
                                producer: *first,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRef {
    Number(u64),
    Text(String),
}

impl RawRef {
    fn key(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.trim().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    policy: Option<ReviewPolicy>,
    #[serde(default)]
    complexity: Complexity,
    #[serde(default)]
    sprints: Vec<Sprint>,
    tasks: Vec<RawTask>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    #[serde(default)]
    id: Option<RawRef>,
    title: String,
    description: String,
    #[serde(default)]
    acceptance: Vec<String>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    estimate: Option<String>,
    #[serde(default)]
    estimated_hours: Option<u32>,
    #[serde(default)]
    sprint: Option<String>,
    #[serde(default)]
    depends_on: Vec<RawRef>,
    #[serde(default)]
    paths: Vec<String>,
}

/// Builds and validates task graphs from model responses.
pub struct TaskGraphBuilder<'a> {
    settings: &'a PlanningSettings,
}

impl<'a> TaskGraphBuilder<'a> {
    pub fn new(settings: &'a PlanningSettings) -> Self {
        Self { settings }
    }

    /// Parses the plan in `response` and validates it. `default_policy`
    /// applies when the plan does not name one.
    pub fn build(&self, response: &str, default_policy: ReviewPolicy) -> Result<TaskGraph, GraphError> {
        let raw: RawPlan = parse_json(response).map_err(|reason| GraphError::MalformedPlan { reason })?;
        let graph = self.assemble(raw, default_policy)?;
        self.validate(&graph)?;
        debug!(tasks = graph.len(), complexity = %graph.complexity, "plan accepted");
        Ok(graph)
    }

    /// Runs checks 2 through 7 on an assembled graph.
    pub fn validate(&self, graph: &TaskGraph) -> Result<(), GraphError> {
        let bounds = self.settings.bounds_for(graph.complexity);
        if !bounds.contains(graph.len()) {
            return Err(GraphError::CountOutOfBounds {
                count: graph.len(),
                complexity: graph.complexity,
                min: bounds.min,
                max: bounds.max,
            });
        }

        let mut titles = BTreeSet::new();
        for task in graph.tasks() {
            let words = task.description.split_whitespace().count();
            if words < self.settings.min_description_words {
                return Err(GraphError::TooGranular {
                    task: task.id,
                    reason: format!(
                        "description has {words} words; at least {} are required",
                        self.settings.min_description_words
                    ),
                });
            }
            if task.acceptance.is_empty() {
                return Err(GraphError::TooGranular {
                    task: task.id,
                    reason: "no acceptance criteria".into(),
                });
            }
            if !titles.insert(task.title.to_lowercase()) {
                return Err(GraphError::DuplicateTitle {
                    title: task.title.clone(),
                });
            }
        }

        graph.topological_order()?;
        graph.check_ordering()?;
        graph.check_artifacts()
    }

    fn assemble(&self, raw: RawPlan, default_policy: ReviewPolicy) -> Result<TaskGraph, GraphError> {
        let mut by_id: BTreeMap<String, TaskId> = BTreeMap::new();
        let mut by_title: BTreeMap<String, TaskId> = BTreeMap::new();
        for (index, task) in raw.tasks.iter().enumerate() {
            let id = TaskId::from_index(index);
            if task.title.trim().is_empty() {
                return Err(GraphError::MalformedPlan {
                    reason: format!("task {id} has an empty title"),
                });
            }
            if let Some(raw_id) = &task.id {
                if let Some(first) = by_id.insert(raw_id.key(), id) {
                    return Err(GraphError::DuplicateId {
                        id: raw_id.key(),
                        first,
                        second: id,
                    });
                }
            }
            by_title.entry(task.title.trim().to_string()).or_insert(id);
        }
        let resolve = |reference: &RawRef| -> Option<TaskId> {
            let key = reference.key();
            by_id
                .get(&key)
                .or_else(|| by_title.get(&key))
                .copied()
                .or_else(|| {
                    let n: u32 = key.trim_start_matches(['T', 't']).parse().ok()?;
                    TaskId::new(n).filter(|id| id.index() < raw.tasks.len())
                })
        };

        let mut tasks = Vec::with_capacity(raw.tasks.len());
        for (index, rt) in raw.tasks.iter().enumerate() {
            let id = TaskId::from_index(index);
            let mut depends_on = Vec::new();
            for reference in &rt.depends_on {
                let dep = resolve(reference).ok_or_else(|| GraphError::UnresolvedDependency {
                    task: id,
                    reference: reference.key(),
                })?;
                if !depends_on.contains(&dep) {
                    depends_on.push(dep);
                }
            }
            let paths = rt
                .paths
                .iter()
                .map(|p| PathGlob::new(p))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|reason| GraphError::MalformedPlan {
                    reason: format!("task {id}: {reason}"),
                })?;
            let estimate = rt
                .estimate
                .as_deref()
                .and_then(Estimate::from_tag)
                .or_else(|| rt.estimated_hours.map(Estimate::from_hours))
                .unwrap_or(Estimate::M);
            tasks.push(Task {
                id,
                title: rt.title.trim().to_string(),
                description: rt.description.trim().to_string(),
                labels: rt.labels.iter().filter_map(|l| LabelName::new(l.trim())).collect(),
                severity: rt
                    .severity
                    .as_deref()
                    .and_then(Severity::from_tag)
                    .unwrap_or(Severity::Important),
                estimate,
                sprint: rt.sprint.clone(),
                paths,
                depends_on,
                acceptance: rt.acceptance.iter().map(|a| a.trim().to_string()).filter(|a| !a.is_empty()).collect(),
                status: TaskStatus::Backlog,
                issue: None,
                open_pr: None,
                fix_iterations: 0,
                escalated: false,
            });
        }

        Ok(TaskGraph {
            policy: raw.policy.unwrap_or(default_policy),
            complexity: raw.complexity,
            sprints: raw.sprints,
            tasks,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const TWO_TASKS: &str = r#"```json
{
  "policy": "essential-only",
  "complexity": "low",
  "tasks": [
    {"id": "A", "title": "Arithmetic module",
     "description": "Implement add, sub, mul and div with a zero check",
     "acceptance": ["calc/ops.py exposes the four operations"],
     "labels": ["feature"], "paths": ["calc/**"]},
    {"id": "B", "title": "Arithmetic tests",
     "description": "Cover every operation including division by zero",
     "acceptance": ["tests/test_ops.py passes"],
     "labels": ["tests"], "depends_on": ["A"], "paths": ["tests/**"]}
  ]
}
```"#;

    pub(crate) fn two_task_graph() -> TaskGraph {
        TaskGraphBuilder::new(&PlanningSettings::default())
            .build(TWO_TASKS, ReviewPolicy::default())
            .unwrap()
    }

    fn id(n: u32) -> TaskId {
        TaskId::new(n).unwrap()
    }

    fn plan(complexity: &str, tasks: &str) -> String {
        format!("{{\"complexity\": \"{complexity}\", \"tasks\": [{tasks}]}}")
    }

    fn task(title: &str, labels: &str, deps: &str, paths: &str, acceptance: &str) -> String {
        format!(
            "{{\"title\": \"{title}\", \"description\": \"a coherent and independently testable unit of work\", \
             \"acceptance\": [\"{acceptance}\"], \"labels\": [{labels}], \"depends_on\": [{deps}], \"paths\": [{paths}]}}"
        )
    }

    fn build(text: &str) -> Result<TaskGraph, GraphError> {
        TaskGraphBuilder::new(&PlanningSettings::default()).build(text, ReviewPolicy::Strict)
    }

    #[test]
    fn valid_plan_resolves_ids_and_titles() {
        let graph = two_task_graph();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.task(id(2)).unwrap().depends_on, vec![id(1)]);
        assert_eq!(graph.policy, ReviewPolicy::EssentialOnly);
        assert_eq!(graph.topological_order().unwrap(), vec![id(1), id(2)]);

        let by_title = plan(
            "low",
            &[
                task("Core", "", "", "", "works"),
                task("Docs", "\"docs\"", "\"Core\"", "", "documented"),
            ]
            .join(","),
        );
        let graph = build(&by_title).unwrap();
        assert_eq!(graph.task(id(2)).unwrap().depends_on, vec![id(1)]);
        assert_eq!(graph.policy, ReviewPolicy::Strict);
    }

    #[test]
    fn cycles_are_rejected() {
        let text = plan(
            "medium",
            &[
                task("One", "", "\"Two\"", "", "ok"),
                task("Two", "", "\"One\"", "", "ok"),
            ]
            .join(","),
        );
        let err = build(&text).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GraphCycle);
        assert_eq!(err, GraphError::Cycle { tasks: vec![id(1), id(2)] });
    }

    #[test]
    fn unknown_dependency_is_a_gap() {
        let text = plan("low", &task("One", "", "\"Nope\"", "", "ok"));
        let err = build(&text).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DependencyGap);
    }

    #[test]
    fn tests_before_implementation_is_an_ordering_violation() {
        let text = plan(
            "low",
            &[
                task("Tests first", "\"tests\"", "", "", "ok"),
                task("Impl", "\"feature\"", "\"Tests first\"", "", "ok"),
            ]
            .join(","),
        );
        assert!(matches!(
            build(&text),
            Err(GraphError::OrderingViolation {
                category: TaskCategory::Implementation,
                dependency_category: TaskCategory::Tests,
                ..
            })
        ));
    }

    #[test]
    fn count_bounds_follow_complexity() {
        let three = [
            task("A", "", "", "", "ok"),
            task("B", "", "", "", "ok"),
            task("C", "", "", "", "ok"),
        ]
        .join(",");
        assert!(matches!(
            build(&plan("low", &three)),
            Err(GraphError::CountOutOfBounds { count: 3, min: 1, max: 2, .. })
        ));
        assert!(build(&plan("medium", &three)).is_ok());
    }

    #[test]
    fn hyper_segmented_tasks_are_rejected() {
        let text = r#"{"complexity": "low", "tasks": [
            {"title": "Rename var", "description": "rename x", "acceptance": ["done"]}]}"#;
        assert!(matches!(build(text), Err(GraphError::TooGranular { .. })));

        let no_acceptance = r#"{"complexity": "low", "tasks": [
            {"title": "Parser", "description": "write the full expression parser with error recovery"}]}"#;
        assert!(matches!(build(no_acceptance), Err(GraphError::TooGranular { .. })));
    }

    #[test]
    fn artifact_from_unrelated_task_is_a_gap() {
        let text = plan(
            "low",
            &[
                task("Ops", "", "", "\"calc/**\"", "calc/ops.py exists"),
                task("Cli", "", "", "\"cli/**\"", "cli/main.py calls calc/ops.py"),
            ]
            .join(","),
        );
        assert_eq!(
            build(&text).unwrap_err(),
            GraphError::DependencyGap {
                task: id(2),
                artifact: "calc/ops.py".into(),
                producer: id(1),
            }
        );
    }

    #[test]
    fn repeated_task_ids_are_rejected() {
        let text = r#"{"complexity": "medium", "tasks": [
            {"id": "A", "title": "Parser", "description": "write the full expression parser with error recovery", "acceptance": ["parses"]},
            {"id": "A", "title": "Printer", "description": "write the pretty printer for every expression form", "acceptance": ["prints"]}]}"#;
        assert_eq!(
            build(text).unwrap_err(),
            GraphError::DuplicateId {
                id: "A".into(),
                first: id(1),
                second: id(2),
            }
        );
    }

    #[test]
    fn malformed_payload_is_rejected_wholesale() {
        assert!(matches!(build("no plan here"), Err(GraphError::MalformedPlan { .. })));
        assert!(matches!(
            build(r#"{"tasks": [{"title": "x"}]}"#),
            Err(GraphError::MalformedPlan { .. })
        ));
    }

    #[test]
    fn next_unblocked_waits_for_dependencies() {
        let mut graph = two_task_graph();
        assert_eq!(graph.next_unblocked(), Some(id(1)));
        graph.task_mut(id(1)).unwrap().status = TaskStatus::InProgress;
        assert_eq!(graph.next_unblocked(), None);
        graph.task_mut(id(1)).unwrap().status = TaskStatus::Done;
        assert_eq!(graph.next_unblocked(), Some(id(2)));
    }

    #[test]
    fn categories_fall_back_to_paths() {
        let text = plan(
            "medium",
            &[
                task("Setup", "", "", "\"pyproject.toml\"", "ok"),
                task("Code", "", "\"Setup\"", "\"src/**\"", "ok"),
                task("Guide", "", "\"Code\"", "\"docs/**\"", "ok"),
            ]
            .join(","),
        );
        let graph = build(&text).unwrap();
        let categories: Vec<_> = graph.tasks().iter().map(Task::category).collect();
        assert_eq!(
            categories,
            vec![TaskCategory::Setup, TaskCategory::Implementation, TaskCategory::Docs]
        );
    }
}
