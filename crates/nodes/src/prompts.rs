//! Prompt rendering for the agent nodes.

use minijinja::{context, Environment};
use pipeline::config::PlanningSettings;
use pipeline::graph::Task;
use pipeline::ports::{Issue, PullRequest};
use pipeline::review::ReviewPolicy;
use pipeline::{ContentHash, RepoPath, TaskwrightError};
use serde::Serialize;

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const DIFF_TEMPLATE: &str = include_str!("prompts/diff.md");
const FULL_FILE_TEMPLATE: &str = include_str!("prompts/full_file.md");
const REVIEW_TEMPLATE: &str = include_str!("prompts/review.md");

pub const PLANNER_SYSTEM: &str = "You are a senior engineer who breaks issues into small, ordered, independently deliverable tasks.";
pub const DEVELOPER_SYSTEM: &str = "You are a careful software engineer. You change only what the task requires.";
pub const REVIEWER_SYSTEM: &str = "You are a strict but fair code reviewer. You report concrete, actionable findings.";

/// Diffs longer than this are cut before being sent for review.
const MAX_REVIEW_DIFF_CHARS: usize = 60_000;

#[derive(Debug, Clone, Serialize)]
struct TaskView<'a> {
    id: String,
    title: &'a str,
    description: &'a str,
    acceptance: &'a [String],
}

impl<'a> From<&'a Task> for TaskView<'a> {
    fn from(task: &'a Task) -> Self {
        Self {
            id: task.id.to_string(),
            title: &task.title,
            description: &task.description,
            acceptance: &task.acceptance,
        }
    }
}

/// A file shown to the model as context.
#[derive(Debug, Clone, Serialize)]
pub struct FileView {
    pub path: String,
    pub content: String,
}

pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("plan", PLAN_TEMPLATE)
            .expect("plan template should be valid");
        env.add_template("diff", DIFF_TEMPLATE)
            .expect("diff template should be valid");
        env.add_template("full_file", FULL_FILE_TEMPLATE)
            .expect("full_file template should be valid");
        env.add_template("review", REVIEW_TEMPLATE)
            .expect("review template should be valid");
        Self { env }
    }

    pub fn plan(
        &self,
        issue: &Issue,
        planning: &PlanningSettings,
        feedback: Option<&str>,
    ) -> Result<String, TaskwrightError> {
        self.render(
            "plan",
            context! {
                issue => issue,
                bounds => context! { low => planning.low, medium => planning.medium, high => planning.high },
                min_words => planning.min_description_words,
                feedback => feedback,
            },
        )
    }

    pub fn diff(&self, task: &Task, files: &[FileView], review: Option<&str>) -> Result<String, TaskwrightError> {
        self.render(
            "diff",
            context! {
                task => TaskView::from(task),
                files => files,
                review => review,
            },
        )
    }

    pub fn full_file(
        &self,
        task: &Task,
        path: &RepoPath,
        content: &str,
        reason: &str,
    ) -> Result<String, TaskwrightError> {
        self.render(
            "full_file",
            context! {
                task => TaskView::from(task),
                path => path.as_str(),
                hash => ContentHash::of(content).as_str(),
                content => content,
                reason => reason,
            },
        )
    }

    pub fn review(
        &self,
        policy: ReviewPolicy,
        task: Option<&Task>,
        pr: &PullRequest,
        diff: &str,
    ) -> Result<String, TaskwrightError> {
        let truncated = diff.chars().count() > MAX_REVIEW_DIFF_CHARS;
        let diff: String = diff.chars().take(MAX_REVIEW_DIFF_CHARS).collect();
        self.render(
            "review",
            context! {
                policy => policy.as_str(),
                task => task.map(TaskView::from),
                pr => context! { number => pr.number.to_string(), title => &pr.title },
                diff => diff,
                truncated => truncated,
            },
        )
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String, TaskwrightError> {
        self.env
            .get_template(name)
            .and_then(|t| t.render(ctx))
            .map_err(|e| TaskwrightError::PipelineHalt {
                reason: format!("prompt '{name}' failed to render: {e}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use pipeline::ports::IssueState;

    use super::*;

    #[test]
    fn plan_prompt_carries_issue_and_feedback() {
        let issue = Issue {
            number: 10,
            title: "Calculator".into(),
            body: "Add arithmetic operations.".into(),
            labels: vec![],
            state: IssueState::Open,
        };
        let engine = PromptEngine::new();

        let first = engine.plan(&issue, &PlanningSettings::default(), None).unwrap();
        assert!(first.contains("Issue #10: Calculator"));
        assert!(!first.contains("previous plan was rejected"));

        let retry = engine
            .plan(&issue, &PlanningSettings::default(), Some("Dependency cycle among tasks T1, T2"))
            .unwrap();
        assert!(retry.contains("Dependency cycle among tasks T1, T2"));
    }
}
