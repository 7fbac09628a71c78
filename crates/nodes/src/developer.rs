//! Developer node: implements one task on its own branch and opens (or
//! updates) the pull request for it.

use std::collections::BTreeSet;

use pipeline::apply::{ApplyResult, PatchApplier, SourceTree};
use pipeline::graph::Task;
use pipeline::links::{closing_line, parent_line, parent_reference};
use pipeline::patch::{Normalizer, PatchSet};
use pipeline::ports::{Issue, NewPullRequest};
use pipeline::review::ReviewVerdict;
use pipeline::workflow::{TaskStatus, WorkflowEvent};
use pipeline::{BranchName, PullRequestId, RepoPath, SubWorkItemId, TaskwrightError, WorkItemId};
use tracing::{info, instrument, warn};

use crate::context::NodeContext;
use crate::executor::NodeOutcome;
use crate::ledger_store::StoredLedger;
use crate::prompts::{FileView, DEVELOPER_SYSTEM};
use crate::refacing::{FullFileRewriter, RefaceReport};

/// Files shown to the model as context, at most.
const MAX_CONTEXT_FILES: usize = 12;
/// Total context bytes shown to the model, at most.
const MAX_CONTEXT_BYTES: usize = 200_000;

/// How the change reached the working tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeReport {
    pub applied: Option<ApplyResult>,
    pub refaced: Vec<RefaceReport>,
}

impl ChangeReport {
    fn render(&self) -> String {
        let mut out = String::from("### Change summary\n\n");
        if let Some(result) = &self.applied {
            let strategy = result
                .strategy_used
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".into());
            out.push_str(&format!("Diff applied with `{strategy}`.\n"));
            for path in &result.files_changed {
                out.push_str(&format!("- `{path}`\n"));
            }
        }
        for r in &self.refaced {
            out.push_str(&format!("\nRewrote `{}` as a full file ({} proposal(s)).\n", r.path, r.proposals));
            for line in &r.changelog {
                out.push_str(&format!("- {line}\n"));
            }
        }
        out
    }
}

pub struct Developer<'a> {
    ctx: &'a NodeContext,
}

impl<'a> Developer<'a> {
    pub fn new(ctx: &'a NodeContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self), fields(run_id = %self.ctx.run_id))]
    pub async fn run(&self, issue_number: SubWorkItemId) -> Result<NodeOutcome, TaskwrightError> {
        let issue = self.ctx.tracker.get_issue(issue_number.as_u64()).await?;
        let Some(parent) = parent_reference(&issue.body) else {
            return Ok(NodeOutcome::skipped(format!("issue {issue_number} names no parent issue")));
        };
        let store = self.ctx.ledgers();
        let Some(mut stored) = store.load(parent).await? else {
            return Err(TaskwrightError::PipelineHalt {
                reason: format!("parent issue {parent} has no task plan; label it bot:analyze first"),
            });
        };
        let Some(task) = stored.ledger.graph.task_for_issue(issue_number).cloned() else {
            return Ok(NodeOutcome::skipped(format!("issue {issue_number} is not a task of {parent}")));
        };
        if matches!(task.status, TaskStatus::InReview | TaskStatus::Done) {
            return Ok(NodeOutcome::skipped(format!(
                "task {} is {}; nothing to implement",
                task.id,
                task.status.board_name()
            )));
        }

        let transition = self
            .ctx
            .machine()
            .apply(&stored.ledger, &WorkflowEvent::StartRequested { task: task.id })?;
        if transition.changed {
            stored.ledger = transition.ledger;
            store.save(&mut stored).await?;
            self.ctx
                .intents()
                .execute(Some(&stored.ledger), &transition.intents)
                .await?;
        }

        match self.implement(parent, &issue, &task, &mut stored).await {
            Ok(pr) => Ok(NodeOutcome::completed(format!("task {} is in review as {pr}", task.id))),
            Err(e) => {
                warn!(task = %task.id, kind = %e.kind(), error = %e, "implementation failed");
                let body = format!(
                    "Automated implementation of task {} stopped (`{}`):\n\n> {e}\n\n\
                     Re-add the `bot:implement` label to retry.",
                    task.id,
                    e.kind()
                );
                if let Err(comment_err) = self.ctx.tracker.create_comment(issue_number.as_u64(), &body).await {
                    warn!(error = %comment_err, "could not report the failure on the task issue");
                }
                Err(e)
            }
        }
    }

    async fn implement(
        &self,
        parent: WorkItemId,
        issue: &Issue,
        task: &Task,
        stored: &mut StoredLedger,
    ) -> Result<PullRequestId, TaskwrightError> {
        let repo = &self.ctx.settings.repository;
        let branch = branch_name(format!("{}/issue-{}-t{}", repo.branch_prefix, parent.as_u64(), task.id.as_u32()))?;
        let base = branch_name(repo.base_branch.clone())?;
        self.ctx.repo.prepare_branch(&branch, &base)?;

        let files = self.context_files(task)?;
        let feedback = self.review_feedback(task.open_pr).await?;
        let prompt = self.ctx.prompts.diff(task, &files, feedback.as_deref())?;
        let response = self.ctx.llm.complete(DEVELOPER_SYSTEM, &prompt).await?;

        let report = self.apply_response(task, &response, &files).await?;

        let message = format!("{} {}\n\n{}", task.id, task.title, closing_line(issue_ref(issue)));
        let Some(sha) = self.ctx.repo.commit_all(&message)? else {
            return Err(TaskwrightError::PipelineHalt {
                reason: format!("the proposal for task {} left the branch unchanged", task.id),
            });
        };
        self.ctx.repo.push(&branch)?;
        info!(branch = %branch, sha = %sha, "branch pushed");

        let pr = match self.ctx.pulls.find_open_for_branch(&branch).await? {
            Some(existing) => existing.number,
            None => {
                let body = format!(
                    "{}\n{}\n\n{}\n\n{}",
                    closing_line(issue_ref(issue)),
                    parent_line(parent),
                    task.description,
                    report.render()
                );
                self.ctx
                    .pulls
                    .create_pull_request(&NewPullRequest {
                        title: format!("[{}] {}", task.id, task.title),
                        body,
                        head: branch.clone(),
                        base,
                    })
                    .await?
            }
        };

        // Re-read: the ledger may have moved while the model was working.
        if let Some(fresh) = self.ctx.ledgers().load(parent).await? {
            *stored = fresh;
        }
        let transition = self
            .ctx
            .machine()
            .apply(&stored.ledger, &WorkflowEvent::PullRequestOpened { task: task.id, pr })?;
        if transition.changed {
            stored.ledger = transition.ledger;
            self.ctx.ledgers().save(stored).await?;
            self.ctx
                .intents()
                .execute(Some(&stored.ledger), &transition.intents)
                .await?;
        }
        Ok(pr)
    }

    /// Normalizes and applies the diff in `response`; on an unresolvable
    /// conflict, escalates the failing files to full-file rewrites when
    /// configured to.
    async fn apply_response(
        &self,
        task: &Task,
        response: &str,
        shown: &[FileView],
    ) -> Result<ChangeReport, TaskwrightError> {
        let settings = &self.ctx.settings;
        let known: BTreeSet<RepoPath> = self.ctx.tree.list_files()?.into_iter().collect();
        let mut patch = Normalizer::new(&settings.patch).normalize(response, |p| known.contains(p))?;
        for view in shown {
            if let Some(path) = RepoPath::new(view.path.clone()) {
                if patch.files.iter().any(|f| f.path == path) {
                    patch = patch.with_base_snapshot(path, view.content.clone());
                }
            }
        }

        let applier = PatchApplier::new(&settings.patch);
        let source = self.snapshot(&patch)?;
        let err = match applier.apply(&source, &patch) {
            Ok((patched, result)) => {
                self.ctx.tree.commit(&patched.changes_since(&source))?;
                return Ok(ChangeReport {
                    applied: Some(result),
                    refaced: Vec::new(),
                });
            }
            Err(err) => err,
        };

        let failing = err.failing_paths().to_vec();
        if !settings.reface.escalate_on_conflict || !settings.reface.enabled || failing.is_empty() {
            return Err(err.into());
        }
        info!(files = failing.len(), "escalating unresolvable files to full-file rewrites");

        let rest = PatchSet {
            files: patch
                .files
                .iter()
                .filter(|f| !failing.contains(&f.path))
                .cloned()
                .collect(),
            base_snapshots: patch.base_snapshots.clone(),
        };
        let mut changes = Vec::new();
        let applied = if rest.files.is_empty() {
            None
        } else {
            let source = self.snapshot(&rest)?;
            let (patched, result) = applier.apply(&source, &rest).map_err(|_| err.clone())?;
            changes.extend(patched.changes_since(&source));
            Some(result)
        };

        // Nothing reaches the tree until every failing file has an accepted rewrite.
        let rewriter = FullFileRewriter::new(self.ctx);
        let mut refaced = Vec::with_capacity(failing.len());
        for path in &failing {
            let rewrite = rewriter.rewrite(task, path, &err.to_string()).await?;
            changes.push(rewrite.change);
            refaced.push(rewrite.report);
        }
        self.ctx.tree.commit(&changes)?;
        Ok(ChangeReport { applied, refaced })
    }

    /// Current content of every file the patch touches.
    fn snapshot(&self, patch: &PatchSet) -> Result<SourceTree, TaskwrightError> {
        let mut tree = SourceTree::new();
        for path in patch.paths() {
            if let Some(text) = self.ctx.tree.read_file(path)? {
                tree.insert_text(path.clone(), &text);
            }
        }
        Ok(tree)
    }

    /// Files matching the task's path globs, within the context budget.
    fn context_files(&self, task: &Task) -> Result<Vec<FileView>, TaskwrightError> {
        let mut views = Vec::new();
        let mut bytes = 0;
        for path in self.ctx.tree.list_files()? {
            if views.len() >= MAX_CONTEXT_FILES {
                break;
            }
            if !task.paths.iter().any(|g| g.matches(&path)) {
                continue;
            }
            let Some(content) = self.ctx.tree.read_file(&path)? else { continue };
            if bytes + content.len() > MAX_CONTEXT_BYTES {
                continue;
            }
            bytes += content.len();
            views.push(FileView {
                path: path.to_string(),
                content,
            });
        }
        Ok(views)
    }

    /// The latest review verdict on the task's pull request, if any.
    async fn review_feedback(&self, pr: Option<PullRequestId>) -> Result<Option<String>, TaskwrightError> {
        let Some(pr) = pr else { return Ok(None) };
        let comments = self.ctx.tracker.list_comments(pr.as_u64()).await?;
        Ok(comments
            .into_iter()
            .rev()
            .find(|c| ReviewVerdict::is_review_comment(&c.body))
            .map(|c| c.body))
    }
}

fn issue_ref(issue: &Issue) -> SubWorkItemId {
    SubWorkItemId::new(issue.number)
}

fn branch_name(name: String) -> Result<BranchName, TaskwrightError> {
    BranchName::new(name).ok_or_else(|| TaskwrightError::ConfigurationError {
        message: "branch names must not be empty".into(),
    })
}
