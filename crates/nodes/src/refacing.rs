//! Full-file escalation: asks the model for a complete replacement of one
//! file and accepts it once every gate passes. Accepted content is returned,
//! not written; the caller commits it together with the rest of the change.

use pipeline::apply::FileChange;
use pipeline::graph::Task;
use pipeline::reface::{FormatOutcome, FullFileProposal, RefaceError, Refacer};
use pipeline::{RepoPath, TaskwrightError};
use tracing::{info, instrument, warn};

use crate::context::NodeContext;
use crate::prompts::DEVELOPER_SYSTEM;

/// What happened to one refaced file.
#[derive(Debug, Clone, PartialEq)]
pub struct RefaceReport {
    pub path: RepoPath,
    /// Proposals requested, including retries after `BaseChanged`.
    pub proposals: u32,
    pub changelog: Vec<String>,
    pub format: FormatOutcome,
}

/// An accepted replacement, ready to commit.
#[derive(Debug, Clone, PartialEq)]
pub struct Rewrite {
    pub change: FileChange,
    pub report: RefaceReport,
}

pub struct FullFileRewriter<'a> {
    ctx: &'a NodeContext,
}

impl<'a> FullFileRewriter<'a> {
    pub fn new(ctx: &'a NodeContext) -> Self {
        Self { ctx }
    }

    /// Produces the replacement for `path`. A proposal written against a stale
    /// base is re-requested against the fresh content up to
    /// `reface.max_retries` times before the `BaseChanged` error surfaces.
    #[instrument(skip(self, task, reason), fields(task = %task.id, path = %path))]
    pub async fn rewrite(&self, task: &Task, path: &RepoPath, reason: &str) -> Result<Rewrite, TaskwrightError> {
        let settings = &self.ctx.settings.reface;
        let refacer = Refacer::new(settings, self.ctx.validator.as_ref());
        let mut proposals = 0;

        loop {
            proposals += 1;
            let base = self.ctx.tree.read_file(path)?.unwrap_or_default();
            let prompt = self.ctx.prompts.full_file(task, path, &base, reason)?;
            let response = self.ctx.llm.complete(DEVELOPER_SYSTEM, &prompt).await?;
            let proposal = FullFileProposal::from_response(&response)?;

            // Hash precondition is checked against the file as it is now, not
            // as it was when the prompt was built.
            let live = self.ctx.tree.read_file(path)?;
            match refacer.check(&proposal, path, live.as_deref()) {
                Ok(content) => {
                    info!(attempt = proposals, bytes = content.len(), "full-file proposal accepted");
                    let format = self.format(&refacer, path, &content);
                    let content = match &format {
                        FormatOutcome::Apply(text) => text.clone(),
                        _ => content,
                    };
                    return Ok(Rewrite {
                        change: FileChange::write(path.clone(), content),
                        report: RefaceReport {
                            path: path.clone(),
                            proposals,
                            changelog: proposal.changelog,
                            format,
                        },
                    });
                }
                Err(e @ RefaceError::BaseChanged { .. }) if proposals <= settings.max_retries => {
                    warn!(attempt = proposals, error = %e, "base changed under the proposal; requesting a fresh one");
                }
                Err(e) => {
                    warn!(attempt = proposals, kind = %e.kind(), error = %e, "full-file proposal rejected");
                    return Err(e.into());
                }
            }
        }
    }

    fn format(&self, refacer: &Refacer<'_>, path: &RepoPath, swapped: &str) -> FormatOutcome {
        if !self.ctx.settings.reface.auto_format {
            return FormatOutcome::Unchanged;
        }
        let formatted = self.ctx.formatter.format(path, swapped);
        refacer.judge_format(path, swapped, formatted)
    }
}
