//! Subcommand bodies.

use std::collections::BTreeSet;
use std::path::Path;

use nodes::{NodeOutcome, PipelineExecutor};
use pipeline::apply::{ApplyResult, PatchApplier, SourceTree};
use pipeline::config::Settings;
use pipeline::graph::TaskGraphBuilder;
use pipeline::patch::Normalizer;
use pipeline::ports::WorkingTree;
use pipeline::{RepoPath, TaskwrightError, TriggerEvent};
use tracing::info;
use worktree::FsWorkingTree;

use crate::wiring;

pub async fn dispatch(settings: Settings, root: &Path, event: TriggerEvent) -> Result<NodeOutcome, TaskwrightError> {
    let ctx = wiring::build_context(settings, root)?;
    PipelineExecutor::new(ctx).dispatch(event).await
}

/// A failed `apply`, with the strategy record when the chain ran.
pub type ApplyFailure = (Option<ApplyResult>, TaskwrightError);

fn before_chain(err: impl Into<TaskwrightError>) -> ApplyFailure {
    (None, err.into())
}

/// Runs the Normalizer and Applier on a local checkout. The result record is
/// returned for failures too, next to the error.
pub fn apply(
    settings: &Settings,
    diff: &str,
    root: &Path,
    dry_run: bool,
) -> Result<ApplyResult, ApplyFailure> {
    let tree = FsWorkingTree::new(root);
    let known: BTreeSet<RepoPath> = tree
        .list_files()
        .map_err(before_chain)?
        .into_iter()
        .collect();
    let patch = Normalizer::new(&settings.patch)
        .normalize(diff, |p| known.contains(p))
        .map_err(before_chain)?;

    let mut source = SourceTree::new();
    for path in patch.paths() {
        if let Some(text) = tree.read_file(path).map_err(before_chain)? {
            source.insert_text(path.clone(), &text);
        }
    }

    let (patched, result) = PatchApplier::new(&settings.patch)
        .apply(&source, &patch)
        .map_err(|e| (Some(PatchApplier::failure_result(&e)), TaskwrightError::from(e)))?;
    if dry_run {
        info!(files = result.files_changed.len(), "dry run, tree left untouched");
    } else {
        tree.commit(&patched.changes_since(&source))
            .map_err(|e| (Some(result.clone()), TaskwrightError::from(e)))?;
    }
    Ok(result)
}

/// Validates a plan payload and renders its topological order.
pub fn check_plan(settings: &Settings, payload: &str) -> Result<String, TaskwrightError> {
    let graph = TaskGraphBuilder::new(&settings.planning).build(payload, settings.review.default_policy)?;
    let mut out = String::new();
    for id in graph.topological_order()? {
        let Some(task) = graph.task(id) else { continue };
        out.push_str(&format!("{id}  {}", task.title));
        if !task.depends_on.is_empty() {
            let deps: Vec<String> = task.depends_on.iter().map(ToString::to_string).collect();
            out.push_str(&format!("  (after {})", deps.join(", ")));
        }
        out.push('\n');
    }
    Ok(out)
}
