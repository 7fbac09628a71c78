//! Patch Applier: an ordered chain of pure strategies over an in-memory tree.
//!
//! Each strategy is a plain function `(context, tree, patch) -> Result<tree, failure>`.
//! The chain tries them in order and stops at the first success. Strategies
//! never see the real working tree: they receive the current content of the
//! touched files as a [`SourceTree`] and return a new one. The caller writes
//! the result through [`crate::ports::WorkingTree::commit`], so a failure at any
//! point leaves the working tree untouched.
//!
//! | # | Strategy | Placement rule |
//! |---|----------|----------------|
//! | 1 | [`ApplyStrategy::StrictContext`] | exact context at the recorded offset, then nearest within a bounded window |
//! | 2 | [`ApplyStrategy::ThreeWayMerge`] | three-way merge against the agent's base snapshot, or fuzz matching |
//! | 3 | [`ApplyStrategy::LineBased`] | best similarity ignoring trailing whitespace |
//! | 4 | [`ApplyStrategy::ManualCreation`] | new files only, never overwrites |

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::PatchSettings;
use crate::errors::ErrorKind;
use crate::identifiers::RepoPath;
use crate::patch::PatchSet;

mod merge;
mod strategies;

pub use merge::{merge3, MergeConflict};
pub use strategies::{line_based, manual_creation, strict_context, three_way_or_fuzz};

// ---------------------------------------------------------------------------
// In-memory tree
// ---------------------------------------------------------------------------

/// Content of one text file split into lines.
///
/// Lines never carry their terminator. A file whose every line ends in
/// `\r\n` is stored with `crlf` set and written back the same way; a file
/// with mixed endings keeps its `\r` bytes inside the lines.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceFile {
    pub lines: Vec<String>,
    pub trailing_newline: bool,
    pub crlf: bool,
}

impl SourceFile {
    pub fn from_text(text: &str) -> Self {
        let crlf = text.contains("\r\n") && text.matches('\n').count() == text.matches("\r\n").count();
        let eol = if crlf { "\r\n" } else { "\n" };
        let lines = if text.is_empty() {
            Vec::new()
        } else {
            text.strip_suffix(eol).unwrap_or(text).split(eol).map(str::to_string).collect()
        };
        Self {
            lines,
            trailing_newline: text.ends_with('\n'),
            crlf,
        }
    }

    fn eol(&self) -> &'static str {
        if self.crlf {
            "\r\n"
        } else {
            "\n"
        }
    }

    pub fn to_text(&self) -> String {
        let eol = self.eol();
        let mut out = self.lines.join(eol);
        if self.trailing_newline && !self.lines.is_empty() {
            out.push_str(eol);
        }
        out
    }
}

/// The subset of the working tree a patch touches. Absent paths do not exist.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceTree {
    files: BTreeMap<RepoPath, SourceFile>,
}

impl SourceTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, path: RepoPath, text: &str) -> Self {
        self.insert_text(path, text);
        self
    }

    pub fn insert_text(&mut self, path: RepoPath, text: &str) {
        self.files.insert(path, SourceFile::from_text(text));
    }

    pub fn insert(&mut self, path: RepoPath, file: SourceFile) {
        self.files.insert(path, file);
    }

    pub fn remove(&mut self, path: &RepoPath) -> Option<SourceFile> {
        self.files.remove(path)
    }

    pub fn get(&self, path: &RepoPath) -> Option<&SourceFile> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &RepoPath) -> bool {
        self.files.contains_key(path)
    }

    pub fn text(&self, path: &RepoPath) -> Option<String> {
        self.files.get(path).map(SourceFile::to_text)
    }

    pub fn paths(&self) -> impl Iterator<Item = &RepoPath> {
        self.files.keys()
    }

    /// Writes that turn `before` into `self`, in path order.
    pub fn changes_since(&self, before: &SourceTree) -> Vec<FileChange> {
        let mut paths: BTreeSet<&RepoPath> = self.files.keys().collect();
        paths.extend(before.files.keys());
        paths
            .into_iter()
            .filter_map(|path| match (before.files.get(path), self.files.get(path)) {
                (Some(old), Some(new)) if old == new => None,
                (_, Some(new)) => Some(FileChange::write(path.clone(), new.to_text())),
                (Some(_), None) => Some(FileChange::delete(path.clone())),
                (None, None) => None,
            })
            .collect()
    }
}

/// One file-level mutation handed to the working tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: RepoPath,
    /// New content; `None` deletes the file.
    pub content: Option<String>,
}

impl FileChange {
    pub fn write(path: RepoPath, content: impl Into<String>) -> Self {
        Self {
            path,
            content: Some(content.into()),
        }
    }

    pub fn delete(path: RepoPath) -> Self {
        Self { path, content: None }
    }
}

// ---------------------------------------------------------------------------
// Strategy bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStrategy {
    StrictContext,
    ThreeWayMerge,
    LineBased,
    ManualCreation,
}

impl ApplyStrategy {
    /// Chain order.
    pub const ALL: [ApplyStrategy; 4] = [
        Self::StrictContext,
        Self::ThreeWayMerge,
        Self::LineBased,
        Self::ManualCreation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StrictContext => "strict_context",
            Self::ThreeWayMerge => "three_way_merge",
            Self::LineBased => "line_based",
            Self::ManualCreation => "manual_creation",
        }
    }
}

impl std::fmt::Display for ApplyStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why one strategy could not place the patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyFailure {
    pub path: RepoPath,
    pub hunk_index: Option<usize>,
    pub reason: String,
}

impl StrategyFailure {
    pub fn file(path: &RepoPath, reason: impl Into<String>) -> Self {
        Self {
            path: path.clone(),
            hunk_index: None,
            reason: reason.into(),
        }
    }

    pub fn hunk(path: &RepoPath, hunk_index: usize, reason: impl Into<String>) -> Self {
        Self {
            path: path.clone(),
            hunk_index: Some(hunk_index),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.hunk_index {
            Some(i) => write!(f, "{} hunk {}: {}", self.path, i, self.reason),
            None => write!(f, "{}: {}", self.path, self.reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Applied,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub strategy: ApplyStrategy,
    pub outcome: AttemptOutcome,
    pub reason: Option<String>,
}

/// Outcome of running the chain. Transient; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub strategy_used: Option<ApplyStrategy>,
    pub files_changed: BTreeSet<RepoPath>,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub attempts: Vec<StrategyAttempt>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApplyError {
    /// Every strategy failed; `last_failure` names the file and hunk.
    #[error("No patch strategy could apply the change; last failure: {last_failure}")]
    UnresolvableConflict {
        last_failure: String,
        failing_paths: Vec<RepoPath>,
        attempts: Vec<StrategyAttempt>,
    },
}

impl ApplyError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::UnresolvableConflict
    }

    pub fn attempts(&self) -> &[StrategyAttempt] {
        match self {
            Self::UnresolvableConflict { attempts, .. } => attempts,
        }
    }

    /// Files no strategy could patch: candidates for full-file escalation.
    pub fn failing_paths(&self) -> &[RepoPath] {
        match self {
            Self::UnresolvableConflict { failing_paths, .. } => failing_paths,
        }
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Tunables shared by the strategies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyContext {
    pub search_window: usize,
    pub fuzz: usize,
    pub min_similarity: f64,
}

impl From<&PatchSettings> for StrategyContext {
    fn from(s: &PatchSettings) -> Self {
        Self {
            search_window: s.search_window,
            fuzz: s.fuzz,
            min_similarity: s.min_similarity,
        }
    }
}

/// A strategy in the chain.
pub type StrategyFn = fn(&StrategyContext, &SourceTree, &PatchSet) -> Result<SourceTree, StrategyFailure>;

#[derive(Debug, Clone)]
pub struct PatchApplier {
    ctx: StrategyContext,
    chain: Vec<(ApplyStrategy, StrategyFn)>,
}

impl PatchApplier {
    pub fn new(settings: &PatchSettings) -> Self {
        Self {
            ctx: StrategyContext::from(settings),
            chain: vec![
                (ApplyStrategy::StrictContext, strict_context as StrategyFn),
                (ApplyStrategy::ThreeWayMerge, three_way_or_fuzz),
                (ApplyStrategy::LineBased, line_based),
                (ApplyStrategy::ManualCreation, manual_creation),
            ],
        }
    }

    /// Runs the chain against `tree` and returns the patched tree.
    ///
    /// `tree` is never modified; on failure nothing needs undoing.
    #[instrument(skip_all, fields(files = patch.files.len(), hunks = patch.hunk_count()))]
    pub fn apply(
        &self,
        tree: &SourceTree,
        patch: &PatchSet,
    ) -> Result<(SourceTree, ApplyResult), ApplyError> {
        let mut attempts = Vec::with_capacity(self.chain.len());
        let mut last_failure: Option<StrategyFailure> = None;

        for (strategy, run) in &self.chain {
            if *strategy == ApplyStrategy::ManualCreation && !patch.is_pure_creation() {
                info!(strategy = %strategy, outcome = "skipped", "patch modifies existing content");
                attempts.push(StrategyAttempt {
                    strategy: *strategy,
                    outcome: AttemptOutcome::Skipped,
                    reason: Some("patch modifies existing content".into()),
                });
                continue;
            }

            match run(&self.ctx, tree, patch) {
                Ok(patched) => {
                    info!(strategy = %strategy, outcome = "applied", "patch applied");
                    attempts.push(StrategyAttempt {
                        strategy: *strategy,
                        outcome: AttemptOutcome::Applied,
                        reason: None,
                    });
                    let files_changed = patched
                        .changes_since(tree)
                        .into_iter()
                        .map(|c| c.path)
                        .collect();
                    let result = ApplyResult {
                        strategy_used: Some(*strategy),
                        files_changed,
                        success: true,
                        failure_reason: None,
                        attempts,
                    };
                    return Ok((patched, result));
                }
                Err(failure) => {
                    info!(strategy = %strategy, outcome = "failed", reason = %failure, "strategy failed");
                    attempts.push(StrategyAttempt {
                        strategy: *strategy,
                        outcome: AttemptOutcome::Failed,
                        reason: Some(failure.to_string()),
                    });
                    last_failure = Some(failure);
                }
            }
        }

        let failing_paths = self.failing_paths(tree, patch);
        let last_failure = last_failure
            .map(|f| f.to_string())
            .unwrap_or_else(|| "no strategy was applicable".to_string());
        warn!(reason = %last_failure, "all patch strategies failed");
        Err(ApplyError::UnresolvableConflict {
            last_failure,
            failing_paths,
            attempts,
        })
    }

    /// Files that no strategy can patch on their own.
    fn failing_paths(&self, tree: &SourceTree, patch: &PatchSet) -> Vec<RepoPath> {
        patch
            .files
            .iter()
            .filter(|file| {
                let single = PatchSet {
                    files: vec![(*file).clone()],
                    base_snapshots: patch.base_snapshots.clone(),
                };
                self.chain
                    .iter()
                    .take(3)
                    .all(|(_, run)| run(&self.ctx, tree, &single).is_err())
            })
            .map(|f| f.path.clone())
            .collect()
    }

    /// The result record for a failed run, for reporting.
    pub fn failure_result(err: &ApplyError) -> ApplyResult {
        ApplyResult {
            strategy_used: None,
            files_changed: BTreeSet::new(),
            success: false,
            failure_reason: Some(err.to_string()),
            attempts: err.attempts().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests;
