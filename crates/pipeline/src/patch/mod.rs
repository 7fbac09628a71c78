//! Patch Normalizer: structured unified diffs and the path policy that guards them.
//!
//! The normalizer turns an agent's free-form response into a [`PatchSet`]:
//!
//! 1. [`extract_diff`] pulls the diff out of fenced blocks and strips non-ASCII.
//! 2. [`coerce`] repairs common formatting drift (CRLF, bare context lines).
//! 3. [`parse`] builds per-file hunks, rejecting malformed headers and
//!    inconsistent line counts.
//! 4. [`PatchSet::normalize_headers`] reconciles creation/modification headers
//!    with what actually exists in the tree.
//! 5. [`PathPolicy::check`] rejects unsafe, denied, or out-of-project targets.
//!
//! Nothing here touches the file system. Every failure happens before any
//! mutation is attempted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::ErrorKind;
use crate::identifiers::RepoPath;
use crate::reface::FullFileProposal;

mod parse;
mod policy;

pub use parse::{coerce, extract_diff, parse, Normalizer};
pub use policy::{PathPolicy, PolicyReason};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures of the Patch Normalizer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatchError {
    #[error("No unified diff found in response: {reason}")]
    NoDiff { reason: String },

    #[error("Diff is {bytes} bytes, over the {limit} byte limit")]
    TooLarge { bytes: usize, limit: usize },

    #[error("Diff touches {count} files, over the {limit} file limit; split the change")]
    TooManyFiles { count: usize, limit: usize },

    #[error("Malformed diff at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error(
        "Hunk {hunk_index} of {path} declares -{expected_old}/+{expected_new} lines \
         but carries -{found_old}/+{found_new}"
    )]
    InconsistentHunk {
        path: RepoPath,
        hunk_index: usize,
        expected_old: usize,
        expected_new: usize,
        found_old: usize,
        found_new: usize,
    },

    #[error("Policy violation for '{path}': {reason}")]
    PolicyViolation { path: String, reason: PolicyReason },
}

impl PatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PolicyViolation { .. } => ErrorKind::PolicyViolation,
            _ => ErrorKind::MalformedPatch,
        }
    }

    fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::Malformed {
            line,
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Hunks
// ---------------------------------------------------------------------------

/// Role of one line inside a hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineOp {
    Context,
    Add,
    Delete,
}

impl LineOp {
    fn prefix(self) -> char {
        match self {
            Self::Context => ' ',
            Self::Add => '+',
            Self::Delete => '-',
        }
    }

    fn inverse(self) -> Self {
        match self {
            Self::Context => Self::Context,
            Self::Add => Self::Delete,
            Self::Delete => Self::Add,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HunkLine {
    pub op: LineOp,
    pub text: String,
}

impl HunkLine {
    pub fn new(op: LineOp, text: impl Into<String>) -> Self {
        Self {
            op,
            text: text.into(),
        }
    }
}

/// `start,len` from a hunk header. `start` is 1-based; for an empty range it
/// names the line after which the hunk applies (0 means the top of the file).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub len: usize,
}

impl LineRange {
    pub fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    /// 0-based index of the first line the range covers.
    pub fn first_index(self) -> usize {
        if self.len == 0 {
            self.start
        } else {
            self.start.saturating_sub(1)
        }
    }

    pub fn is_empty(self) -> bool {
        self.len == 0
    }
}

/// One `@@` block of a unified diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHunk {
    pub path: RepoPath,
    pub old_range: LineRange,
    pub new_range: LineRange,
    pub lines: Vec<HunkLine>,
    /// The old side's last line has no trailing newline.
    pub old_missing_newline: bool,
    /// The new side's last line has no trailing newline.
    pub new_missing_newline: bool,
}

impl FileHunk {
    /// Context and deleted lines, in order: what the hunk expects to find.
    pub fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| l.op != LineOp::Add)
            .map(|l| l.text.as_str())
            .collect()
    }

    /// Context and added lines, in order: what the hunk leaves behind.
    pub fn new_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| l.op != LineOp::Delete)
            .map(|l| l.text.as_str())
            .collect()
    }

    /// Checks that the header counts agree with the body.
    pub fn check_consistency(&self, hunk_index: usize) -> Result<(), PatchError> {
        let found_old = self.lines.iter().filter(|l| l.op != LineOp::Add).count();
        let found_new = self.lines.iter().filter(|l| l.op != LineOp::Delete).count();
        if found_old != self.old_range.len || found_new != self.new_range.len {
            return Err(PatchError::InconsistentHunk {
                path: self.path.clone(),
                hunk_index,
                expected_old: self.old_range.len,
                expected_new: self.new_range.len,
                found_old,
                found_new,
            });
        }
        Ok(())
    }

    fn inverse(&self) -> Self {
        Self {
            path: self.path.clone(),
            old_range: self.new_range,
            new_range: self.old_range,
            lines: self
                .lines
                .iter()
                .map(|l| HunkLine::new(l.op.inverse(), l.text.clone()))
                .collect(),
            old_missing_newline: self.new_missing_newline,
            new_missing_newline: self.old_missing_newline,
        }
    }

    fn render(&self, out: &mut String) {
        out.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            self.old_range.start, self.old_range.len, self.new_range.start, self.new_range.len
        ));
        let last_old = self.lines.iter().rposition(|l| l.op != LineOp::Add);
        let last_new = self.lines.iter().rposition(|l| l.op != LineOp::Delete);
        for (i, line) in self.lines.iter().enumerate() {
            out.push(line.op.prefix());
            out.push_str(&line.text);
            out.push('\n');
            let ends_old = self.old_missing_newline && Some(i) == last_old;
            let ends_new = self.new_missing_newline && Some(i) == last_new;
            if ends_old || ends_new {
                out.push_str("\\ No newline at end of file\n");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Files and sets
// ---------------------------------------------------------------------------

/// What a file-level patch does to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeKind {
    Create,
    Modify,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePatch {
    pub path: RepoPath,
    pub kind: FileChangeKind,
    pub hunks: Vec<FileHunk>,
}

impl FilePatch {
    /// Every hunk starts from nothing: the file cannot already exist.
    pub fn is_pure_creation(&self) -> bool {
        !self.hunks.is_empty()
            && self
                .hunks
                .iter()
                .all(|h| h.old_range.is_empty() && h.lines.iter().all(|l| l.op == LineOp::Add))
    }

    pub fn inverse(&self) -> Self {
        let kind = match self.kind {
            FileChangeKind::Create => FileChangeKind::Delete,
            FileChangeKind::Delete => FileChangeKind::Create,
            FileChangeKind::Modify => FileChangeKind::Modify,
        };
        Self {
            path: self.path.clone(),
            kind,
            hunks: self.hunks.iter().map(FileHunk::inverse).collect(),
        }
    }
}

/// A normalized unified diff: per-file hunks in the order they appeared.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PatchSet {
    pub files: Vec<FilePatch>,
    /// Content of a file as the agent saw it when writing the diff. Enables the
    /// three-way merge strategy for that file.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub base_snapshots: BTreeMap<RepoPath, String>,
}

impl PatchSet {
    pub fn paths(&self) -> Vec<&RepoPath> {
        self.files.iter().map(|f| &f.path).collect()
    }

    /// All hunks across every file, in order.
    pub fn hunks(&self) -> impl Iterator<Item = &FileHunk> {
        self.files.iter().flat_map(|f| f.hunks.iter())
    }

    pub fn hunk_count(&self) -> usize {
        self.files.iter().map(|f| f.hunks.len()).sum()
    }

    /// Every file is a pure creation.
    pub fn is_pure_creation(&self) -> bool {
        !self.files.is_empty() && self.files.iter().all(FilePatch::is_pure_creation)
    }

    /// Attaches the base content the diff was written against.
    pub fn with_base_snapshot(mut self, path: RepoPath, content: impl Into<String>) -> Self {
        self.base_snapshots.insert(path, content.into());
        self
    }

    /// The reverse patch. Applying `self` then `self.inverse()` restores the
    /// original tree.
    pub fn inverse(&self) -> Self {
        Self {
            files: self.files.iter().rev().map(FilePatch::inverse).collect(),
            base_snapshots: BTreeMap::new(),
        }
    }

    /// Reconciles headers with the tree. `exists` reports whether a path is
    /// present in the working tree.
    ///
    /// - A modification of a missing file made only of additions becomes a creation.
    /// - A creation of a file that already exists becomes a modification.
    pub fn normalize_headers(&mut self, exists: impl Fn(&RepoPath) -> bool) {
        for file in &mut self.files {
            let present = exists(&file.path);
            match file.kind {
                FileChangeKind::Modify if !present && file.is_pure_creation() => {
                    tracing::debug!(path = %file.path, "header rewritten to creation");
                    file.kind = FileChangeKind::Create;
                }
                FileChangeKind::Create if present => {
                    tracing::debug!(path = %file.path, "header rewritten to modification");
                    file.kind = FileChangeKind::Modify;
                }
                _ => {}
            }
        }
    }

    /// Renders the set back to unified-diff text.
    pub fn to_unified(&self) -> String {
        let mut out = String::new();
        for file in &self.files {
            let (old, new) = match file.kind {
                FileChangeKind::Create => ("/dev/null".to_string(), format!("b/{}", file.path)),
                FileChangeKind::Delete => (format!("a/{}", file.path), "/dev/null".to_string()),
                FileChangeKind::Modify => (format!("a/{}", file.path), format!("b/{}", file.path)),
            };
            out.push_str(&format!("--- {old}\n+++ {new}\n"));
            for hunk in &file.hunks {
                hunk.render(&mut out);
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Proposals
// ---------------------------------------------------------------------------

/// An agent's proposed mutation of the working tree. Consumed exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeProposal {
    Diff(PatchSet),
    FullFile(FullFileProposal),
}

impl ChangeProposal {
    pub fn target_paths(&self) -> Vec<RepoPath> {
        match self {
            Self::Diff(set) => set.paths().into_iter().cloned().collect(),
            Self::FullFile(p) => vec![p.path.clone()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODIFY: &str = "\
--- a/src/lib.py
+++ b/src/lib.py
@@ -1,3 +1,3 @@
 def f():
-    return 1
+    return 2
 # end
";

    #[test]
    fn inverse_swaps_ops_and_ranges() {
        let set = parse(MODIFY).unwrap();
        let inv = set.inverse();
        let hunk = &inv.files[0].hunks[0];
        assert_eq!(hunk.old_lines(), vec!["def f():", "    return 2", "# end"]);
        assert_eq!(hunk.new_lines(), vec!["def f():", "    return 1", "# end"]);
        assert_eq!(inv.inverse(), set);
    }

    #[test]
    fn inverse_of_creation_is_deletion() {
        let set = parse("--- /dev/null\n+++ b/a.md\n@@ -0,0 +1 @@\n+hi\n").unwrap();
        let inv = set.inverse();
        assert_eq!(inv.files[0].kind, FileChangeKind::Delete);
        assert_eq!(inv.files[0].hunks[0].old_range, LineRange::new(1, 1));
        assert_eq!(inv.files[0].hunks[0].new_range, LineRange::new(0, 0));
    }

    #[test]
    fn rendering_parses_back_to_the_same_set() {
        let set = parse(MODIFY).unwrap();
        assert_eq!(parse(&set.to_unified()).unwrap(), set);
    }

    #[test]
    fn line_range_first_index() {
        assert_eq!(LineRange::new(0, 0).first_index(), 0);
        assert_eq!(LineRange::new(4, 0).first_index(), 4);
        assert_eq!(LineRange::new(4, 2).first_index(), 3);
    }
}
