//! Newtype domain identifiers.
//!
//! Issues, pull requests, plan tasks and repository paths each get their own
//! type, so a parent issue number cannot be passed where a pull request number
//! is expected. [`RepoPath`] also carries the path-safety normalization every
//! patch target goes through.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Non-empty string ids: new() -> Option, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// `None` for an empty value.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let value = value.into();
                (!value.is_empty()).then_some(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Numeric ids, rendered as `#n`.
// ---------------------------------------------------------------------------
macro_rules! u64_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(number: u64) -> Self {
                Self(number)
            }

            pub fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "#{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Issue and pull request numbers
// ---------------------------------------------------------------------------

u64_id! {
    /// Identifies the parent GitHub Issue that an analysis decomposes into tasks.
    WorkItemId
}

u64_id! {
    /// Identifies a GitHub Issue created by the Analyzer for one task of a
    /// parent work item.
    SubWorkItemId
}

u64_id! {
    /// Identifies a GitHub Pull Request produced by the Developer node.
    PullRequestId
}

// ---------------------------------------------------------------------------
// Plan task ids
// ---------------------------------------------------------------------------

/// Identifies a task inside one issue's task graph.
///
/// Task ids are assigned in declared order starting at 1, so ordering by
/// [`TaskId`] is ordering by declaration. The value doubles as the arena
/// index (`id - 1`) into [`crate::graph::TaskGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(u32);

impl TaskId {
    /// Creates a task id from its 1-based declared position.
    ///
    /// Returns `None` for zero.
    pub fn new(value: u32) -> Option<Self> {
        if value == 0 {
            None
        } else {
            Some(Self(value))
        }
    }

    pub(crate) fn from_index(index: usize) -> Self {
        Self(u32::try_from(index + 1).unwrap_or(u32::MAX))
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize - 1
    }

    /// Returns the underlying integer value.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Run ids
// ---------------------------------------------------------------------------

/// One handled trigger event. Recorded on every node span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineRunId(Uuid);

impl PipelineRunId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for PipelineRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Git and project names
// ---------------------------------------------------------------------------

string_id! {
    /// A Git branch name (e.g. `"main"`, `"taskwright/issue-12-t3"`).
    BranchName
}

string_id! {
    /// A Git commit SHA (40-character lowercase hex string).
    CommitSha
}

string_id! {
    /// Identifies a GitHub repository in `"owner/repo"` format.
    RepositoryId
}

string_id! {
    /// A file-system path relative to the repository root, always with `/`
    /// separators and no leading `./`.
    RepoPath
}

string_id! {
    /// Name of an issue or pull request label.
    LabelName
}

string_id! {
    /// Model identifier passed to an LLM provider (e.g. `"gpt-4o-mini"`).
    ModelName
}

string_id! {
    /// Opaque node id of a project board.
    ProjectId
}

string_id! {
    /// Opaque id of the single-select status field on a project board.
    StatusFieldId
}

string_id! {
    /// Opaque id of one option of the project status field.
    StatusOptionId
}

impl RepositoryId {
    /// Splits `"owner/repo"` into its two halves.
    pub fn owner_and_name(&self) -> Option<(&str, &str)> {
        let (owner, name) = self.0.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            None
        } else {
            Some((owner, name))
        }
    }
}

impl RepoPath {
    /// Normalizes a raw path from a diff header or payload: strips a leading
    /// `./`, converts `\` to `/`, and trims surrounding whitespace.
    pub fn normalized(raw: &str) -> Option<Self> {
        let trimmed = raw.trim().replace('\\', "/");
        let stripped = trimmed.strip_prefix("./").unwrap_or(&trimmed);
        Self::new(stripped.to_string())
    }

    /// File extension in lowercase, without the leading dot.
    pub fn extension(&self) -> Option<String> {
        let file = self.0.rsplit('/').next()?;
        let (stem, ext) = file.rsplit_once('.')?;
        if stem.is_empty() {
            None
        } else {
            Some(ext.to_ascii_lowercase())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_start_at_one() {
        assert!(TaskId::new(0).is_none());
        assert_eq!(TaskId::from_index(0), TaskId::new(1).unwrap());
        assert_eq!(TaskId::new(3).unwrap().index(), 2);
        assert_eq!(TaskId::new(3).unwrap().to_string(), "T3");
    }

    #[test]
    fn repo_path_normalization_strips_dot_prefix() {
        let p = RepoPath::normalized(" ./calc\\ops.py ").unwrap();
        assert_eq!(p.as_str(), "calc/ops.py");
        assert_eq!(p.extension().as_deref(), Some("py"));
        assert!(RepoPath::new(".env").unwrap().extension().is_none());
    }

    #[test]
    fn repository_id_splits_owner() {
        let id = RepositoryId::new("acme/widgets").unwrap();
        assert_eq!(id.owner_and_name(), Some(("acme", "widgets")));
        assert!(RepositoryId::new("acme").unwrap().owner_and_name().is_none());
    }
}
