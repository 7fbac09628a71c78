//! Allow/deny policy for patch targets.

use serde::{Deserialize, Serialize};

use super::{PatchError, PatchSet};
use crate::config::PatchSettings;
use crate::glob::PathGlob;
use crate::identifiers::RepoPath;

/// Why a target path was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PolicyReason {
    AbsolutePath,
    ParentTraversal,
    EmptySegment,
    NulByte,
    Denied { pattern: String },
    NotAllowed,
    OutsideProjectRoot { root: String },
}

impl std::fmt::Display for PolicyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AbsolutePath => f.write_str("absolute paths are not allowed"),
            Self::ParentTraversal => f.write_str("'..' segments are not allowed"),
            Self::EmptySegment => f.write_str("empty or '.' path segment"),
            Self::NulByte => f.write_str("NUL byte in path"),
            Self::Denied { pattern } => write!(f, "matches deny pattern '{pattern}'"),
            Self::NotAllowed => f.write_str("matches no allow pattern"),
            Self::OutsideProjectRoot { root } => write!(f, "outside project root '{root}'"),
        }
    }
}

/// Decides which repository paths a patch may touch.
///
/// Checks run in order: path safety, deny list, allow list, project root.
/// Deny always wins over allow.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    allow: Vec<PathGlob>,
    deny: Vec<PathGlob>,
    project_root: Option<String>,
}

impl PathPolicy {
    pub fn new(allow: Vec<PathGlob>, deny: Vec<PathGlob>, project_root: Option<String>) -> Self {
        Self {
            allow,
            deny,
            project_root: project_root
                .map(|r| r.trim_matches('/').to_string())
                .filter(|r| !r.is_empty()),
        }
    }

    pub fn from_settings(settings: &PatchSettings) -> Self {
        Self::new(
            settings.allow.clone(),
            settings.deny.clone(),
            settings.project_root.clone(),
        )
    }

    /// Checks one raw path string.
    pub fn check_str(&self, path: &str) -> Result<(), PatchError> {
        let violation = |reason| {
            Err(PatchError::PolicyViolation {
                path: path.to_string(),
                reason,
            })
        };

        if let Some(reason) = unsafe_reason(path) {
            return violation(reason);
        }
        if let Some(glob) = self.deny.iter().find(|g| g.matches_str(path)) {
            return violation(PolicyReason::Denied {
                pattern: glob.as_str().to_string(),
            });
        }
        if !self.allow.iter().any(|g| g.matches_str(path)) {
            return violation(PolicyReason::NotAllowed);
        }
        if let Some(root) = &self.project_root {
            let inside = path
                .strip_prefix(root.as_str())
                .is_some_and(|rest| rest.starts_with('/'));
            if !inside && path != "README.md" {
                return violation(PolicyReason::OutsideProjectRoot { root: root.clone() });
            }
        }
        Ok(())
    }

    pub fn check(&self, path: &RepoPath) -> Result<(), PatchError> {
        self.check_str(path.as_str())
    }

    /// Checks every target of a patch set; the first violation wins.
    pub fn check_set(&self, set: &PatchSet) -> Result<(), PatchError> {
        set.files.iter().try_for_each(|f| self.check(&f.path))
    }
}

fn unsafe_reason(path: &str) -> Option<PolicyReason> {
    if path.contains('\0') {
        return Some(PolicyReason::NulByte);
    }
    let bytes = path.as_bytes();
    let drive_letter = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
    if path.starts_with('/') || path.starts_with('\\') || drive_letter {
        return Some(PolicyReason::AbsolutePath);
    }
    if path.split('/').any(|s| s == "..") {
        return Some(PolicyReason::ParentTraversal);
    }
    if path.is_empty() || path.split('/').any(|s| s.is_empty() || s == ".") {
        return Some(PolicyReason::EmptySegment);
    }
    None
}
