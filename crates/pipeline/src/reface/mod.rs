//! Full-File Refacer: the checks a complete replacement file must pass.
//!
//! Used when incremental patching is unreliable. A proposal carries the whole
//! new file plus the hash of the base the agent saw. [`Refacer::check`] runs
//! the gates in a fixed order and returns the content to swap in:
//!
//! 1. confidence at or above the configured minimum ([`RefaceError::LowConfidence`])
//! 2. the proposal targets the requested path
//! 3. size within `max_file_size`
//! 4. the live file still hashes to `expected_hash` ([`RefaceError::BaseChanged`])
//! 5. every KEEP region of the live file survives verbatim
//! 6. the new content parses for its language ([`RefaceError::ValidationFailed`])
//!
//! The swap itself happens through [`crate::ports::WorkingTree::commit`]
//! (scratch file plus rename). Formatting runs afterwards and is judged by
//! [`Refacer::judge_format`].

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::RefaceSettings;
use crate::errors::ErrorKind;
use crate::identifiers::RepoPath;
use crate::payload::parse_json;
use crate::ports::SourceValidator;
use crate::types::{Confidence, ContentHash};

mod keep;

pub use keep::{extract_keep_regions, find_violation, KeepMarkerError, KeepRegion, KeepViolation};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RefaceError {
    #[error("Full-file refacing is disabled by configuration")]
    Disabled,

    #[error("Proposal for {path} has confidence {confidence}, below the minimum {minimum:.2}")]
    LowConfidence {
        path: RepoPath,
        confidence: Confidence,
        minimum: f64,
    },

    #[error("Proposal targets {proposed} but {expected} was requested")]
    PathMismatch { expected: RepoPath, proposed: RepoPath },

    #[error("Proposed content for {path} is {bytes} bytes, over the {limit} byte limit")]
    TooLarge { path: RepoPath, bytes: usize, limit: usize },

    #[error("{path} does not exist in the working tree")]
    TargetMissing { path: RepoPath },

    #[error("{path} changed since the proposal was written (expected {expected}, found {actual})")]
    BaseChanged {
        path: RepoPath,
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error("KEEP region violated in {path}: {violation}")]
    KeepBlockViolated { path: RepoPath, violation: String },

    #[error("Invalid KEEP markers in {path}: {source}")]
    KeepMarkers {
        path: RepoPath,
        #[source]
        source: KeepMarkerError,
    },

    #[error("Proposed content for {path} failed validation: {reason}")]
    ValidationFailed { path: RepoPath, reason: String },

    #[error("Full-file proposal could not be read: {reason}")]
    MalformedProposal { reason: String },
}

impl RefaceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Disabled => ErrorKind::Configuration,
            Self::LowConfidence { .. } => ErrorKind::LowConfidence,
            Self::PathMismatch { .. } | Self::TooLarge { .. } | Self::ValidationFailed { .. } => {
                ErrorKind::ValidationFailed
            }
            Self::TargetMissing { .. } | Self::BaseChanged { .. } => ErrorKind::BaseChanged,
            Self::KeepBlockViolated { .. } | Self::KeepMarkers { .. } => ErrorKind::KeepBlockViolated,
            Self::MalformedProposal { .. } => ErrorKind::MalformedPatch,
        }
    }
}

// ---------------------------------------------------------------------------
// Proposal
// ---------------------------------------------------------------------------

/// A complete replacement for one file.
#[derive(Debug, Clone, PartialEq)]
pub struct FullFileProposal {
    pub path: RepoPath,
    pub expected_hash: ContentHash,
    pub new_content: String,
    pub changelog: Vec<String>,
    pub confidence: Confidence,
    /// Region ids the agent promises to carry over; each must exist in the
    /// live file. Every region of the live file is checked regardless.
    pub keep_regions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawContract {
    file_path: String,
    pre_hash: String,
    new_content: String,
    #[serde(default)]
    changelog: Vec<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    keep_regions: Vec<String>,
}

impl FullFileProposal {
    /// Reads the JSON contract from a model response.
    ///
    /// A missing or out-of-range confidence falls back to the default.
    pub fn from_response(response: &str) -> Result<Self, RefaceError> {
        let raw: RawContract =
            parse_json(response).map_err(|reason| RefaceError::MalformedProposal { reason })?;
        let path = RepoPath::normalized(&raw.file_path).ok_or_else(|| RefaceError::MalformedProposal {
            reason: "file_path is empty".into(),
        })?;
        let expected_hash = raw
            .pre_hash
            .parse()
            .map_err(|reason| RefaceError::MalformedProposal { reason })?;
        let confidence = raw.confidence.and_then(Confidence::new).unwrap_or_default();
        Ok(Self {
            path,
            expected_hash,
            new_content: raw.new_content,
            changelog: raw.changelog,
            confidence,
            keep_regions: raw.keep_regions,
        })
    }
}

// ---------------------------------------------------------------------------
// Gates
// ---------------------------------------------------------------------------

/// Result of judging post-swap formatter output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatOutcome {
    /// Formatted content differs and keeps every region: swap it in.
    Apply(String),
    /// The formatter made no change or none is configured.
    Unchanged,
    /// The formatter touched a KEEP region; its output is dropped.
    Discarded { reason: String },
    /// The formatter itself failed; the swapped content stays.
    Failed { reason: String },
}

/// Runs the refacing gates under one [`RefaceSettings`].
pub struct Refacer<'a> {
    settings: &'a RefaceSettings,
    validator: &'a dyn SourceValidator,
}

impl<'a> Refacer<'a> {
    pub fn new(settings: &'a RefaceSettings, validator: &'a dyn SourceValidator) -> Self {
        Self { settings, validator }
    }

    /// Checks `proposal` against the live content of `requested` and returns
    /// the content to swap in, normalized to end with exactly one newline.
    pub fn check(
        &self,
        proposal: &FullFileProposal,
        requested: &RepoPath,
        live: Option<&str>,
    ) -> Result<String, RefaceError> {
        if !self.settings.enabled {
            return Err(RefaceError::Disabled);
        }
        if proposal.confidence.as_f64() < self.settings.min_confidence {
            return Err(RefaceError::LowConfidence {
                path: proposal.path.clone(),
                confidence: proposal.confidence,
                minimum: self.settings.min_confidence,
            });
        }
        if &proposal.path != requested {
            return Err(RefaceError::PathMismatch {
                expected: requested.clone(),
                proposed: proposal.path.clone(),
            });
        }
        if proposal.new_content.len() > self.settings.max_file_size {
            return Err(RefaceError::TooLarge {
                path: proposal.path.clone(),
                bytes: proposal.new_content.len(),
                limit: self.settings.max_file_size,
            });
        }

        let live = live.ok_or_else(|| RefaceError::TargetMissing {
            path: proposal.path.clone(),
        })?;
        let actual = ContentHash::of(live);
        if actual != proposal.expected_hash {
            return Err(RefaceError::BaseChanged {
                path: proposal.path.clone(),
                expected: proposal.expected_hash.clone(),
                actual,
            });
        }

        let content = normalize_newline(&proposal.new_content);
        self.check_keep(&proposal.path, live, &content, &proposal.keep_regions)?;

        self.validator
            .validate(&proposal.path, &content)
            .map_err(|reason| RefaceError::ValidationFailed {
                path: proposal.path.clone(),
                reason,
            })?;

        debug!(path = %proposal.path, bytes = content.len(), "full-file proposal accepted");
        Ok(content)
    }

    /// Judges formatter output for content that was already swapped in.
    pub fn judge_format(
        &self,
        path: &RepoPath,
        swapped: &str,
        formatted: Result<Option<String>, String>,
    ) -> FormatOutcome {
        let formatted = match formatted {
            Ok(Some(text)) => normalize_newline(&text),
            Ok(None) => return FormatOutcome::Unchanged,
            Err(reason) => {
                warn!(path = %path, reason = %reason, "formatter failed; keeping unformatted content");
                return FormatOutcome::Failed { reason };
            }
        };
        if formatted == swapped {
            return FormatOutcome::Unchanged;
        }
        match self.check_keep(path, swapped, &formatted, &[]) {
            Ok(()) => FormatOutcome::Apply(formatted),
            Err(e) => {
                warn!(path = %path, reason = %e, "formatter altered a KEEP region; output discarded");
                FormatOutcome::Discarded { reason: e.to_string() }
            }
        }
    }

    fn check_keep(
        &self,
        path: &RepoPath,
        original: &str,
        rewritten: &str,
        declared: &[String],
    ) -> Result<(), RefaceError> {
        let markers = |source| RefaceError::KeepMarkers {
            path: path.clone(),
            source,
        };
        let before = extract_keep_regions(original).map_err(markers)?;
        let after = extract_keep_regions(rewritten).map_err(markers)?;

        let undeclared = declared
            .iter()
            .find(|id| !before.iter().any(|r| &r.id == *id))
            .map(|id| KeepViolation::Undeclared { id: id.clone() });
        match undeclared.or_else(|| find_violation(&before, &after)) {
            Some(v) => Err(RefaceError::KeepBlockViolated {
                path: path.clone(),
                violation: v.to_string(),
            }),
            None => Ok(()),
        }
    }
}

fn normalize_newline(content: &str) -> String {
    let mut out = content.trim_end_matches(['\n', '\r']).to_string();
    out.push('\n');
    out
}
