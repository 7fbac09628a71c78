//! Shared value types for the Taskwright domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. confidence is in `[0.0, 1.0]`,
//! hashes carry their algorithm prefix) and participate in domain computations.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Score types
// ---------------------------------------------------------------------------

/// A proposal's self-reported reliability estimate in the range `[0.0, 1.0]`.
///
/// Compared against the configured minimum before a full-file rewrite is
/// applied.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Confidence(f64);

impl Confidence {
    /// Creates a [`Confidence`], returning `None` if `value` is outside
    /// the valid range `[0.0, 1.0]`.
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Returns the score as an `f64` in `[0.0, 1.0]`.
    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self(0.8)
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Content hashing
// ---------------------------------------------------------------------------

/// SHA-256 digest of file content, rendered as `sha256:<lowercase hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    const PREFIX: &'static str = "sha256:";

    /// Hashes `content` as UTF-8 bytes.
    pub fn of(content: &str) -> Self {
        let digest = Sha256::digest(content.as_bytes());
        Self(format!("{}{}", Self::PREFIX, hex::encode(digest)))
    }

    /// Returns the rendered `sha256:<hex>` form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ContentHash {
    type Err = String;

    /// Accepts `sha256:<64 hex>` or a bare 64-character hex digest.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digest = trimmed.strip_prefix(Self::PREFIX).unwrap_or(trimmed);
        if digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(format!("{}{}", Self::PREFIX, digest.to_ascii_lowercase())))
        } else {
            Err(format!("'{s}' is not a sha256 content hash"))
        }
    }
}

impl TryFrom<String> for ContentHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentHash> for String {
    fn from(value: ContentHash) -> Self {
        value.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Severity and sizing
// ---------------------------------------------------------------------------

/// Severity level shared by tasks and review findings.
///
/// Ordered from most to least severe so `Blocker < Important < Suggestion`
/// sorts blockers first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocks progression under every non-lenient policy.
    Blocker,
    /// Should be addressed; blocks only under the strict policy.
    Important,
    /// Advisory only.
    Suggestion,
}

impl Severity {
    /// Parses the `BLOCKER|IMPORTANT|SUGGESTION` tags used in review payloads,
    /// case-insensitively. Also accepts the task-priority spellings
    /// `high|medium|low`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "blocker" | "high" | "critical" => Some(Self::Blocker),
            "important" | "medium" => Some(Self::Important),
            "suggestion" | "low" | "nit" => Some(Self::Suggestion),
            _ => None,
        }
    }

    /// Upper-case tag as rendered in review comments.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Blocker => "BLOCKER",
            Self::Important => "IMPORTANT",
            Self::Suggestion => "SUGGESTION",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// T-shirt size estimate of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Estimate {
    S,
    M,
    L,
}

impl Estimate {
    /// Buckets an hour estimate: up to 4h is `S`, up to 16h is `M`, else `L`.
    pub fn from_hours(hours: u32) -> Self {
        match hours {
            0..=4 => Self::S,
            5..=16 => Self::M,
            _ => Self::L,
        }
    }

    /// Parses `S|M|L` (case-insensitive) or `small|medium|large`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "s" | "small" => Some(Self::S),
            "m" | "medium" => Some(Self::M),
            "l" | "large" => Some(Self::L),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_rejects_out_of_range() {
        assert!(Confidence::new(1.2).is_none());
        assert!(Confidence::new(f64::NAN).is_none());
        assert_eq!(Confidence::new(0.5).unwrap().as_f64(), 0.5);
    }

    #[test]
    fn content_hash_is_prefixed_sha256() {
        let h = ContentHash::of("");
        assert_eq!(
            h.as_str(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        let bare: ContentHash = "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855"
            .parse()
            .unwrap();
        assert_eq!(bare, h);
        assert!("sha256:abc".parse::<ContentHash>().is_err());
    }

    #[test]
    fn severity_tags_parse_case_insensitively() {
        assert_eq!(Severity::from_tag("BLOCKER"), Some(Severity::Blocker));
        assert_eq!(Severity::from_tag("important"), Some(Severity::Important));
        assert_eq!(Severity::from_tag("Suggestion"), Some(Severity::Suggestion));
        assert_eq!(Severity::from_tag("whatever"), None);
        assert!(Severity::Blocker < Severity::Suggestion);
    }

    #[test]
    fn estimate_buckets_hours() {
        assert_eq!(Estimate::from_hours(2), Estimate::S);
        assert_eq!(Estimate::from_hours(8), Estimate::M);
        assert_eq!(Estimate::from_hours(40), Estimate::L);
    }
}
