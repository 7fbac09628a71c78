//! Review Gate: turns findings into a merge verdict under a strictness policy.

use serde::{Deserialize, Serialize};

use crate::identifiers::{LabelName, PullRequestId, RepoPath};
use crate::payload::parse_json;
use crate::types::Severity;
use crate::workflow::{labels, Intent, Target};

/// First line of every review comment.
pub const REVIEW_MARKER: &str = "<!-- taskwright:review -->";

/// Strictness level deciding which findings block a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewPolicy {
    /// Blockers and important findings block.
    Strict,
    /// Only blockers block.
    #[default]
    #[serde(alias = "essential_only", alias = "essential")]
    EssentialOnly,
    /// Nothing blocks except a structural failure.
    Lenient,
}

impl ReviewPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::EssentialOnly => "essential-only",
            Self::Lenient => "lenient",
        }
    }

    /// The `policy:<name>` label carrying this policy.
    pub fn label(self) -> String {
        format!("{}{}", labels::POLICY_PREFIX, self.as_str())
    }

    /// Reads the policy from `policy:*` labels; the first recognized one wins.
    pub fn from_labels<'a>(names: impl IntoIterator<Item = &'a LabelName>) -> Option<Self> {
        names.into_iter().find_map(|l| {
            match l.as_str().strip_prefix(labels::POLICY_PREFIX)?.trim() {
                "strict" => Some(Self::Strict),
                "essential-only" | "essential_only" | "essential" => Some(Self::EssentialOnly),
                "lenient" => Some(Self::Lenient),
                _ => None,
            }
        })
    }

    /// Whether a finding of `severity` forces `need-fix` under this policy.
    pub fn blocks(self, severity: Severity) -> bool {
        match self {
            Self::Strict => severity <= Severity::Important,
            Self::EssentialOnly => severity == Severity::Blocker,
            Self::Lenient => false,
        }
    }
}

impl std::fmt::Display for ReviewPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub file: Option<RepoPath>,
    pub line: Option<u32>,
    pub message: String,
    pub suggestion: Option<String>,
}

impl Finding {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            file: None,
            line: None,
            message: message.into(),
            suggestion: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewOutcome {
    ReadyToMerge,
    NeedFix,
}

impl ReviewOutcome {
    /// The label that publishes this outcome.
    pub fn label(self) -> &'static str {
        match self {
            Self::ReadyToMerge => labels::READY_TO_MERGE,
            Self::NeedFix => labels::NEED_FIX,
        }
    }
}

impl std::fmt::Display for ReviewOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub policy: ReviewPolicy,
    /// Sorted blockers first; stable within a severity.
    pub findings: Vec<Finding>,
    pub outcome: ReviewOutcome,
    pub summary: String,
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawReview {
    #[serde(default)]
    findings: Vec<RawFinding>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    unmet_acceptance: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawFinding {
    #[serde(alias = "severity")]
    level: String,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    line: Option<u32>,
    message: String,
    #[serde(default)]
    suggestion: Option<String>,
}

/// Findings and summary read from a reviewer response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReviewReport {
    pub findings: Vec<Finding>,
    pub summary: String,
}

impl ReviewReport {
    /// Reads the review payload. Unknown levels count as suggestions; every
    /// unmet acceptance criterion becomes a blocker. A response with no
    /// readable payload yields a single important finding.
    pub fn from_response(response: &str) -> Self {
        let raw: RawReview = match parse_json(response) {
            Ok(raw) => raw,
            Err(reason) => {
                return Self {
                    findings: vec![Finding {
                        suggestion: Some(reason),
                        ..Finding::new(Severity::Important, "review response could not be parsed")
                    }],
                    summary: String::new(),
                }
            }
        };

        let mut findings: Vec<Finding> = raw
            .findings
            .into_iter()
            .map(|f| Finding {
                severity: Severity::from_tag(&f.level).unwrap_or(Severity::Suggestion),
                file: f.file.as_deref().and_then(RepoPath::normalized),
                line: f.line,
                message: f.message,
                suggestion: f.suggestion,
            })
            .collect();
        findings.extend(
            raw.unmet_acceptance
                .into_iter()
                .map(|c| Finding::new(Severity::Blocker, format!("Acceptance criterion not met: {c}"))),
        );
        Self {
            findings,
            summary: raw.summary,
        }
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

pub struct ReviewGate;

impl ReviewGate {
    /// Applies `policy` to `findings`. A structural failure (the change did
    /// not apply, the branch is missing) always yields `need-fix` and is
    /// recorded as a blocker.
    pub fn evaluate(
        policy: ReviewPolicy,
        report: ReviewReport,
        structural_failure: Option<&str>,
    ) -> ReviewVerdict {
        let mut findings = report.findings;
        if let Some(reason) = structural_failure {
            findings.insert(0, Finding::new(Severity::Blocker, format!("Structural failure: {reason}")));
        }
        findings.sort_by_key(|f| f.severity);

        let blocked = structural_failure.is_some() || findings.iter().any(|f| policy.blocks(f.severity));
        ReviewVerdict {
            policy,
            findings,
            outcome: if blocked {
                ReviewOutcome::NeedFix
            } else {
                ReviewOutcome::ReadyToMerge
            },
            summary: report.summary,
        }
    }
}

impl ReviewVerdict {
    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    /// Label changes on the pull request that publish this verdict.
    pub fn label_intents(&self, pr: PullRequestId) -> Vec<Intent> {
        let (add, remove) = match self.outcome {
            ReviewOutcome::NeedFix => (labels::NEED_FIX, labels::READY_TO_MERGE),
            ReviewOutcome::ReadyToMerge => (labels::READY_TO_MERGE, labels::NEED_FIX),
        };
        vec![
            Intent::RemoveLabel {
                target: Target::PullRequest(pr),
                label: remove.to_string(),
            },
            Intent::AddLabel {
                target: Target::PullRequest(pr),
                label: add.to_string(),
            },
        ]
    }

    /// Whether `body` is a comment written by [`ReviewVerdict::render_comment`].
    pub fn is_review_comment(body: &str) -> bool {
        body.trim_start().starts_with(REVIEW_MARKER)
    }

    /// Markdown comment: outcome, summary, and a findings table.
    pub fn render_comment(&self) -> String {
        let headline = match self.outcome {
            ReviewOutcome::ReadyToMerge => "✅ Ready to merge",
            ReviewOutcome::NeedFix => "🔧 Changes needed",
        };
        let mut out = format!(
            "{REVIEW_MARKER}\n## {headline}\n\nPolicy: `{}` · {} blocker, {} important, {} suggestion\n",
            self.policy,
            self.count(Severity::Blocker),
            self.count(Severity::Important),
            self.count(Severity::Suggestion),
        );
        if !self.summary.is_empty() {
            out.push('\n');
            out.push_str(self.summary.trim());
            out.push('\n');
        }
        if !self.findings.is_empty() {
            out.push_str("\n| Severity | Location | Finding |\n|---|---|---|\n");
            for f in &self.findings {
                let location = match (&f.file, f.line) {
                    (Some(file), Some(line)) => format!("`{file}:{line}`"),
                    (Some(file), None) => format!("`{file}`"),
                    _ => String::from("-"),
                };
                let mut text = f.message.replace('|', "\\|").replace('\n', " ");
                if let Some(s) = &f.suggestion {
                    text.push_str(&format!("<br>Suggestion: {}", s.replace('|', "\\|").replace('\n', " ")));
                }
                out.push_str(&format!("| {} | {location} | {text} |\n", f.severity));
            }
        }
        out
    }
}
