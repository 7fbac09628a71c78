//! Runtime configuration types.
//!
//! The file lives at `.taskwright/config.toml`. Parsing happens in the `cli`
//! crate; this module only defines the shape, the defaults, and validation.
//! Every section is optional and every field falls back to its default, so an
//! empty file is a valid configuration.
//!
//! Secrets never appear here. Tokens and API keys come from the environment.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::TaskwrightError;
use crate::glob::{compile_all, PathGlob};
use crate::graph::Complexity;
use crate::identifiers::{ProjectId, StatusFieldId, StatusOptionId};
use crate::review::ReviewPolicy;

/// Root of `.taskwright/config.toml`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub patch: PatchSettings,
    pub reface: RefaceSettings,
    pub review: ReviewSettings,
    pub workflow: WorkflowSettings,
    pub planning: PlanningSettings,
    pub llm: LlmSettings,
    pub repository: RepositorySettings,
    /// Project board mirroring. Absent disables mirroring entirely.
    pub project: Option<ProjectSettings>,
}

impl Settings {
    /// Rejects out-of-range values. Called once at load time.
    pub fn validate(&self) -> Result<(), TaskwrightError> {
        let fail = |message: String| Err(TaskwrightError::ConfigurationError { message });

        if self.patch.max_diff_bytes == 0 {
            return fail("patch.max_diff_bytes must be > 0".into());
        }
        if self.patch.max_files == 0 {
            return fail("patch.max_files must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.patch.min_similarity) {
            return fail("patch.min_similarity must be within [0, 1]".into());
        }
        if self.patch.allow.is_empty() {
            return fail("patch.allow must list at least one pattern".into());
        }
        if let Some(root) = &self.patch.project_root {
            let trimmed = root.trim_matches('/');
            if trimmed.is_empty() || trimmed.split('/').any(|s| s.is_empty() || s == "..") {
                return fail(format!("patch.project_root '{root}' is not a clean relative path"));
            }
        }
        if !(0.0..=1.0).contains(&self.reface.min_confidence) {
            return fail("reface.min_confidence must be within [0, 1]".into());
        }
        if self.reface.max_file_size == 0 {
            return fail("reface.max_file_size must be > 0".into());
        }
        for (ext, argv) in &self.reface.formatters {
            if argv.is_empty() || argv[0].trim().is_empty() {
                return fail(format!("reface.formatters.{ext} must be a non-empty command"));
            }
        }
        if self.workflow.max_fix_iterations == Some(0) {
            return fail("workflow.max_fix_iterations must be > 0 when set".into());
        }
        for (name, bounds) in [
            ("low", self.planning.low),
            ("medium", self.planning.medium),
            ("high", self.planning.high),
        ] {
            if bounds.min == 0 || bounds.min > bounds.max {
                return fail(format!(
                    "planning.{name} bounds must satisfy 0 < min <= max (got {}..={})",
                    bounds.min, bounds.max
                ));
            }
        }
        if self.llm.timeout_secs == 0 {
            return fail("llm.timeout_secs must be > 0".into());
        }
        if self.llm.max_tokens == 0 {
            return fail("llm.max_tokens must be > 0".into());
        }
        if self.repository.base_branch.trim().is_empty() {
            return fail("repository.base_branch must not be empty".into());
        }
        if let Some(project) = &self.project {
            for required in ["Backlog", "In Progress", "In Review", "Done"] {
                if !project.status_options.contains_key(required) {
                    return fail(format!("project.status_options is missing '{required}'"));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// [patch]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchSettings {
    /// A target must match at least one of these.
    pub allow: Vec<PathGlob>,
    /// A target matching any of these is rejected, whatever `allow` says.
    pub deny: Vec<PathGlob>,
    /// When set, every target must live below this directory.
    pub project_root: Option<String>,
    pub max_diff_bytes: usize,
    pub max_files: usize,
    /// Lines searched on either side of a hunk's recorded offset.
    pub search_window: usize,
    /// Context lines the fuzz strategy may drop at each hunk edge.
    pub fuzz: usize,
    /// Minimum fraction of matching context lines for line-based placement.
    pub min_similarity: f64,
}

const DEFAULT_ALLOW: &[&str] = &[
    "src/**", "lib/**", "utils/**", "app/**", "components/**", "projects/**",
    "**/*.py", "**/*.js", "**/*.ts", "**/*.jsx", "**/*.tsx", "**/*.java",
    "**/*.go", "**/*.rs", "**/*.php", "**/*.rb", "**/*.css", "**/*.scss",
    "**/*.html", "**/*.vue", "**/*.svelte", "tests/**", "test/**",
    "__tests__/**", "spec/**", "docs/**", "documentation/**", "*.md", "*.txt",
    "*.rst", "*.yml", "*.yaml", "*.json", "*.toml", "LICENSE*", "README*",
    "CHANGELOG*", "CONTRIBUTING*", "go.mod",
];

const DEFAULT_DENY: &[&str] = &[
    ".github/**", ".git/**", "infra/**", "infrastructure/**", "deploy/**",
    "deployment/**", "k8s/**", "terraform/**", "**/*.env", "**/.env", "**/.env.*",
    "**/secrets/**", "**/secret/**", "**/id_rsa*", "**/*.key", "**/*.pem",
    "**/*.p12", "**/*.jks", "**/ssh/**", ".aws/**", "**/credentials*",
    "**/*credential*", "**/token*", "**/docker-compose*.yml", "**/Dockerfile*",
    "**/*.dockerfile", "node_modules/**", "vendor/**", "venv/**",
    "__pycache__/**", "**/*.log", "logs/**", "tmp/**", "temp/**",
    ".taskwright/**",
];

impl Default for PatchSettings {
    fn default() -> Self {
        Self {
            allow: compile_all(DEFAULT_ALLOW).unwrap_or_default(),
            deny: compile_all(DEFAULT_DENY).unwrap_or_default(),
            project_root: None,
            max_diff_bytes: 800_000,
            max_files: 20,
            search_window: 64,
            fuzz: 2,
            min_similarity: 0.75,
        }
    }
}

// ---------------------------------------------------------------------------
// [reface]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefaceSettings {
    pub enabled: bool,
    pub min_confidence: f64,
    /// Fresh proposals requested after a `BaseChanged` rejection.
    pub max_retries: u32,
    pub max_file_size: usize,
    pub auto_format: bool,
    /// Formatter command per file extension; the file path is appended.
    pub formatters: BTreeMap<String, Vec<String>>,
    pub format_timeout_secs: u64,
    /// Request full-file proposals when every diff strategy fails.
    pub escalate_on_conflict: bool,
}

impl Default for RefaceSettings {
    fn default() -> Self {
        let mut formatters = BTreeMap::new();
        formatters.insert("py".to_string(), vec!["black".to_string(), "-q".to_string()]);
        formatters.insert("rs".to_string(), vec!["rustfmt".to_string()]);
        formatters.insert("go".to_string(), vec!["gofmt".to_string(), "-w".to_string()]);
        Self {
            enabled: true,
            min_confidence: 0.75,
            max_retries: 1,
            max_file_size: 1_000_000,
            auto_format: false,
            formatters,
            format_timeout_secs: 60,
            escalate_on_conflict: true,
        }
    }
}

// ---------------------------------------------------------------------------
// [review] / [workflow]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewSettings {
    /// Applied when a pull request carries no `policy:*` label.
    pub default_policy: ReviewPolicy,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Need-fix iterations allowed per task before escalation. `None` is unbounded.
    pub max_fix_iterations: Option<u32>,
}

// ---------------------------------------------------------------------------
// [repository]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositorySettings {
    /// Branch task branches start from and pull requests target.
    pub base_branch: String,
    /// Task branches are named `<prefix>/issue-<parent>-t<task>`.
    pub branch_prefix: String,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            base_branch: "main".into(),
            branch_prefix: "taskwright".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// [planning]
// ---------------------------------------------------------------------------

/// Inclusive task-count bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCountBounds {
    pub min: usize,
    pub max: usize,
}

impl TaskCountBounds {
    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn contains(self, count: usize) -> bool {
        (self.min..=self.max).contains(&count)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningSettings {
    /// Regeneration requests after a rejected plan.
    pub max_regenerations: u32,
    pub low: TaskCountBounds,
    pub medium: TaskCountBounds,
    pub high: TaskCountBounds,
    /// Descriptions shorter than this are treated as trivial single edits.
    pub min_description_words: usize,
}

impl PlanningSettings {
    pub fn bounds_for(&self, complexity: Complexity) -> TaskCountBounds {
        match complexity {
            Complexity::Low => self.low,
            Complexity::Medium => self.medium,
            Complexity::High => self.high,
        }
    }
}

impl Default for PlanningSettings {
    fn default() -> Self {
        Self {
            max_regenerations: 2,
            low: TaskCountBounds::new(1, 2),
            medium: TaskCountBounds::new(2, 4),
            high: TaskCountBounds::new(3, 6),
            min_description_words: 6,
        }
    }
}

// ---------------------------------------------------------------------------
// [llm]
// ---------------------------------------------------------------------------

/// Supported model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    /// Environment variable holding this provider's credential.
    pub fn credential_var(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o-mini",
            Self::Anthropic => "claude-3-5-sonnet-latest",
            Self::Gemini => "gemini-1.5-flash",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Explicit provider. When `None`, the first provider with a credential in
    /// the environment wins, in the order OpenAI, Anthropic, Gemini.
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    /// Back-off before the single retry of a transient failure.
    pub retry_backoff_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            timeout_secs: 120,
            max_tokens: 4096,
            retry_backoff_ms: 2_000,
        }
    }
}

// ---------------------------------------------------------------------------
// [project]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub project_id: ProjectId,
    pub status_field_id: StatusFieldId,
    /// Status name (`Backlog`, `In Progress`, `In Review`, `Done`) to option id.
    pub status_options: BTreeMap<String, StatusOptionId>,
}
