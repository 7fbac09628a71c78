//! Extraction, coercion, and parsing of unified diffs.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};

use super::{
    FileChangeKind, FileHunk, FilePatch, HunkLine, LineOp, LineRange, PatchError, PatchSet, PathPolicy,
};
use crate::config::PatchSettings;
use crate::identifiers::RepoPath;

static DIFF_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:diff|patch)[^\n]*\n([\s\S]*?)```").expect("static regex"));
static HEADER_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```[^\n]*\n(---[\s\S]*?\+\+\+[\s\S]*?)```").expect("static regex")
});
static ANY_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[^\n]*\n([\s\S]*?)```").expect("static regex"));
static OLD_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^--- \S").expect("static regex"));
static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("static regex")
});

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Pulls the unified diff out of an agent response.
///
/// Prefers ```` ```diff ```` / ```` ```patch ```` fences, then any fence whose
/// body carries `---`/`+++` headers, then any fence at all. A response with no
/// fences is taken as a bare diff. Multiple blocks are concatenated. A
/// `diff --git` preamble is trimmed to the first `--- ` header and non-ASCII
/// characters are dropped.
pub fn extract_diff(response: &str) -> Result<String, PatchError> {
    if response.trim().is_empty() {
        return Err(PatchError::NoDiff {
            reason: "empty response".into(),
        });
    }

    let mut blocks: Vec<&str> = Vec::new();
    for fence in [&*DIFF_FENCE, &*HEADER_FENCE, &*ANY_FENCE] {
        blocks = fence
            .captures_iter(response)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        if !blocks.is_empty() {
            break;
        }
    }
    if blocks.is_empty() {
        blocks.push(response);
    }

    let parts: Vec<&str> = blocks
        .into_iter()
        .filter_map(|block| {
            let start = OLD_HEADER.find(block)?.start();
            Some(block[start..].trim_end_matches(['\n', '\r']))
        })
        .collect();

    if parts.is_empty() {
        return Err(PatchError::NoDiff {
            reason: "no block carries a '--- ' file header".into(),
        });
    }

    Ok(parts.join("\n").chars().filter(char::is_ascii).collect())
}

// ---------------------------------------------------------------------------
// Coercion
// ---------------------------------------------------------------------------

/// Repairs common formatting drift.
///
/// Line endings become LF and the text ends with a newline. Inside a hunk,
/// while the header's line counts are not yet satisfied, a line with no
/// `' '`, `'+'`, `'-'`, or `'\'` prefix is taken as context and gains a
/// leading space.
pub fn coerce(diff: &str) -> String {
    let text = diff.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(text.len() + 64);
    let mut remaining: Option<(usize, usize)> = None;

    for line in text.lines() {
        if let Some((old, new)) = hunk_counts(line) {
            remaining = Some((old, new));
            out.push_str(line);
            out.push('\n');
            continue;
        }
        match remaining {
            Some((old, new)) if old > 0 || new > 0 => {
                let (fixed, op) = match line.chars().next() {
                    Some('+') => (line.to_string(), Some(LineOp::Add)),
                    Some('-') => (line.to_string(), Some(LineOp::Delete)),
                    Some(' ') => (line.to_string(), Some(LineOp::Context)),
                    Some('\\') => (line.to_string(), None),
                    _ => (format!(" {line}"), Some(LineOp::Context)),
                };
                remaining = Some(match op {
                    Some(LineOp::Add) => (old, new.saturating_sub(1)),
                    Some(LineOp::Delete) => (old.saturating_sub(1), new),
                    Some(LineOp::Context) => (old.saturating_sub(1), new.saturating_sub(1)),
                    None => (old, new),
                });
                out.push_str(&fixed);
            }
            _ => out.push_str(line),
        }
        out.push('\n');
    }
    out
}

fn hunk_counts(line: &str) -> Option<(usize, usize)> {
    let caps = HUNK_HEADER.captures(line)?;
    let count = |i: usize| {
        caps.get(i)
            .map_or(Some(1), |m| m.as_str().parse::<usize>().ok())
    };
    Some((count(2)?, count(4)?))
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parses unified-diff text into a [`PatchSet`].
///
/// Text outside file sections (`diff --git`, `index`, mode lines, prose) is
/// skipped. Sections for the same path are merged.
pub fn parse(diff: &str) -> Result<PatchSet, PatchError> {
    let lines: Vec<&str> = diff.lines().collect();
    let mut files: Vec<FilePatch> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if let Some(old_rest) = line.strip_prefix("--- ") {
            let new_rest = lines
                .get(i + 1)
                .and_then(|l| l.strip_prefix("+++ "))
                .ok_or_else(|| PatchError::malformed(i + 1, "'--- ' header is not followed by '+++ '"))?;
            let (path, kind) = file_target(i + 1, old_rest, new_rest)?;
            i += 2;

            let mut hunks = Vec::new();
            while i < lines.len() && lines[i].starts_with("@@") {
                let (hunk, next) = parse_hunk(&lines, i, &path, hunks.len())?;
                hunks.push(hunk);
                i = next;
            }
            if hunks.is_empty() {
                return Err(PatchError::malformed(i + 1, format!("no '@@' hunk header for {path}")));
            }
            check_kind(&path, kind, &hunks, i)?;

            match files.iter().position(|f| f.path == path) {
                Some(idx) if files[idx].kind == kind => files[idx].hunks.extend(hunks),
                Some(_) => {
                    return Err(PatchError::malformed(
                        i,
                        format!("conflicting headers for {path}"),
                    ))
                }
                None => files.push(FilePatch { path, kind, hunks }),
            }
        } else if line.starts_with("+++ ") {
            return Err(PatchError::malformed(i + 1, "'+++ ' header without a preceding '--- '"));
        } else if line.starts_with("@@") {
            return Err(PatchError::malformed(i + 1, "hunk header outside of a file section"));
        } else {
            i += 1;
        }
    }

    if files.is_empty() {
        return Err(PatchError::malformed(1, "missing '---'/'+++' file headers"));
    }
    Ok(PatchSet {
        files,
        ..PatchSet::default()
    })
}

fn header_path(line_no: usize, rest: &str) -> Result<Option<RepoPath>, PatchError> {
    let raw = rest.split('\t').next().unwrap_or_default().trim();
    if raw == "/dev/null" {
        return Ok(None);
    }
    let stripped = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw);
    RepoPath::normalized(stripped)
        .map(Some)
        .ok_or_else(|| PatchError::malformed(line_no, "empty path in file header"))
}

fn file_target(
    line_no: usize,
    old_rest: &str,
    new_rest: &str,
) -> Result<(RepoPath, FileChangeKind), PatchError> {
    let old = header_path(line_no, old_rest)?;
    let new = header_path(line_no + 1, new_rest)?;
    match (old, new) {
        (None, None) => Err(PatchError::malformed(line_no, "both sides of the header are /dev/null")),
        (None, Some(new)) => Ok((new, FileChangeKind::Create)),
        (Some(old), None) => Ok((old, FileChangeKind::Delete)),
        (Some(old), Some(new)) if old != new => Err(PatchError::malformed(
            line_no,
            format!("renames are not supported ({old} -> {new})"),
        )),
        (Some(_), Some(new)) => Ok((new, FileChangeKind::Modify)),
    }
}

fn is_file_header(lines: &[&str], i: usize) -> bool {
    lines[i].starts_with("--- ") && lines.get(i + 1).is_some_and(|l| l.starts_with("+++ "))
}

fn parse_hunk(
    lines: &[&str],
    start: usize,
    path: &RepoPath,
    hunk_index: usize,
) -> Result<(FileHunk, usize), PatchError> {
    let caps = HUNK_HEADER
        .captures(lines[start])
        .ok_or_else(|| PatchError::malformed(start + 1, format!("unreadable hunk header '{}'", lines[start])))?;
    let num = |i: usize, default: usize| -> Result<usize, PatchError> {
        caps.get(i).map_or(Ok(default), |m| {
            m.as_str()
                .parse()
                .map_err(|_| PatchError::malformed(start + 1, "hunk range out of bounds"))
        })
    };
    let old_range = LineRange::new(num(1, 0)?, num(2, 1)?);
    let new_range = LineRange::new(num(3, 0)?, num(4, 1)?);

    let mut hunk = FileHunk {
        path: path.clone(),
        old_range,
        new_range,
        lines: Vec::new(),
        old_missing_newline: false,
        new_missing_newline: false,
    };
    let (mut found_old, mut found_new) = (0usize, 0usize);
    let mut j = start + 1;

    while j < lines.len() {
        let line = lines[j];
        if line.starts_with('\\') {
            match hunk.lines.last().map(|l| l.op) {
                Some(LineOp::Context) => {
                    hunk.old_missing_newline = true;
                    hunk.new_missing_newline = true;
                }
                Some(LineOp::Delete) => hunk.old_missing_newline = true,
                Some(LineOp::Add) => hunk.new_missing_newline = true,
                None => {}
            }
            j += 1;
            continue;
        }
        if line.starts_with("@@") || is_file_header(lines, j) {
            break;
        }
        let satisfied = found_old >= old_range.len && found_new >= new_range.len;
        let (op, text) = match line.chars().next() {
            Some(' ') => (LineOp::Context, &line[1..]),
            Some('+') => (LineOp::Add, &line[1..]),
            Some('-') => (LineOp::Delete, &line[1..]),
            None if !satisfied => (LineOp::Context, ""),
            _ => break,
        };
        match op {
            LineOp::Context => {
                found_old += 1;
                found_new += 1;
            }
            LineOp::Delete => found_old += 1,
            LineOp::Add => found_new += 1,
        }
        hunk.lines.push(HunkLine::new(op, text));
        j += 1;
    }

    hunk.check_consistency(hunk_index)?;
    Ok((hunk, j))
}

fn check_kind(
    path: &RepoPath,
    kind: FileChangeKind,
    hunks: &[FileHunk],
    line_no: usize,
) -> Result<(), PatchError> {
    match kind {
        FileChangeKind::Create if hunks.iter().any(|h| h.lines.iter().any(|l| l.op != LineOp::Add)) => {
            Err(PatchError::malformed(
                line_no,
                format!("creation of {path} carries context or deleted lines"),
            ))
        }
        FileChangeKind::Delete if hunks.iter().any(|h| !h.new_range.is_empty()) => Err(PatchError::malformed(
            line_no,
            format!("deletion of {path} leaves lines behind"),
        )),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Front end
// ---------------------------------------------------------------------------

/// Runs the full normalization pipeline under one [`PatchSettings`].
#[derive(Debug, Clone)]
pub struct Normalizer {
    max_diff_bytes: usize,
    max_files: usize,
    policy: PathPolicy,
}

impl Normalizer {
    pub fn new(settings: &PatchSettings) -> Self {
        Self {
            max_diff_bytes: settings.max_diff_bytes,
            max_files: settings.max_files,
            policy: PathPolicy::from_settings(settings),
        }
    }

    pub fn policy(&self) -> &PathPolicy {
        &self.policy
    }

    /// Extracts, coerces, parses, reconciles, and policy-checks a diff.
    ///
    /// `exists` reports whether a path is present in the working tree.
    #[instrument(skip_all, fields(response_bytes = response.len()))]
    pub fn normalize(
        &self,
        response: &str,
        exists: impl Fn(&RepoPath) -> bool,
    ) -> Result<PatchSet, PatchError> {
        let diff = extract_diff(response)?;
        if diff.len() > self.max_diff_bytes {
            return Err(PatchError::TooLarge {
                bytes: diff.len(),
                limit: self.max_diff_bytes,
            });
        }
        let mut set = parse(&coerce(&diff))?;
        if set.files.len() > self.max_files {
            return Err(PatchError::TooManyFiles {
                count: set.files.len(),
                limit: self.max_files,
            });
        }
        set.normalize_headers(exists);
        self.policy.check_set(&set)?;
        debug!(files = set.files.len(), hunks = set.hunk_count(), "diff normalized");
        Ok(set)
    }
}
