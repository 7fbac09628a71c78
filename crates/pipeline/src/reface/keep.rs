//! KEEP regions: spans a full-file rewrite must carry over byte for byte.
//!
//! A region opens with `>>> KEEP:<id>` and closes with `<<< KEEP:<id>`, each
//! behind whatever comment leader the language uses (`#`, `//`, `<!--`, `--`).
//! The region text includes both marker lines.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">>>\s*KEEP:(?P<id>[A-Za-z0-9_\-]+)").expect("static regex"));
static CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<<<\s*KEEP:(?P<id>[A-Za-z0-9_\-]+)").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepRegion {
    pub id: String,
    /// 1-based line of the opening marker.
    pub start_line: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeepMarkerError {
    #[error("KEEP:{inner} opened at line {line} inside KEEP:{outer}")]
    Nested { outer: String, inner: String, line: usize },

    #[error("KEEP:{opened} closed as KEEP:{closed} at line {line}")]
    Mismatched { opened: String, closed: String, line: usize },

    #[error("KEEP:{id} closed at line {line} without an opening marker")]
    StrayClose { id: String, line: usize },

    #[error("KEEP:{id} appears twice (second at line {line})")]
    Duplicate { id: String, line: usize },

    #[error("KEEP:{id} opened at line {line} is never closed")]
    Unclosed { id: String, line: usize },
}

/// Extracts every KEEP region in order of appearance.
pub fn extract_keep_regions(content: &str) -> Result<Vec<KeepRegion>, KeepMarkerError> {
    let mut regions: Vec<KeepRegion> = Vec::new();
    let mut open: Option<(String, usize, Vec<&str>)> = None;

    for (idx, line) in content.split('\n').enumerate() {
        let line_no = idx + 1;
        if let Some(caps) = OPEN.captures(line) {
            let id = caps["id"].to_string();
            if let Some((outer, _, _)) = &open {
                return Err(KeepMarkerError::Nested {
                    outer: outer.clone(),
                    inner: id,
                    line: line_no,
                });
            }
            if regions.iter().any(|r| r.id == id) {
                return Err(KeepMarkerError::Duplicate { id, line: line_no });
            }
            open = Some((id, line_no, vec![line]));
            continue;
        }
        if let Some(caps) = CLOSE.captures(line) {
            let id = caps["id"].to_string();
            match open.take() {
                None => return Err(KeepMarkerError::StrayClose { id, line: line_no }),
                Some((opened, _, _)) if opened != id => {
                    return Err(KeepMarkerError::Mismatched {
                        opened,
                        closed: id,
                        line: line_no,
                    })
                }
                Some((opened, start_line, mut lines)) => {
                    lines.push(line);
                    regions.push(KeepRegion {
                        id: opened,
                        start_line,
                        text: lines.join("\n"),
                    });
                }
            }
            continue;
        }
        if let Some((_, _, lines)) = &mut open {
            lines.push(line);
        }
    }

    match open {
        Some((id, line, _)) => Err(KeepMarkerError::Unclosed { id, line }),
        None => Ok(regions),
    }
}

/// Why a rewrite failed to preserve a region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeepViolation {
    Removed { id: String },
    Modified { id: String },
    /// A region the proposal declared does not exist in the original.
    Undeclared { id: String },
}

impl std::fmt::Display for KeepViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Removed { id } => write!(f, "KEEP:{id} was removed"),
            Self::Modified { id } => write!(f, "KEEP:{id} was modified"),
            Self::Undeclared { id } => write!(f, "KEEP:{id} does not exist in the original"),
        }
    }
}

/// Every region of `original` must appear verbatim in `rewritten`. New
/// regions in `rewritten` are allowed.
pub fn find_violation(original: &[KeepRegion], rewritten: &[KeepRegion]) -> Option<KeepViolation> {
    original.iter().find_map(|region| {
        match rewritten.iter().find(|r| r.id == region.id) {
            None => Some(KeepViolation::Removed {
                id: region.id.clone(),
            }),
            Some(r) if r.text != region.text => Some(KeepViolation::Modified {
                id: region.id.clone(),
            }),
            Some(_) => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGINAL: &str = "\
import os
# >>> KEEP:license
# Copyright Acme
# <<< KEEP:license
def f():
    // >>> KEEP:hot-path
    return 1
    // <<< KEEP:hot-path
";

    #[test]
    fn regions_include_markers_and_any_leader() {
        let regions = extract_keep_regions(ORIGINAL).unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].id, "license");
        assert_eq!(regions[0].start_line, 2);
        assert_eq!(
            regions[0].text,
            "# >>> KEEP:license\n# Copyright Acme\n# <<< KEEP:license"
        );
        assert_eq!(regions[1].id, "hot-path");
    }

    #[test]
    fn malformed_markers_are_rejected() {
        assert!(matches!(
            extract_keep_regions("# >>> KEEP:a\n# >>> KEEP:b\n# <<< KEEP:b\n# <<< KEEP:a"),
            Err(KeepMarkerError::Nested { .. })
        ));
        assert!(matches!(
            extract_keep_regions("# >>> KEEP:a\n# <<< KEEP:b"),
            Err(KeepMarkerError::Mismatched { .. })
        ));
        assert!(matches!(
            extract_keep_regions("# >>> KEEP:a\nx"),
            Err(KeepMarkerError::Unclosed { line: 1, .. })
        ));
        assert!(matches!(
            extract_keep_regions("# <<< KEEP:a"),
            Err(KeepMarkerError::StrayClose { .. })
        ));
        assert!(matches!(
            extract_keep_regions("# >>> KEEP:a\n# <<< KEEP:a\n# >>> KEEP:a\n# <<< KEEP:a"),
            Err(KeepMarkerError::Duplicate { line: 3, .. })
        ));
    }

    #[test]
    fn preservation_detects_edits_and_removals() {
        let original = extract_keep_regions(ORIGINAL).unwrap();
        let edited = ORIGINAL.replace("Copyright Acme", "Copyright Other");
        let removed = ORIGINAL.replace("    // >>> KEEP:hot-path\n    return 1\n    // <<< KEEP:hot-path\n", "");

        assert_eq!(
            find_violation(&original, &extract_keep_regions(&edited).unwrap()),
            Some(KeepViolation::Modified { id: "license".into() })
        );
        assert_eq!(
            find_violation(&original, &extract_keep_regions(&removed).unwrap()),
            Some(KeepViolation::Removed { id: "hot-path".into() })
        );
        let moved = format!("{ORIGINAL}\n# extra\n");
        assert_eq!(find_violation(&original, &extract_keep_regions(&moved).unwrap()), None);
    }
}
