//! Cross-references in issue and pull request bodies.
//!
//! A pull request closes its task issue with `Closes #n` (or `Fixes` /
//! `Resolves`); a task issue names its parent with `Parent: #n`.

use std::sync::LazyLock;

use regex::Regex;

use crate::identifiers::{SubWorkItemId, WorkItemId};

static CLOSING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:close[sd]?|fix(?:e[sd])?|resolve[sd]?)\s*:?\s+#(\d+)\b").expect("static regex")
});

static PARENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bparent(?:\s+issue)?\**\s*:\s*#(\d+)\b").expect("static regex"));

/// Issue numbers closed by a pull request body, in order, without repeats.
pub fn closing_references(body: &str) -> Vec<SubWorkItemId> {
    let mut out: Vec<SubWorkItemId> = Vec::new();
    for caps in CLOSING.captures_iter(body) {
        if let Ok(n) = caps[1].parse() {
            let id = SubWorkItemId::new(n);
            if !out.contains(&id) {
                out.push(id);
            }
        }
    }
    out
}

/// The parent issue named in a task issue body.
pub fn parent_reference(body: &str) -> Option<WorkItemId> {
    let caps = PARENT.captures(body)?;
    caps[1].parse().ok().map(WorkItemId::new)
}

/// The line a task issue body carries to name its parent.
pub fn parent_line(parent: WorkItemId) -> String {
    format!("Parent: {parent}")
}

/// The line a pull request body carries to close its task issue.
pub fn closing_line(issue: SubWorkItemId) -> String {
    format!("Closes {issue}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closing_keywords_are_recognized() {
        let body = "Implements the ops.\n\nCloses #12\nfixes #14, Resolved: #12\nsee #99";
        assert_eq!(
            closing_references(body),
            vec![SubWorkItemId::new(12), SubWorkItemId::new(14)]
        );
    }

    #[test]
    fn parent_reference_accepts_bold_and_issue_forms() {
        assert_eq!(parent_reference("Parent: #10"), Some(WorkItemId::new(10)));
        assert_eq!(parent_reference("**Parent**: #7"), Some(WorkItemId::new(7)));
        assert_eq!(parent_reference("parent issue: #3"), Some(WorkItemId::new(3)));
        assert_eq!(parent_reference("no parent here #3"), None);
    }

    #[test]
    fn generated_lines_parse_back() {
        assert_eq!(parent_reference(&parent_line(WorkItemId::new(5))), Some(WorkItemId::new(5)));
        assert_eq!(
            closing_references(&closing_line(SubWorkItemId::new(6))),
            vec![SubWorkItemId::new(6)]
        );
    }
}
