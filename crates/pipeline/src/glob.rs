//! Repository path globs.
//!
//! Syntax:
//!
//! - `**/` matches zero or more leading directories; a trailing `/**` matches
//!   everything below a directory.
//! - `*` matches any run of characters within one path segment.
//! - `?` matches exactly one character other than `/`.
//! - A pattern without any `/` matches the file name at any depth
//!   (`*.md` matches `docs/guide.md`).

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::identifiers::RepoPath;

/// A compiled path glob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathGlob {
    pattern: String,
    regex: Regex,
}

impl PathGlob {
    /// Compiles `pattern`. Fails only for an empty pattern.
    pub fn new(pattern: &str) -> Result<Self, String> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err("empty glob pattern".to_string());
        }
        let source = translate(pattern);
        let regex = Regex::new(&source).map_err(|e| format!("glob '{pattern}': {e}"))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Returns the source pattern.
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Tests a repository-relative path.
    pub fn matches(&self, path: &RepoPath) -> bool {
        self.matches_str(path.as_str())
    }

    /// Tests a raw `/`-separated path string.
    pub fn matches_str(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

impl PartialEq for PathGlob {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for PathGlob {}

impl TryFrom<String> for PathGlob {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<PathGlob> for String {
    fn from(value: PathGlob) -> Self {
        value.pattern
    }
}

impl std::fmt::Display for PathGlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pattern)
    }
}

/// Compiles a list of patterns; the first bad pattern fails the whole list.
pub fn compile_all<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<PathGlob>, String> {
    patterns.iter().map(|p| PathGlob::new(p.as_ref())).collect()
}

fn translate(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2 + 8);
    out.push('^');
    if !pattern.contains('/') {
        out.push_str("(?:.*/)?");
    }

    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let at_segment_start = i == 0 || chars[i - 1] == '/';
                if at_segment_start && chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                    continue;
                }
                if at_segment_start && i + 2 == chars.len() && i > 0 {
                    // "dir/**": drop the slash already emitted so "dir" itself matches.
                    out.truncate(out.len() - 1);
                    out.push_str("(?:/.*)?");
                    i += 2;
                    continue;
                }
                out.push_str(".*");
                i += 2;
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            _ => {
                out.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }
    out.push('$');
    out
}
