//! Syntax validation with tree-sitter grammars.

use pipeline::ports::SourceValidator;
use pipeline::RepoPath;
use tracing::debug;
use tree_sitter::{Language, Node, Parser};

/// Parses content with the grammar matching the file extension and rejects
/// any tree containing an error or missing node. Files in languages without
/// a grammar pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeSitterValidator;

impl TreeSitterValidator {
    pub fn new() -> Self {
        Self
    }
}

fn language_for(path: &RepoPath) -> Option<Language> {
    let ext = path.as_str().rsplit_once('.')?.1.to_ascii_lowercase();
    let language = match ext.as_str() {
        "rs" => tree_sitter_rust::LANGUAGE.into(),
        "js" | "jsx" | "mjs" | "cjs" => tree_sitter_javascript::LANGUAGE.into(),
        "ts" | "mts" | "cts" => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        "tsx" => tree_sitter_typescript::LANGUAGE_TSX.into(),
        "py" | "pyi" => tree_sitter_python::LANGUAGE.into(),
        "go" => tree_sitter_go::LANGUAGE.into(),
        _ => return None,
    };
    Some(language)
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_error)
}

impl SourceValidator for TreeSitterValidator {
    fn validate(&self, path: &RepoPath, content: &str) -> Result<(), String> {
        let Some(language) = language_for(path) else {
            debug!(path = %path, "no grammar, skipping syntax check");
            return Ok(());
        };
        let mut parser = Parser::new();
        parser
            .set_language(&language)
            .map_err(|e| format!("grammar for {path} could not be loaded: {e}"))?;
        let tree = parser
            .parse(content, None)
            .ok_or_else(|| format!("parser gave up on {path}"))?;
        let root = tree.root_node();
        match first_error(root) {
            None => Ok(()),
            Some(node) => {
                let at = node.start_position();
                let what = if node.is_missing() {
                    format!("missing `{}`", node.kind())
                } else {
                    "unexpected input".to_string()
                };
                Err(format!(
                    "syntax error in {path} at line {}, column {}: {what}",
                    at.row + 1,
                    at.column + 1
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> RepoPath {
        RepoPath::new(p).expect("path")
    }

    #[test]
    fn valid_python_passes() {
        let content = "def add(a, b):\n    return a + b\n";
        assert_eq!(TreeSitterValidator.validate(&path("calc/ops.py"), content), Ok(()));
    }

    #[test]
    fn broken_rust_reports_line() {
        let content = "fn main() {\n    let x = ;\n}\n";
        let err = TreeSitterValidator
            .validate(&path("src/main.rs"), content)
            .expect_err("should fail");
        assert!(err.contains("src/main.rs"), "{err}");
        assert!(err.contains("line 2"), "{err}");
    }

    #[test]
    fn unclosed_brace_in_go_fails() {
        let content = "package main\n\nfunc main() {\n";
        assert!(TreeSitterValidator.validate(&path("main.go"), content).is_err());
    }

    #[test]
    fn tsx_uses_the_jsx_grammar() {
        let content = "const App = () => <div>hi</div>;\n";
        assert_eq!(TreeSitterValidator.validate(&path("web/App.tsx"), content), Ok(()));
    }

    #[test]
    fn unknown_languages_pass() {
        assert_eq!(TreeSitterValidator.validate(&path("README.md"), "# {{{"), Ok(()));
        assert_eq!(TreeSitterValidator.validate(&path("Makefile"), "all:\n\t("), Ok(()));
    }
}
