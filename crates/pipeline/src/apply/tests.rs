use super::*;
use crate::patch::{parse, Normalizer};

fn path(p: &str) -> RepoPath {
    RepoPath::new(p).unwrap()
}

fn applier() -> PatchApplier {
    PatchApplier::new(&PatchSettings::default())
}

fn ctx() -> StrategyContext {
    StrategyContext::from(&PatchSettings::default())
}

const CALC_OPS: &str = r#"The module:

```diff
--- /dev/null
+++ b/calc/ops.py
@@ -0,0 +1,14 @@
+def add(a, b):
+    return a + b
+
+def sub(a, b):
+    return a - b
+
+def mul(a, b):
+    return a * b
+
+def div(a, b):
+    if b == 0:
+        raise ZeroDivisionError("division by zero")
+    return a / b
+
```
"#;

#[test]
fn new_module_applies_with_strict_context() {
    let set = Normalizer::new(&PatchSettings::default())
        .normalize(CALC_OPS, |_| false)
        .unwrap();
    let tree = SourceTree::new();

    let (patched, result) = applier().apply(&tree, &set).unwrap();

    assert!(result.success);
    assert_eq!(result.strategy_used, Some(ApplyStrategy::StrictContext));
    assert_eq!(result.attempts.len(), 1);
    assert!(result.files_changed.contains(&path("calc/ops.py")));
    let text = patched.text(&path("calc/ops.py")).unwrap();
    assert!(text.starts_with("def add(a, b):\n"));
    assert!(text.contains("raise ZeroDivisionError"));
    assert!(text.ends_with("return a / b\n\n"));
}

#[test]
fn drifted_offset_is_found_inside_the_window() {
    let tree = SourceTree::new().with_text(path("src/m.py"), "# one\n# two\n# three\na\nb\nc\n");
    let set = parse("--- a/src/m.py\n+++ b/src/m.py\n@@ -1,3 +1,3 @@\n a\n-b\n+B\n c\n").unwrap();

    let (patched, result) = applier().apply(&tree, &set).unwrap();

    assert_eq!(result.strategy_used, Some(ApplyStrategy::StrictContext));
    assert_eq!(
        patched.text(&path("src/m.py")).unwrap(),
        "# one\n# two\n# three\na\nB\nc\n"
    );
}

#[test]
fn edge_context_drift_falls_back_to_fuzz() {
    let tree = SourceTree::new().with_text(path("src/f.py"), "def f():\n    x = 1\n    return x\n");
    let set = parse(
        "--- a/src/f.py\n+++ b/src/f.py\n@@ -1,3 +1,3 @@\n def g():\n-    x = 1\n+    x = 2\n     return x\n",
    )
    .unwrap();

    let (patched, result) = applier().apply(&tree, &set).unwrap();

    assert_eq!(result.strategy_used, Some(ApplyStrategy::ThreeWayMerge));
    assert_eq!(result.attempts[0].outcome, AttemptOutcome::Failed);
    assert_eq!(
        patched.text(&path("src/f.py")).unwrap(),
        "def f():\n    x = 2\n    return x\n"
    );
}

#[test]
fn base_snapshot_enables_three_way_merge() {
    let base = "a\nb\nc\nd\ne\n";
    let current = "n1\nn2\nn3\nn4\nn5\na\nb\nc\nd\ne\n";
    let tree = SourceTree::new().with_text(path("src/m.py"), current);
    let set = parse("--- a/src/m.py\n+++ b/src/m.py\n@@ -3,3 +3,3 @@\n c\n d\n-e\n+E\n")
        .unwrap()
        .with_base_snapshot(path("src/m.py"), base);
    let settings = PatchSettings {
        search_window: 2,
        ..PatchSettings::default()
    };

    let (patched, result) = PatchApplier::new(&settings).apply(&tree, &set).unwrap();

    assert_eq!(result.strategy_used, Some(ApplyStrategy::ThreeWayMerge));
    assert_eq!(
        patched.text(&path("src/m.py")).unwrap(),
        "n1\nn2\nn3\nn4\nn5\na\nb\nc\nd\nE\n"
    );
}

#[test]
fn trailing_whitespace_drift_uses_line_based_placement() {
    let tree = SourceTree::new().with_text(path("src/f.py"), "def f():\n    x = 1   \n    return x\n");
    let set = parse(
        "--- a/src/f.py\n+++ b/src/f.py\n@@ -1,3 +1,3 @@\n def f():\n-    x = 1\n+    x = 2\n     return x\n",
    )
    .unwrap();

    let (patched, result) = applier().apply(&tree, &set).unwrap();

    assert_eq!(result.strategy_used, Some(ApplyStrategy::LineBased));
    assert_eq!(
        patched.text(&path("src/f.py")).unwrap(),
        "def f():\n    x = 2\n    return x\n"
    );
}

#[test]
fn manual_creation_never_overwrites() {
    let tree = SourceTree::new().with_text(path("calc/ops.py"), "existing\n");
    let set = parse("--- /dev/null\n+++ b/calc/ops.py\n@@ -0,0 +1 @@\n+new\n").unwrap();

    let err = manual_creation(&ctx(), &tree, &set).unwrap_err();

    assert!(err.reason.contains("already exists"), "{err}");
}

#[test]
fn manual_creation_writes_added_lines() {
    let set = parse("--- /dev/null\n+++ b/docs/a.md\n@@ -0,0 +1,2 @@\n+# A\n+body\n\\ No newline at end of file\n").unwrap();
    let out = manual_creation(&ctx(), &SourceTree::new(), &set).unwrap();
    assert_eq!(out.text(&path("docs/a.md")).unwrap(), "# A\nbody");
}

#[test]
fn creation_over_existing_file_is_unresolvable() {
    let tree = SourceTree::new().with_text(path("calc/ops.py"), "existing\n");
    let set = parse("--- /dev/null\n+++ b/calc/ops.py\n@@ -0,0 +1 @@\n+new\n").unwrap();

    let err = applier().apply(&tree, &set).unwrap_err();

    assert_eq!(err.kind(), crate::errors::ErrorKind::UnresolvableConflict);
    let last = err.attempts().last().unwrap();
    assert_eq!(last.strategy, ApplyStrategy::ManualCreation);
    assert_eq!(last.outcome, AttemptOutcome::Failed);
}

#[test]
fn exhausted_chain_reports_every_attempt_and_leaves_tree_alone() {
    let tree = SourceTree::new().with_text(path("src/a.py"), "a\n");
    let before = tree.clone();
    let set = parse("--- a/src/a.py\n+++ b/src/a.py\n@@ -1 +1 @@\n-zzz\n+yyy\n").unwrap();

    let err = applier().apply(&tree, &set).unwrap_err();

    assert_eq!(tree, before);
    let outcomes: Vec<_> = err.attempts().iter().map(|a| a.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            AttemptOutcome::Failed,
            AttemptOutcome::Failed,
            AttemptOutcome::Failed,
            AttemptOutcome::Skipped
        ]
    );
    assert_eq!(err.failing_paths(), &[path("src/a.py")]);
    assert!(err.to_string().contains("src/a.py hunk 0"), "{err}");
}

#[test]
fn applying_then_inverting_restores_the_tree() {
    let tree = SourceTree::new().with_text(path("src/m.py"), "a\nb\nc\nd\n");
    let set = parse(
        "--- a/src/m.py\n+++ b/src/m.py\n@@ -1,4 +1,5 @@\n a\n-b\n+B\n c\n d\n+e\n\
         --- /dev/null\n+++ b/src/new.py\n@@ -0,0 +1,2 @@\n+x\n+y\n",
    )
    .unwrap();

    let (patched, _) = applier().apply(&tree, &set).unwrap();
    assert_eq!(patched.text(&path("src/m.py")).unwrap(), "a\nB\nc\nd\ne\n");
    assert!(patched.contains(&path("src/new.py")));

    let (restored, _) = applier().apply(&patched, &set.inverse()).unwrap();
    assert_eq!(restored, tree);
}

#[test]
fn crlf_files_keep_their_line_endings_through_apply_and_revert() {
    let original = "a\r\nb\r\nc\r\n";
    let tree = SourceTree::new().with_text(path("src/w.py"), original);
    let set = parse("--- a/src/w.py\n+++ b/src/w.py\n@@ -1,3 +1,3 @@\n a\n-b\n+B\n c\n").unwrap();

    let (patched, _) = applier().apply(&tree, &set).unwrap();
    assert_eq!(patched.text(&path("src/w.py")).unwrap(), "a\r\nB\r\nc\r\n");

    let (restored, _) = applier().apply(&patched, &set.inverse()).unwrap();
    assert_eq!(restored.text(&path("src/w.py")).unwrap(), original);
}

#[test]
fn mixed_line_endings_survive_untouched_lines() {
    let original = "a\r\nb\nc\n";
    let file = SourceFile::from_text(original);
    assert!(!file.crlf);
    assert_eq!(file.to_text(), original);

    let crlf = SourceFile::from_text("x\r\ny");
    assert!(crlf.crlf);
    assert!(!crlf.trailing_newline);
    assert_eq!(crlf.lines, vec!["x", "y"]);
    assert_eq!(crlf.to_text(), "x\r\ny");
}

#[test]
fn deletion_removes_the_file() {
    let tree = SourceTree::new().with_text(path("src/old.py"), "x\ny\n");
    let set = parse("--- a/src/old.py\n+++ /dev/null\n@@ -1,2 +0,0 @@\n-x\n-y\n").unwrap();

    let (patched, result) = applier().apply(&tree, &set).unwrap();

    assert!(!patched.contains(&path("src/old.py")));
    assert_eq!(
        patched.changes_since(&tree),
        vec![FileChange::delete(path("src/old.py"))]
    );
    assert!(result.files_changed.contains(&path("src/old.py")));
}

#[test]
fn missing_newline_marker_is_preserved() {
    let tree = SourceTree::new().with_text(path("src/a.txt"), "keep\nold");
    let set = parse(
        "--- a/src/a.txt\n+++ b/src/a.txt\n@@ -1,2 +1,2 @@\n keep\n-old\n\\ No newline at end of file\n+new\n\\ No newline at end of file\n",
    )
    .unwrap();

    let (patched, _) = applier().apply(&tree, &set).unwrap();

    assert_eq!(patched.text(&path("src/a.txt")).unwrap(), "keep\nnew");
}
