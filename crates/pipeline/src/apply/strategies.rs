//! The four placement strategies.

use super::merge::merge3;
use super::{SourceFile, SourceTree, StrategyContext, StrategyFailure};
use crate::identifiers::RepoPath;
use crate::patch::{FileChangeKind, FileHunk, FilePatch, LineOp, PatchSet};

/// Where one hunk lands and what replaces the matched lines.
struct Placement {
    at: usize,
    remove: usize,
    insert: Vec<String>,
}

/// Places one hunk in `lines`. Arguments: current lines, the hunk, the
/// offset-adjusted expected index, and the lowest index the hunk may use.
type Locate<'a> = dyn Fn(&[String], &FileHunk, usize, usize) -> Result<Placement, String> + 'a;

// ---------------------------------------------------------------------------
// Strategy 1
// ---------------------------------------------------------------------------

/// Exact context at the recorded offset, then the nearest exact match within
/// `search_window` lines either side.
pub fn strict_context(
    ctx: &StrategyContext,
    tree: &SourceTree,
    patch: &PatchSet,
) -> Result<SourceTree, StrategyFailure> {
    let window = ctx.search_window;
    apply_with(tree, patch, &|lines, hunk, expected, min_pos| {
        let old = hunk.old_lines();
        nearest(lines.len(), old.len(), expected, min_pos, Some(window), |at| {
            exact_at(lines, &old, at)
        })
        .map(|at| Placement {
            at,
            remove: old.len(),
            insert: owned(hunk.new_lines()),
        })
        .ok_or_else(|| format!("context not found within {window} lines of line {}", expected + 1))
    })
}

// ---------------------------------------------------------------------------
// Strategy 2
// ---------------------------------------------------------------------------

/// Three-way merge for files with a base snapshot; fuzz matching otherwise.
///
/// The merge applies the hunks to the snapshot the agent saw, then merges
/// that result with the current content using the snapshot as the common
/// ancestor. Fuzz matching drops up to `fuzz` context lines from each hunk
/// edge and searches the whole file.
pub fn three_way_or_fuzz(
    ctx: &StrategyContext,
    tree: &SourceTree,
    patch: &PatchSet,
) -> Result<SourceTree, StrategyFailure> {
    let mut out = tree.clone();
    for file in &patch.files {
        match patch.base_snapshots.get(&file.path) {
            Some(base_text) if file.kind == FileChangeKind::Modify => {
                let base = SourceFile::from_text(base_text);
                let current = tree
                    .get(&file.path)
                    .ok_or_else(|| StrategyFailure::file(&file.path, "target does not exist"))?;
                let theirs = apply_file(&file.path, Some(&base), file, &|lines, hunk, expected, min_pos| {
                    let old = hunk.old_lines();
                    nearest(lines.len(), old.len(), expected, min_pos, None, |at| exact_at(lines, &old, at))
                        .map(|at| Placement {
                            at,
                            remove: old.len(),
                            insert: owned(hunk.new_lines()),
                        })
                        .ok_or_else(|| "hunk does not apply to the base snapshot".to_string())
                })?
                .ok_or_else(|| StrategyFailure::file(&file.path, "merge would delete the file"))?;
                let merged = merge3(&base.lines, &current.lines, &theirs.lines)
                    .map_err(|c| StrategyFailure::file(&file.path, c.to_string()))?;
                let trailing_newline = if theirs.trailing_newline != base.trailing_newline {
                    theirs.trailing_newline
                } else {
                    current.trailing_newline
                };
                out.insert(
                    file.path.clone(),
                    SourceFile {
                        lines: merged,
                        trailing_newline,
                        crlf: current.crlf,
                    },
                );
            }
            _ => {
                let fuzz = ctx.fuzz;
                let single = apply_file(&file.path, tree.get(&file.path), file, &|lines, hunk, expected, min_pos| {
                    fuzzy_place(lines, hunk, expected, min_pos, fuzz)
                })?;
                store(&mut out, file, single);
            }
        }
    }
    Ok(out)
}

fn fuzzy_place(
    lines: &[String],
    hunk: &FileHunk,
    expected: usize,
    min_pos: usize,
    fuzz: usize,
) -> Result<Placement, String> {
    if hunk.old_lines().is_empty() {
        return Ok(Placement {
            at: expected.clamp(min_pos, lines.len().max(min_pos)),
            remove: 0,
            insert: owned(hunk.new_lines()),
        });
    }
    let lead = hunk.lines.iter().take_while(|l| l.op == LineOp::Context).count();
    let trail = hunk
        .lines
        .iter()
        .rev()
        .take_while(|l| l.op == LineOp::Context)
        .count();

    for level in 0..=fuzz {
        let cut_front = level.min(lead);
        let cut_back = level.min(trail);
        if cut_front + cut_back >= hunk.lines.len() {
            break;
        }
        let body = &hunk.lines[cut_front..hunk.lines.len() - cut_back];
        let old: Vec<&str> = body
            .iter()
            .filter(|l| l.op != LineOp::Add)
            .map(|l| l.text.as_str())
            .collect();
        if old.is_empty() {
            continue;
        }
        let shifted = expected + cut_front;
        if let Some(at) = nearest(lines.len(), old.len(), shifted, min_pos, None, |at| exact_at(lines, &old, at)) {
            let insert = body
                .iter()
                .filter(|l| l.op != LineOp::Delete)
                .map(|l| l.text.clone())
                .collect();
            return Ok(Placement {
                at,
                remove: old.len(),
                insert,
            });
        }
    }
    Err(format!("no match with up to {fuzz} lines of fuzz"))
}

// ---------------------------------------------------------------------------
// Strategy 3
// ---------------------------------------------------------------------------

/// Classic patch placement ignoring trailing whitespace.
///
/// Deleted lines must match; context lines only need to reach
/// `min_similarity` in aggregate. The file's own context lines are kept so
/// drifted context is not overwritten. Among equal scores the candidate
/// nearest the recorded offset wins.
pub fn line_based(
    ctx: &StrategyContext,
    tree: &SourceTree,
    patch: &PatchSet,
) -> Result<SourceTree, StrategyFailure> {
    let min_similarity = ctx.min_similarity;
    apply_with(tree, patch, &|lines, hunk, expected, min_pos| {
        let old: Vec<(LineOp, &str)> = hunk
            .lines
            .iter()
            .filter(|l| l.op != LineOp::Add)
            .map(|l| (l.op, l.text.trim_end()))
            .collect();
        if old.is_empty() {
            return Ok(Placement {
                at: expected.clamp(min_pos, lines.len().max(min_pos)),
                remove: 0,
                insert: owned(hunk.new_lines()),
            });
        }
        if old.len() > lines.len() {
            return Err("hunk is longer than the file".to_string());
        }

        let mut best: Option<(usize, f64)> = None;
        for at in min_pos..=(lines.len() - old.len()) {
            let mut matched = 0usize;
            let mut deletes_ok = true;
            for (k, (op, text)) in old.iter().enumerate() {
                let same = lines[at + k].trim_end() == *text;
                if same {
                    matched += 1;
                } else if *op == LineOp::Delete {
                    deletes_ok = false;
                    break;
                }
            }
            if !deletes_ok {
                continue;
            }
            let score = matched as f64 / old.len() as f64;
            if score < min_similarity {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_at, best_score)) => {
                    score > best_score
                        || (score == best_score && at.abs_diff(expected) < best_at.abs_diff(expected))
                }
            };
            if better {
                best = Some((at, score));
            }
        }

        let (at, _) = best.ok_or_else(|| format!("no placement reaches {min_similarity:.2} similarity"))?;
        let mut cursor = at;
        let mut insert = Vec::with_capacity(hunk.new_range.len);
        for line in &hunk.lines {
            match line.op {
                LineOp::Context => {
                    insert.push(lines[cursor].clone());
                    cursor += 1;
                }
                LineOp::Delete => cursor += 1,
                LineOp::Add => insert.push(line.text.clone()),
            }
        }
        Ok(Placement {
            at,
            remove: old.len(),
            insert,
        })
    })
}

// ---------------------------------------------------------------------------
// Strategy 4
// ---------------------------------------------------------------------------

/// Creates new files verbatim from their added lines.
///
/// Only valid when every hunk of every file has an empty old range. An
/// existing target is always a failure: this strategy never overwrites.
pub fn manual_creation(
    _ctx: &StrategyContext,
    tree: &SourceTree,
    patch: &PatchSet,
) -> Result<SourceTree, StrategyFailure> {
    let mut out = tree.clone();
    for file in &patch.files {
        if !file.is_pure_creation() {
            return Err(StrategyFailure::file(
                &file.path,
                "manual creation requires every hunk to start from an empty range",
            ));
        }
        if tree.contains(&file.path) {
            return Err(StrategyFailure::file(
                &file.path,
                "target already exists; manual creation never overwrites",
            ));
        }
        let lines = file
            .hunks
            .iter()
            .flat_map(|h| h.lines.iter().map(|l| l.text.clone()))
            .collect();
        let trailing_newline = !file.hunks.last().is_some_and(|h| h.new_missing_newline);
        out.insert(
            file.path.clone(),
            SourceFile {
                lines,
                trailing_newline,
                crlf: false,
            },
        );
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Shared machinery
// ---------------------------------------------------------------------------

fn apply_with(tree: &SourceTree, patch: &PatchSet, locate: &Locate<'_>) -> Result<SourceTree, StrategyFailure> {
    let mut out = tree.clone();
    for file in &patch.files {
        let result = apply_file(&file.path, out.get(&file.path), file, locate)?;
        store(&mut out, file, result);
    }
    Ok(out)
}

fn store(out: &mut SourceTree, file: &FilePatch, result: Option<SourceFile>) {
    match result {
        Some(content) => out.insert(file.path.clone(), content),
        None => {
            out.remove(&file.path);
        }
    }
}

/// Applies every hunk of one file. `Ok(None)` means the file is deleted.
fn apply_file(
    path: &RepoPath,
    current: Option<&SourceFile>,
    file: &FilePatch,
    locate: &Locate<'_>,
) -> Result<Option<SourceFile>, StrategyFailure> {
    let mut content = match (file.kind, current) {
        (FileChangeKind::Create, Some(_)) => {
            return Err(StrategyFailure::file(path, "target already exists"));
        }
        (FileChangeKind::Create, None) => SourceFile {
            lines: Vec::new(),
            trailing_newline: true,
            crlf: false,
        },
        (_, Some(existing)) => existing.clone(),
        (_, None) => return Err(StrategyFailure::file(path, "target does not exist")),
    };

    let mut order: Vec<usize> = (0..file.hunks.len()).collect();
    order.sort_by_key(|&i| file.hunks[i].old_range.start);

    let mut offset: isize = 0;
    let mut min_pos = 0usize;
    for index in order {
        let hunk = &file.hunks[index];
        let expected = (hunk.old_range.first_index() as isize + offset).max(0) as usize;
        let placement = locate(&content.lines, hunk, expected, min_pos)
            .map_err(|reason| StrategyFailure::hunk(path, index, reason))?;

        let end = placement.at + placement.remove;
        let inserted = placement.insert.len();
        content.lines.splice(placement.at..end, placement.insert);
        offset += inserted as isize - placement.remove as isize;
        min_pos = placement.at + inserted;

        if min_pos == content.lines.len() {
            if hunk.new_missing_newline {
                content.trailing_newline = false;
            } else if hunk.old_missing_newline || inserted > 0 {
                content.trailing_newline = true;
            }
        }
    }

    if file.kind == FileChangeKind::Delete {
        if !content.lines.is_empty() {
            return Err(StrategyFailure::file(
                path,
                format!("deletion leaves {} lines behind", content.lines.len()),
            ));
        }
        return Ok(None);
    }
    Ok(Some(content))
}

/// Finds the candidate index closest to `expected` for which `matches` holds.
///
/// Candidates lie in `[min_pos, len - needed]`; `window` bounds the distance
/// from `expected` (`None` searches everything). Ties go to the lower index.
fn nearest(
    len: usize,
    needed: usize,
    expected: usize,
    min_pos: usize,
    window: Option<usize>,
    matches: impl Fn(usize) -> bool,
) -> Option<usize> {
    if needed > len {
        return None;
    }
    let last = len - needed;
    if min_pos > last {
        return None;
    }
    let expected = expected.clamp(min_pos, last);
    let reach = window.map_or(len, |w| w.min(len));
    for d in 0..=reach {
        if let Some(below) = expected.checked_sub(d) {
            if below >= min_pos && matches(below) {
                return Some(below);
            }
        }
        let above = expected + d;
        if d > 0 && above <= last && matches(above) {
            return Some(above);
        }
    }
    None
}

fn exact_at(lines: &[String], old: &[&str], at: usize) -> bool {
    old.iter().enumerate().all(|(k, text)| lines[at + k] == *text)
}

fn owned(lines: Vec<&str>) -> Vec<String> {
    lines.into_iter().map(str::to_string).collect()
}
