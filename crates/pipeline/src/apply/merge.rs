//! Line-level three-way merge.

use std::collections::BTreeMap;

/// Largest `base × side` product the LCS table may cover after trimming the
/// common prefix and suffix.
const MAX_LCS_CELLS: usize = 16_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeConflict {
    /// Both sides changed the same base region differently.
    Overlap { base_line: usize },
    /// The region left after trimming is too large to diff.
    TooLarge,
}

impl std::fmt::Display for MergeConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overlap { base_line } => {
                write!(f, "both sides changed the region at base line {base_line}")
            }
            Self::TooLarge => f.write_str("file too large for a three-way merge"),
        }
    }
}

/// Merges `ours` and `theirs`, both derived from `base`.
///
/// A region changed on one side only takes that side. A region changed
/// identically on both sides is taken once. Anything else is a conflict.
pub fn merge3(base: &[String], ours: &[String], theirs: &[String]) -> Result<Vec<String>, MergeConflict> {
    let to_ours = matching(base, ours)?;
    let to_theirs = matching(base, theirs)?;

    let mut merged = Vec::with_capacity(ours.len().max(theirs.len()));
    let (mut i, mut j, mut k) = (0usize, 0usize, 0usize);

    loop {
        // Next base line kept by both sides at or after the cursors.
        let anchor = (i..base.len()).find_map(|b| match (to_ours.get(&b), to_theirs.get(&b)) {
            (Some(&o), Some(&t)) if o >= j && t >= k => Some((b, o, t)),
            _ => None,
        });

        match anchor {
            Some((b, o, t)) if b == i && o == j && t == k => {
                merged.push(ours[j].clone());
                i += 1;
                j += 1;
                k += 1;
            }
            Some((b, o, t)) => {
                resolve(&base[i..b], &ours[j..o], &theirs[k..t], i + 1, &mut merged)?;
                i = b;
                j = o;
                k = t;
            }
            None => {
                resolve(&base[i..], &ours[j..], &theirs[k..], i + 1, &mut merged)?;
                return Ok(merged);
            }
        }
    }
}

fn resolve(
    base: &[String],
    ours: &[String],
    theirs: &[String],
    base_line: usize,
    out: &mut Vec<String>,
) -> Result<(), MergeConflict> {
    if ours == base {
        out.extend_from_slice(theirs);
    } else if theirs == base || ours == theirs {
        out.extend_from_slice(ours);
    } else {
        return Err(MergeConflict::Overlap { base_line });
    }
    Ok(())
}

/// Maps base indices to indices in `side` along a longest common subsequence.
fn matching(base: &[String], side: &[String]) -> Result<BTreeMap<usize, usize>, MergeConflict> {
    let prefix = base.iter().zip(side).take_while(|(a, b)| a == b).count();
    let suffix = base[prefix..]
        .iter()
        .rev()
        .zip(side[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let mut map: BTreeMap<usize, usize> = (0..prefix).map(|x| (x, x)).collect();

    let a = &base[prefix..base.len() - suffix];
    let b = &side[prefix..side.len() - suffix];
    if a.len().saturating_mul(b.len()) > MAX_LCS_CELLS {
        return Err(MergeConflict::TooLarge);
    }

    // lcs[x][y] = LCS length of a[x..] and b[y..]
    let width = b.len() + 1;
    let mut lcs = vec![0u32; (a.len() + 1) * width];
    for x in (0..a.len()).rev() {
        for y in (0..b.len()).rev() {
            lcs[x * width + y] = if a[x] == b[y] {
                lcs[(x + 1) * width + y + 1] + 1
            } else {
                lcs[(x + 1) * width + y].max(lcs[x * width + y + 1])
            };
        }
    }
    let (mut x, mut y) = (0usize, 0usize);
    while x < a.len() && y < b.len() {
        if a[x] == b[y] {
            map.insert(prefix + x, prefix + y);
            x += 1;
            y += 1;
        } else if lcs[(x + 1) * width + y] >= lcs[x * width + y + 1] {
            x += 1;
        } else {
            y += 1;
        }
    }

    for s in 0..suffix {
        map.insert(base.len() - suffix + s, side.len() - suffix + s);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn disjoint_edits_merge() {
        let base = v("a\nb\nc\nd\ne");
        let ours = v("A\nb\nc\nd\ne");
        let theirs = v("a\nb\nc\nd\nE");
        assert_eq!(merge3(&base, &ours, &theirs).unwrap(), v("A\nb\nc\nd\nE"));
    }

    #[test]
    fn identical_edits_merge_once() {
        let base = v("a\nb\nc");
        let both = v("a\nB\nc");
        assert_eq!(merge3(&base, &both, &both).unwrap(), both);
    }

    #[test]
    fn insertions_on_both_sides_at_different_places() {
        let base = v("a\nb\nc");
        let ours = v("x\na\nb\nc");
        let theirs = v("a\nb\nc\ny");
        assert_eq!(merge3(&base, &ours, &theirs).unwrap(), v("x\na\nb\nc\ny"));
    }

    #[test]
    fn overlapping_edits_conflict() {
        let base = v("a\nb\nc");
        let ours = v("a\nX\nc");
        let theirs = v("a\nY\nc");
        assert_eq!(
            merge3(&base, &ours, &theirs),
            Err(MergeConflict::Overlap { base_line: 2 })
        );
    }
}
