//! Line-based unified diff for raw simulator transcripts.
//!
//! Uses a longest-common-subsequence table over the lines between the common
//! prefix and suffix. Transcripts that differ in a few places stay cheap;
//! two long, completely different transcripts still cost `n * m`.

use std::fmt::Write;

/// Context lines shown around each change by default.
pub const DEFAULT_CONTEXT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit {
    Equal,
    Delete,
    Insert,
}

/// One edit plus the line positions in `old`/`new` just before it applies.
#[derive(Debug, Clone, Copy)]
struct Step {
    edit: Edit,
    old_pos: usize,
    new_pos: usize,
}

fn equal(old_pos: usize, new_pos: usize) -> Step {
    Step {
        edit: Edit::Equal,
        old_pos,
        new_pos,
    }
}

/// Edit script from `old` to `new`. The common prefix and suffix are
/// matched directly so the LCS table only covers the region that differs.
fn lcs_steps(old: &[&str], new: &[&str]) -> Vec<Step> {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let (old_end, new_end) = (old.len() - suffix, new.len() - suffix);

    let mut steps = Vec::with_capacity(old.len() + new.len());
    steps.extend((0..prefix).map(|k| equal(k, k)));
    middle_steps(&old[prefix..old_end], &new[prefix..new_end], prefix, &mut steps);
    steps.extend((0..suffix).map(|k| equal(old_end + k, new_end + k)));
    steps
}

fn middle_steps(old: &[&str], new: &[&str], offset: usize, steps: &mut Vec<Step>) {
    let (n, m) = (old.len(), new.len());
    // table[i][j] = LCS length of old[i..] and new[j..]
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if old[i] == new[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n || j < m {
        let edit = if i < n && j < m && old[i] == new[j] {
            Edit::Equal
        } else if j == m || (i < n && table[i + 1][j] >= table[i][j + 1]) {
            Edit::Delete
        } else {
            Edit::Insert
        };
        steps.push(Step {
            edit,
            old_pos: offset + i,
            new_pos: offset + j,
        });
        match edit {
            Edit::Equal => {
                i += 1;
                j += 1;
            }
            Edit::Delete => i += 1,
            Edit::Insert => j += 1,
        }
    }
}

/// Group change steps into hunk ranges over the step list, each padded with
/// `context` equal steps and merged when the gap between changes is small.
fn hunk_ranges(steps: &[Step], context: usize) -> Vec<(usize, usize)> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for (idx, step) in steps.iter().enumerate() {
        if step.edit == Edit::Equal {
            continue;
        }
        let start = idx.saturating_sub(context);
        let end = (idx + context + 1).min(steps.len());
        match ranges.last_mut() {
            Some(last) if start <= last.1 => last.1 = end,
            _ => ranges.push((start, end)),
        }
    }
    ranges
}

fn format_range(start: usize, len: usize) -> String {
    match len {
        0 => format!("{start},0"),
        1 => format!("{}", start + 1),
        _ => format!("{},{len}", start + 1),
    }
}

/// Produce a unified diff of two texts, line by line.
///
/// Returns an empty string when the texts have identical lines.
#[must_use]
pub fn unified_diff(old: &str, new: &str, from_label: &str, to_label: &str, context: usize) -> String {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let steps = lcs_steps(&old_lines, &new_lines);
    let ranges = hunk_ranges(&steps, context);
    if ranges.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    let _ = writeln!(out, "--- {from_label}");
    let _ = writeln!(out, "+++ {to_label}");
    for (start, end) in ranges {
        let hunk = &steps[start..end];
        let old_len = hunk.iter().filter(|s| s.edit != Edit::Insert).count();
        let new_len = hunk.iter().filter(|s| s.edit != Edit::Delete).count();
        let _ = writeln!(
            out,
            "@@ -{} +{} @@",
            format_range(hunk[0].old_pos, old_len),
            format_range(hunk[0].new_pos, new_len)
        );
        for step in hunk {
            let _ = match step.edit {
                Edit::Equal => writeln!(out, " {}", old_lines[step.old_pos]),
                Edit::Delete => writeln!(out, "-{}", old_lines[step.old_pos]),
                Edit::Insert => writeln!(out, "+{}", new_lines[step.new_pos]),
            };
        }
    }
    out
}
