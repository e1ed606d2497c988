use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

static HUNK_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,\d+)? \+(\d+)(?:,\d+)? @@").expect("hunk header pattern")
});

/// Mapping from line numbers in the post-change file to the 1-based
/// position of that line inside the patch text.
///
/// Only context and added lines have entries. Positions count every line of
/// the patch, hunk headers included, which is the addressing scheme review
/// comment APIs use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionMap {
    positions: BTreeMap<usize, usize>,
    /// Pre-change line number of each context line, keyed by new line.
    #[serde(skip)]
    old_lines: BTreeMap<usize, usize>,
}

impl PositionMap {
    pub fn get(&self, line_number: usize) -> Option<usize> {
        self.positions.get(&line_number).copied()
    }

    /// Line number before the change, for unchanged context lines only.
    pub fn old_line(&self, line_number: usize) -> Option<usize> {
        self.old_lines.get(&line_number).copied()
    }

    pub fn contains(&self, line_number: usize) -> bool {
        self.positions.contains_key(&line_number)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// One removal paired with the addition that immediately follows it.
/// Either side may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedLinePair {
    pub removed: String,
    pub added: String,
}

impl ChangedLinePair {
    pub fn new(removed: impl Into<String>, added: impl Into<String>) -> Self {
        Self {
            removed: removed.into(),
            added: added.into(),
        }
    }
}

pub struct DiffParser;

impl DiffParser {
    /// Builds the line → position map for a single file's patch.
    ///
    /// Never fails: an unparseable hunk header is ignored and a patch without
    /// any header numbers its lines from 1, so callers get a best-effort map.
    /// `+++`/`---` lines are file headers only before the first `@@` line;
    /// inside a hunk they are ordinary added or removed lines.
    pub fn build_position_map(patch: &str) -> PositionMap {
        let mut map = PositionMap::default();
        let mut new_line_num: usize = 0;
        let mut old_line_num: usize = 0;
        let mut in_hunk = false;

        for (index, line) in patch.lines().enumerate() {
            let position = index + 1;

            if line.starts_with("@@") {
                in_hunk = true;
                if let Some((old_start, new_start)) = hunk_starts(line) {
                    old_line_num = old_start.saturating_sub(1);
                    new_line_num = new_start.saturating_sub(1);
                }
                continue;
            }

            if !in_hunk && is_file_header(line) {
                continue;
            }

            match line.as_bytes().first() {
                Some(b'-') => old_line_num = old_line_num.saturating_add(1),
                Some(b'+') => {
                    // Lines past usize::MAX cannot be addressed.
                    let Some(next) = new_line_num.checked_add(1) else {
                        continue;
                    };
                    new_line_num = next;
                    map.positions.insert(next, position);
                }
                Some(b' ') => {
                    old_line_num = old_line_num.saturating_add(1);
                    let Some(next) = new_line_num.checked_add(1) else {
                        continue;
                    };
                    new_line_num = next;
                    map.positions.insert(next, position);
                    map.old_lines.insert(next, old_line_num);
                }
                _ => {}
            }
        }

        map
    }

    /// Pairs each added line with the removal directly before it.
    ///
    /// Only one pending removal is tracked; a second removal replaces the
    /// first, so runs of removals keep only their last line.
    pub fn extract_line_pairs(patch: &str) -> Vec<ChangedLinePair> {
        let mut pairs = Vec::new();
        let mut pending_removal: Option<String> = None;

        for line in patch.lines() {
            if is_file_header(line) {
                continue;
            }

            if let Some(removed) = line.strip_prefix('-') {
                pending_removal = Some(removed.trim().to_string());
            } else if let Some(added) = line.strip_prefix('+') {
                let removed = pending_removal.take().unwrap_or_default();
                pairs.push(ChangedLinePair::new(removed, added.trim()));
            }
        }

        pairs
    }
}

/// `(old_start, new_start)` of a hunk header, or `None` when malformed.
fn hunk_starts(header: &str) -> Option<(usize, usize)> {
    let caps = HUNK_HEADER.captures(header)?;
    let old_start = caps.get(1)?.as_str().parse().ok()?;
    let new_start = caps.get(2)?.as_str().parse().ok()?;
    Some((old_start, new_start))
}

fn is_file_header(line: &str) -> bool {
    line.starts_with("+++") || line.starts_with("---")
}
