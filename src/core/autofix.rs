use crate::core::diff_parser::ChangedLinePair;
use similar::TextDiff;

/// A single-line replacement derived from a review suggestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFix {
    pub line_number: usize,
    pub replacement: String,
}

impl LineFix {
    /// Uses the first line of `suggested_code`; blank suggestions give `None`.
    pub fn from_suggestion(line_number: usize, suggested_code: &str) -> Option<Self> {
        let first = suggested_code.lines().next()?;
        if first.trim().is_empty() {
            return None;
        }
        Some(Self {
            line_number,
            replacement: first.to_string(),
        })
    }
}

/// Outcome of applying fixes to one file's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchedFile {
    pub content: String,
    pub applied: usize,
}

impl PatchedFile {
    pub fn changed(&self) -> bool {
        self.applied > 0
    }
}

pub struct AutoFixer;

impl AutoFixer {
    /// Replaces whole lines by number (1-based). Lines past the end of the
    /// file are skipped. A replacement without leading whitespace inherits
    /// the indentation of the line it replaces.
    pub fn apply_line_fixes(content: &str, fixes: &[LineFix]) -> PatchedFile {
        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
        let mut applied = 0;

        for fix in fixes {
            let Some(slot) = fix.line_number.checked_sub(1).and_then(|idx| lines.get_mut(idx)) else {
                continue;
            };
            let replacement = if fix.replacement.starts_with(char::is_whitespace) {
                fix.replacement.clone()
            } else {
                format!("{}{}", leading_whitespace(slot), fix.replacement)
            };
            if *slot != replacement {
                *slot = replacement;
                applied += 1;
            }
        }

        PatchedFile {
            content: rejoin(lines, content),
            applied,
        }
    }

    /// Literal substitution of `removed` with `added` on the first line that
    /// contains it, for every pair with both sides present.
    pub fn apply_line_pairs(content: &str, pairs: &[ChangedLinePair]) -> PatchedFile {
        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
        let mut applied = 0;

        for pair in pairs {
            if pair.removed.is_empty() || pair.added.is_empty() {
                continue;
            }
            if let Some(line) = lines.iter_mut().find(|line| line.contains(&pair.removed)) {
                *line = line.replacen(&pair.removed, &pair.added, 1);
                applied += 1;
            }
        }

        PatchedFile {
            content: rejoin(lines, content),
            applied,
        }
    }

    pub fn render_diff(path: &str, old: &str, new: &str) -> String {
        TextDiff::from_lines(old, new)
            .unified_diff()
            .context_radius(2)
            .header(&format!("a/{path}"), &format!("b/{path}"))
            .to_string()
    }
}

fn leading_whitespace(line: &str) -> &str {
    let trimmed = line.trim_start();
    &line[..line.len() - trimmed.len()]
}

fn rejoin(lines: Vec<String>, original: &str) -> String {
    let mut joined = lines.join("\n");
    if original.ends_with('\n') {
        joined.push('\n');
    }
    joined
}
