use crate::core::comment::Severity;
use serde::{Deserialize, Serialize};
use tracing::debug;

const FILE_MARKER: &str = "File:";
const FENCE_OPEN: &str = "```suggestion";
const FENCE_CLOSE: &str = "```";

/// One issue extracted from the reviewer's free-text output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewFinding {
    pub file_path: String,
    pub line_number: Option<usize>,
    pub severity: Option<Severity>,
    pub issue: Option<String>,
    pub suggestion: Option<String>,
    pub suggested_code: String,
}

/// Parses review text following the `File:` / `Line:` / `Severity:` /
/// `Issue:` / `Suggestion:` convention with an optional fenced suggestion.
///
/// Text before the first `File:` marker is discarded. Missing, reordered or
/// malformed fields leave the corresponding value empty; this never fails.
pub struct ReviewParser;

impl ReviewParser {
    pub fn parse(review: &str) -> Vec<ReviewFinding> {
        review
            .split(FILE_MARKER)
            .skip(1)
            .map(Self::parse_block)
            .collect()
    }

    fn parse_block(block: &str) -> ReviewFinding {
        let mut lines = block.lines();
        let mut finding = ReviewFinding {
            file_path: lines.next().unwrap_or_default().trim().to_string(),
            ..ReviewFinding::default()
        };

        let mut code_lines: Vec<&str> = Vec::new();
        let mut in_code = false;

        for line in lines {
            let trimmed = line.trim();

            if in_code {
                if trimmed == FENCE_CLOSE {
                    in_code = false;
                } else {
                    code_lines.push(line.trim_end_matches('\r'));
                }
                continue;
            }

            if trimmed.starts_with(FENCE_OPEN) {
                in_code = true;
            } else if let Some(value) = field_value(trimmed, "Line:") {
                finding.line_number = value.parse().ok();
                if finding.line_number.is_none() {
                    debug!(file = %finding.file_path, value, "Unparseable line number in review");
                }
            } else if let Some(value) = field_value(trimmed, "Severity:") {
                finding.severity = Severity::parse(value);
            } else if let Some(value) = field_value(trimmed, "Issue:") {
                finding.issue = non_empty(value);
            } else if let Some(value) = field_value(trimmed, "Suggestion:") {
                finding.suggestion = non_empty(value);
            }
        }

        finding.suggested_code = code_lines.join("\n");
        finding
    }
}

fn field_value<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    if !line.starts_with(prefix) {
        return None;
    }
    line.split_once(':').map(|(_, rest)| rest.trim())
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}
