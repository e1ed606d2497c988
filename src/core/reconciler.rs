use crate::core::comment::{CommentFormatter, InlineCommentRequest};
use crate::core::diff_parser::PositionMap;
use crate::core::review_parser::ReviewFinding;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// Position maps for every file of one pull request, keyed by file path.
pub type FilePositionMaps = HashMap<String, PositionMap>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnmappedReason {
    MissingLine,
    UnknownFile,
    LineNotInDiff,
}

impl fmt::Display for UnmappedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            UnmappedReason::MissingLine => "no line number",
            UnmappedReason::UnknownFile => "file not in diff",
            UnmappedReason::LineNotInDiff => "line not in diff",
        };
        f.write_str(text)
    }
}

/// A finding that could not be anchored to the diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmappedFinding {
    pub file_path: String,
    pub line_number: Option<usize>,
    pub reason: UnmappedReason,
}

impl fmt::Display for UnmappedFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line_number {
            Some(line) => write!(f, "{}:{} ({})", self.file_path, line, self.reason),
            None => write!(f, "{} ({})", self.file_path, self.reason),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub requests: Vec<InlineCommentRequest>,
    pub unmapped: Vec<UnmappedFinding>,
}

pub struct Reconciler;

impl Reconciler {
    /// Resolves each finding's `(file, line)` against the position maps.
    ///
    /// Every finding ends up either as exactly one request or as exactly one
    /// unmapped diagnostic.
    pub fn reconcile(findings: &[ReviewFinding], maps: &FilePositionMaps) -> Reconciliation {
        let mut result = Reconciliation::default();

        for finding in findings {
            match Self::resolve(finding, maps) {
                Ok((line_number, diff_position, old_line)) => {
                    result.requests.push(InlineCommentRequest {
                        file_path: finding.file_path.clone(),
                        line_number,
                        diff_position,
                        old_line,
                        body: CommentFormatter::inline_body(
                            finding.severity,
                            finding.issue.as_deref(),
                            finding.suggestion.as_deref(),
                            &finding.suggested_code,
                        ),
                    });
                }
                Err(reason) => {
                    let unmapped = UnmappedFinding {
                        file_path: finding.file_path.clone(),
                        line_number: finding.line_number,
                        reason,
                    };
                    warn!(
                        file = %finding.file_path,
                        line = ?finding.line_number,
                        "Could not map review finding to a diff position: {}",
                        unmapped
                    );
                    result.unmapped.push(unmapped);
                }
            }
        }

        result
    }

    fn resolve(
        finding: &ReviewFinding,
        maps: &FilePositionMaps,
    ) -> Result<(usize, usize, Option<usize>), UnmappedReason> {
        let line = finding.line_number.ok_or(UnmappedReason::MissingLine)?;
        let map = maps
            .get(&finding.file_path)
            .ok_or(UnmappedReason::UnknownFile)?;
        let position = map.get(line).ok_or(UnmappedReason::LineNotInDiff)?;
        Ok((line, position, map.old_line(line)))
    }
}
