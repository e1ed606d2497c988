use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    Major,
    Minor,
    Info,
}

impl Severity {
    /// Case-insensitive; unrecognised labels yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().trim_matches('*').to_ascii_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "major" => Some(Severity::Major),
            "minor" => Some(Severity::Minor),
            "info" => Some(Severity::Info),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::Major => "Major",
            Severity::Minor => "Minor",
            Severity::Info => "Info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A comment ready to be attached to one line of a pull request diff.
///
/// GitHub anchors by `diff_position`; GitLab anchors by `line_number` in the
/// post-change file. Both are carried so either host can post it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineCommentRequest {
    pub file_path: String,
    pub line_number: usize,
    pub diff_position: usize,
    /// Set when the line is unchanged context; GitLab needs it there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_line: Option<usize>,
    pub body: String,
}

pub struct CommentFormatter;

impl CommentFormatter {
    pub fn inline_body(
        severity: Option<Severity>,
        issue: Option<&str>,
        suggestion: Option<&str>,
        code: &str,
    ) -> String {
        format!(
            "**{}**\n\nIssue: {}\n\nSuggestion: {}\n\n```suggestion\n{}\n```",
            severity.unwrap_or(Severity::Info),
            issue.unwrap_or_default(),
            suggestion.unwrap_or_default(),
            code
        )
    }

    pub fn summary(review: &str) -> String {
        format!("## 🤖 AI Code Review\n\n{review}\n\n---\n*Generated by AI Code Reviewer*")
    }

    pub fn error(message: &str) -> String {
        format!("## ❌ AI Code Review Error\n\n{message}\n\n---\n*AI Code Reviewer encountered an issue*")
    }

    pub fn info(message: &str) -> String {
        format!("## ℹ️ AI Code Review Info\n\n{message}\n\n---\n*AI Code Reviewer*")
    }
}
