//! Turns anchored review suggestions into a follow-up pull request.

use crate::adapters::host::{PullRequest, SourceControl};
use crate::core::autofix::{AutoFixer, LineFix, PatchedFile};
use crate::core::diff_parser::{ChangedLinePair, DiffParser};
use crate::core::git::GitIntegration;
use crate::core::reconciler::FilePositionMaps;
use crate::core::review_parser::ReviewFinding;
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuggestedEdit {
    /// Replace one line of the file.
    Line(LineFix),
    /// Suggestion written as `-old` / `+new` lines.
    Pairs(Vec<ChangedLinePair>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFix {
    pub path: String,
    pub original: String,
    pub patched: String,
    pub applied: usize,
}

impl FileFix {
    pub fn diff(&self) -> String {
        AutoFixer::render_diff(&self.path, &self.original, &self.patched)
    }
}

/// Edits for findings whose `(file, line)` is anchored in the diff and that
/// carry suggested code, grouped by file.
pub fn collect_edits(
    findings: &[ReviewFinding],
    maps: &FilePositionMaps,
) -> BTreeMap<String, Vec<SuggestedEdit>> {
    let mut edits: BTreeMap<String, Vec<SuggestedEdit>> = BTreeMap::new();

    for finding in findings {
        let Some(line) = finding.line_number else {
            continue;
        };
        let anchored = maps
            .get(&finding.file_path)
            .map_or(false, |map| map.contains(line));
        if !anchored || finding.suggested_code.trim().is_empty() {
            continue;
        }

        let edit = if is_diff_suggestion(&finding.suggested_code) {
            SuggestedEdit::Pairs(DiffParser::extract_line_pairs(&finding.suggested_code))
        } else {
            match LineFix::from_suggestion(line, &finding.suggested_code) {
                Some(fix) => SuggestedEdit::Line(fix),
                None => continue,
            }
        };
        edits.entry(finding.file_path.clone()).or_default().push(edit);
    }

    edits
}

/// Applies `edits` in order on top of each other.
pub fn patch_content(content: &str, edits: &[SuggestedEdit]) -> PatchedFile {
    let mut current = PatchedFile {
        content: content.to_string(),
        applied: 0,
    };

    for edit in edits {
        let next = match edit {
            SuggestedEdit::Line(fix) => {
                AutoFixer::apply_line_fixes(&current.content, std::slice::from_ref(fix))
            }
            SuggestedEdit::Pairs(pairs) => AutoFixer::apply_line_pairs(&current.content, pairs),
        };
        current = PatchedFile {
            content: next.content,
            applied: current.applied + next.applied,
        };
    }

    current
}

fn is_diff_suggestion(code: &str) -> bool {
    let mut lines = code.lines().filter(|line| !line.trim().is_empty()).peekable();
    if lines.peek().is_none() {
        return false;
    }
    let mut has_removal = false;
    for line in lines {
        match line.chars().next() {
            Some('-') => has_removal = true,
            Some('+') => {}
            _ => return false,
        }
    }
    has_removal
}

/// Fetches every file with edits at the PR head and applies them. Files
/// where nothing changed are dropped.
pub async fn prepare_fixes(
    host: &dyn SourceControl,
    repo: &str,
    pr: &PullRequest,
    findings: &[ReviewFinding],
    maps: &FilePositionMaps,
) -> Result<Vec<FileFix>> {
    let mut fixes = Vec::new();

    for (path, edits) in collect_edits(findings, maps) {
        let original = host
            .fetch_file_content(repo, &path, &pr.head_sha)
            .await
            .with_context(|| format!("Failed to fetch {path} for auto-fix"))?;
        if original.is_empty() {
            debug!("Skipping auto-fix for {}: no content at head", path);
            continue;
        }

        let patched = patch_content(&original, &edits);
        if patched.changed() {
            fixes.push(FileFix {
                path,
                original,
                patched: patched.content,
                applied: patched.applied,
            });
        }
    }

    Ok(fixes)
}

pub fn fix_branch_name(pr_number: u64) -> String {
    format!("ai-fix/pr-{}-{}", pr_number, Utc::now().format("%Y%m%d%H%M%S"))
}

pub fn fix_pull_request_body(pr_number: u64, fixes: &[FileFix]) -> String {
    let mut body = format!(
        "Automated fixes for #{pr_number}, generated from AI review suggestions.\n\n\
         Please review each change before merging."
    );
    for fix in fixes {
        body.push_str(&format!(
            "\n\n### `{}` ({} change{})\n\n```diff\n{}```",
            fix.path,
            fix.applied,
            if fix.applied == 1 { "" } else { "s" },
            fix.diff()
        ));
    }
    body
}

/// Commits `fixes` on a new branch cut from the PR head, pushes it, and opens
/// a pull request targeting the PR's head branch.
pub async fn open_fix_pull_request(
    host: &dyn SourceControl,
    repo: &str,
    pr: &PullRequest,
    clone_url: &str,
    fixes: Vec<FileFix>,
) -> Result<u64> {
    let branch = fix_branch_name(pr.number);
    let body = fix_pull_request_body(pr.number, &fixes);
    let message = format!("Apply AI review suggestions for #{}", pr.number);

    let files: Vec<(String, String)> = fixes
        .into_iter()
        .map(|fix| (fix.path, fix.patched))
        .collect();
    let url = clone_url.to_string();
    let token = host.git_token().map(str::to_string);
    let head_branch = pr.head_branch.clone();
    let fix_branch = branch.clone();

    tokio::task::spawn_blocking(move || -> Result<()> {
        let workdir = tempfile::TempDir::new().context("Failed to create temporary directory")?;
        let git = GitIntegration::clone_branch(&url, token.as_deref(), &head_branch, workdir.path())?;
        git.commit_files(&fix_branch, &files, &message)?;
        git.push_branch(&fix_branch)
    })
    .await
    .context("Auto-fix worker panicked")??;

    let title = format!("AI fixes for #{}", pr.number);
    let number = host
        .create_pull_request(repo, &branch, &pr.head_branch, &title, &body)
        .await
        .context("Failed to open auto-fix pull request")?;
    info!("Opened auto-fix pull request #{} for #{}", number, pr.number);
    Ok(number)
}

/// Runs the whole auto-fix step. Failures are logged, never returned.
pub async fn run_auto_fix(
    host: &dyn SourceControl,
    repo: &str,
    pr: &PullRequest,
    clone_url: Option<&str>,
    findings: &[ReviewFinding],
    maps: &FilePositionMaps,
) -> Option<u64> {
    let fixes = match prepare_fixes(host, repo, pr, findings, maps).await {
        Ok(fixes) if fixes.is_empty() => {
            debug!("No applicable auto-fixes for #{}", pr.number);
            return None;
        }
        Ok(fixes) => fixes,
        Err(err) => {
            warn!("Auto-fix failed for #{}: {:#}", pr.number, err);
            return None;
        }
    };
    let Some(clone_url) = clone_url else {
        warn!("Auto-fix skipped for #{}: no clone URL", pr.number);
        return None;
    };

    match open_fix_pull_request(host, repo, pr, clone_url, fixes).await {
        Ok(number) => Some(number),
        Err(err) => {
            warn!("Auto-fix failed for #{}: {:#}", pr.number, err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::fakes::FakeHost;

    fn finding(file: &str, line: usize, code: &str) -> ReviewFinding {
        ReviewFinding {
            file_path: file.to_string(),
            line_number: Some(line),
            suggested_code: code.to_string(),
            ..ReviewFinding::default()
        }
    }

    fn maps() -> FilePositionMaps {
        let mut maps = FilePositionMaps::new();
        maps.insert(
            "app.py".to_string(),
            DiffParser::build_position_map("@@ -1,2 +1,3 @@\n def f(x):\n+    y = x.value\n     return y"),
        );
        maps
    }

    #[test]
    fn only_anchored_findings_with_code_become_edits() {
        let findings = vec![
            finding("app.py", 2, "if x is not None:"),
            finding("app.py", 9, "unused"),
            finding("other.py", 2, "x"),
            finding("app.py", 3, "   "),
        ];

        let edits = collect_edits(&findings, &maps());

        assert_eq!(edits.len(), 1);
        assert_eq!(
            edits["app.py"],
            vec![SuggestedEdit::Line(LineFix {
                line_number: 2,
                replacement: "if x is not None:".to_string()
            })]
        );
    }

    #[test]
    fn diff_shaped_suggestions_use_line_pairs() {
        let findings = vec![finding("app.py", 2, "-    y = x.value\n+    y = x.value if x else None")];

        let edits = collect_edits(&findings, &maps());
        let patched = patch_content("def f(x):\n    y = x.value\n    return y\n", &edits["app.py"]);

        assert_eq!(patched.applied, 1);
        assert_eq!(
            patched.content,
            "def f(x):\n    y = x.value if x else None\n    return y\n"
        );
    }

    #[test]
    fn recognises_diff_suggestions() {
        assert!(is_diff_suggestion("-a\n+b"));
        assert!(!is_diff_suggestion("+only added"));
        assert!(!is_diff_suggestion("plain code"));
        assert!(!is_diff_suggestion(""));
    }

    #[tokio::test]
    async fn prepares_fixes_from_head_content() {
        let mut host = FakeHost::default();
        host.contents.insert(
            "app.py".to_string(),
            "def f(x):\n    y = x.value\n    return y\n".to_string(),
        );
        let pr = PullRequest {
            number: 4,
            head_sha: "abc".to_string(),
            ..PullRequest::default()
        };

        let fixes = prepare_fixes(
            &host,
            "acme/app",
            &pr,
            &[finding("app.py", 2, "y = getattr(x, 'value', None)")],
            &maps(),
        )
        .await
        .unwrap();

        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].patched, "def f(x):\n    y = getattr(x, 'value', None)\n    return y\n");
        assert!(fixes[0].diff().contains("+    y = getattr(x, 'value', None)"));
    }

    #[test]
    fn branch_and_body_reference_the_pull_request() {
        assert!(fix_branch_name(12).starts_with("ai-fix/pr-12-"));

        let fix = FileFix {
            path: "app.py".to_string(),
            original: "a\n".to_string(),
            patched: "b\n".to_string(),
            applied: 1,
        };
        let body = fix_pull_request_body(12, &[fix]);
        assert!(body.contains("#12"));
        assert!(body.contains("### `app.py` (1 change)"));
        assert!(body.contains("-a\n+b"));
    }
}
