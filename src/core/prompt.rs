use serde::{Deserialize, Serialize};

/// Diff and post-change content for one file of a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReview {
    pub file_path: String,
    pub diff: String,
    pub full_content: String,
}

/// Inputs for a review of a full repository checkout.
#[derive(Debug, Clone)]
pub struct RepositoryReview<'a> {
    pub repository: &'a str,
    pub pr_number: u64,
    pub head_branch: &'a str,
    pub base_branch: &'a str,
    pub diff: &'a str,
    pub project_context: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    pub system_prompt: String,
    pub max_file_chars: usize,
    pub max_context_chars: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are an expert software engineer and code reviewer.".to_string(),
            max_file_chars: 50_000,
            max_context_chars: 50_000,
        }
    }
}

const FORMAT_INSTRUCTIONS: &str = r#"For every specific problem, add a block in exactly this format:

File: <path as shown above>
Line: <line number in the changed file>
Severity: <Critical|Major|Minor|Info>
Issue: <one sentence describing the problem>
Suggestion: <one sentence describing the fix>
```suggestion
<replacement for that single line>
```

Only reference lines that appear in the diff. Put any general remarks before the first block."#;

const REVIEW_FOCUS: &str = r#"Please provide a comprehensive code review focusing on:
1. **Bugs and Issues**: Any potential bugs, logic errors, or problematic code
2. **Security Concerns**: Security vulnerabilities or best practices violations
3. **Performance**: Performance implications and optimization opportunities
4. **Code Quality**: Code style, maintainability, and best practices
5. **Suggestions**: Constructive improvements and recommendations

Format your response in GitHub markdown with clear sections and actionable feedback."#;

pub struct PromptBuilder {
    config: PromptConfig,
}

impl PromptBuilder {
    pub fn new(config: PromptConfig) -> Self {
        Self { config }
    }

    /// Prompt for a review assembled from the host's per-file API data.
    pub fn build_review_prompt(
        &self,
        title: &str,
        description: &str,
        files: &[FileReview],
    ) -> (String, String) {
        let mut prompt = format!(
            "You are a senior software engineer and code reviewer.\n\
             Pull Request Title: {title}\n\
             Description: {description}\n\n\
             Review the following file changes. Focus on quality, security, maintainability, and best practices.\n\
             Give specific feedback per file and line if possible.\n"
        );

        for file in files {
            prompt.push_str(&format!(
                "\n\n---\nFile: {}\nFull Content After Changes:\n{}\nDiff:\n{}",
                file.file_path,
                truncate(&file.full_content, self.config.max_file_chars),
                file.diff
            ));
        }

        prompt.push_str("\n\n");
        prompt.push_str(FORMAT_INSTRUCTIONS);
        prompt.push_str("\n\nProvide a consolidated, structured review.");

        (self.config.system_prompt.clone(), prompt)
    }

    /// Prompt for a review of a cloned checkout with its branch diff.
    pub fn build_repository_prompt(&self, review: &RepositoryReview<'_>) -> (String, String) {
        let prompt = format!(
            "You are an experienced software engineer conducting a thorough code review. \
             Provide a summary graph of the application along with a summary at the end.\n\n\
             # Pull Request Information:\n\
             - Repository: {}\n\
             - PR Number: #{}\n\
             - Branch: {} → {}\n\n\
             # Code Changes (Diff):\n```diff\n{}\n```\n\n\
             # Project Context (relevant files):\n{}\n\n{}",
            review.repository,
            review.pr_number,
            review.head_branch,
            review.base_branch,
            review.diff,
            truncate(review.project_context, self.config.max_context_chars),
            REVIEW_FOCUS
        );

        (self.config.system_prompt.clone(), prompt)
    }
}

/// Cuts `text` to at most `max_chars` characters on a char boundary.
/// Zero disables the limit.
pub fn truncate(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return text;
    }
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
