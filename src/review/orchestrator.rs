use crate::adapters::host::{PullRequest, SourceControl};
use crate::adapters::llm::{LLMAdapter, LLMRequest};
use crate::config::{Config, ReviewMode};
use crate::core::comment::{CommentFormatter, InlineCommentRequest};
use crate::core::context::ContextFetcher;
use crate::core::diff_parser::DiffParser;
use crate::core::git::GitIntegration;
use crate::core::prompt::{FileReview, PromptBuilder, RepositoryReview};
use crate::core::reconciler::{FilePositionMaps, Reconciler, Reconciliation};
use crate::core::review_parser::{ReviewFinding, ReviewParser};
use crate::review::{autofix, ReviewEvent};
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const NO_CHANGES_MESSAGE: &str = "No changes detected for review.";
const UNAVAILABLE_MESSAGE: &str =
    "AI review service is currently unavailable. Please try again later.";

/// Inline comment that the host refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPost {
    pub file_path: String,
    pub line_number: usize,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PostReport {
    pub posted: usize,
    pub failed: Vec<FailedPost>,
}

/// Everything produced for one pull request before anything is posted.
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub pull_request: PullRequest,
    pub review: String,
    pub findings: Vec<ReviewFinding>,
    pub reconciliation: Reconciliation,
    #[serde(skip)]
    pub position_maps: FilePositionMaps,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReviewRun {
    /// Nothing reviewable; an info comment was posted.
    NoChanges,
    /// The model backend did not answer its health check.
    Unavailable,
    Reviewed {
        findings: usize,
        inline: PostReport,
        fix_pull_request: Option<u64>,
    },
}

/// Runs one review cycle for a pull request against a host and a model.
pub struct ReviewOrchestrator {
    host: Arc<dyn SourceControl>,
    llm: Arc<dyn LLMAdapter>,
    config: Arc<Config>,
    prompts: PromptBuilder,
}

impl ReviewOrchestrator {
    pub fn new(host: Arc<dyn SourceControl>, llm: Arc<dyn LLMAdapter>, config: Arc<Config>) -> Self {
        let prompts = PromptBuilder::new(config.prompt_config());
        Self {
            host,
            llm,
            config,
            prompts,
        }
    }

    pub fn host(&self) -> &dyn SourceControl {
        self.host.as_ref()
    }

    /// Runs a cycle to completion. Any failure becomes an error comment on
    /// the pull request.
    pub async fn handle(&self, event: ReviewEvent) {
        info!(
            "Processing PR #{} on {} ({} -> {})",
            event.pr_number, event.repository, event.head_branch, event.base_branch
        );

        match self.run(&event).await {
            Ok(run) => info!("Review of {}#{} finished: {:?}", event.repository, event.pr_number, run),
            Err(err) => {
                error!("Review of {}#{} failed: {:#}", event.repository, event.pr_number, err);
                let body = CommentFormatter::error(&format!("Review process failed: {err:#}"));
                if let Err(post_err) = self
                    .host
                    .post_summary_comment(&event.repository, event.pr_number, &body)
                    .await
                {
                    error!("Could not post error comment: {}", post_err);
                }
            }
        }
    }

    pub async fn run(&self, event: &ReviewEvent) -> Result<ReviewRun> {
        match self.config.mode {
            ReviewMode::Api => self.review_via_api(event).await,
            ReviewMode::Clone => self.review_repository(event).await,
        }
    }

    async fn review_via_api(&self, event: &ReviewEvent) -> Result<ReviewRun> {
        let Some(analysis) = self.analyze(&event.repository, event.pr_number).await? else {
            self.post_comment(event, &CommentFormatter::info(NO_CHANGES_MESSAGE))
                .await?;
            return Ok(ReviewRun::NoChanges);
        };

        let clone_url = event
            .clone_url
            .as_deref()
            .or(analysis.pull_request.clone_url.as_deref());
        self.publish(&event.repository, &analysis, clone_url).await
    }

    /// Fetches the PR, asks the model for a review, and reconciles the
    /// findings against the diff. Returns `None` when no file is reviewable.
    pub async fn analyze(&self, repo: &str, number: u64) -> Result<Option<Analysis>> {
        let pr = self
            .host
            .fetch_pull_request(repo, number)
            .await
            .context("Failed to fetch pull request metadata")?;
        let files = self
            .host
            .fetch_changed_files(repo, number)
            .await
            .context("Failed to fetch changed files")?;

        let mut position_maps = FilePositionMaps::new();
        let mut reviews = Vec::new();

        for file in files {
            if file.deleted || file.patch.is_empty() {
                debug!("Skipping {}: deleted or no textual patch", file.path);
                continue;
            }
            if self.config.should_exclude(&file.path) {
                debug!("Skipping {}: excluded", file.path);
                continue;
            }

            let full_content = self
                .host
                .fetch_file_content(repo, &file.path, &pr.head_sha)
                .await
                .with_context(|| format!("Failed to fetch content of {}", file.path))?;

            let map = DiffParser::build_position_map(&file.patch);
            if map.is_empty() {
                debug!("{} has no commentable lines", file.path);
            } else {
                debug!("{}: {} commentable lines", file.path, map.len());
            }
            position_maps.insert(file.path.clone(), map);
            reviews.push(FileReview {
                file_path: file.path,
                diff: file.patch,
                full_content,
            });
        }

        if reviews.is_empty() {
            info!("No reviewable files in {}#{}", repo, number);
            return Ok(None);
        }

        let (system, user) = self
            .prompts
            .build_review_prompt(&pr.title, &pr.description, &reviews);
        let review = self.generate(system, user).await?;

        let findings = ReviewParser::parse(&review);
        let reconciliation = Reconciler::reconcile(&findings, &position_maps);
        info!(
            "Parsed {} findings for {}#{}: {} mappable, {} unmapped",
            findings.len(),
            repo,
            number,
            reconciliation.requests.len(),
            reconciliation.unmapped.len()
        );

        Ok(Some(Analysis {
            pull_request: pr,
            review,
            findings,
            reconciliation,
            position_maps,
        }))
    }

    /// Posts the summary, then the inline comments, then the optional
    /// auto-fix pull request.
    pub async fn publish(
        &self,
        repo: &str,
        analysis: &Analysis,
        clone_url: Option<&str>,
    ) -> Result<ReviewRun> {
        let pr = &analysis.pull_request;
        self.host
            .post_summary_comment(repo, pr.number, &CommentFormatter::summary(&analysis.review))
            .await
            .context("Failed to post review summary")?;
        info!("Posted review summary to {}#{}", repo, pr.number);

        let inline = if self.config.inline_comments {
            self.post_inline_comments(repo, pr, &analysis.reconciliation.requests)
                .await
        } else {
            PostReport::default()
        };

        let fix_pull_request = if self.config.auto_fix {
            autofix::run_auto_fix(
                self.host.as_ref(),
                repo,
                pr,
                clone_url,
                &analysis.findings,
                &analysis.position_maps,
            )
            .await
        } else {
            None
        };

        Ok(ReviewRun::Reviewed {
            findings: analysis.findings.len(),
            inline,
            fix_pull_request,
        })
    }

    /// Posts each request in order. A refused comment is recorded and the
    /// remaining ones are still posted.
    pub async fn post_inline_comments(
        &self,
        repo: &str,
        pr: &PullRequest,
        requests: &[InlineCommentRequest],
    ) -> PostReport {
        let mut report = PostReport::default();

        for request in requests {
            match self.host.post_inline_comment(repo, pr, request).await {
                Ok(()) => {
                    debug!(
                        file = %request.file_path,
                        line = request.line_number,
                        "Posted inline comment at position {}",
                        request.diff_position
                    );
                    report.posted += 1;
                }
                Err(err) => {
                    warn!(
                        file = %request.file_path,
                        line = request.line_number,
                        "Failed to post inline comment: {}",
                        err
                    );
                    report.failed.push(FailedPost {
                        file_path: request.file_path.clone(),
                        line_number: request.line_number,
                        error: err.to_string(),
                    });
                }
            }
        }

        report
    }

    /// Clone-mode review: the whole branch diff plus project sources.
    async fn review_repository(&self, event: &ReviewEvent) -> Result<ReviewRun> {
        let health = self.llm.health_check().await;
        if !health.reachable {
            warn!(
                "Model backend unreachable, aborting review: {}",
                health.error.as_deref().unwrap_or("unknown error")
            );
            self.post_comment(event, &CommentFormatter::error(UNAVAILABLE_MESSAGE))
                .await?;
            return Ok(ReviewRun::Unavailable);
        }

        let clone_url = match &event.clone_url {
            Some(url) => url.clone(),
            None => self
                .host
                .fetch_pull_request(&event.repository, event.pr_number)
                .await
                .context("Failed to fetch pull request metadata")?
                .clone_url
                .with_context(|| format!("No clone URL known for {}", event.repository))?,
        };
        let token = self.host.git_token().map(str::to_string);
        let head_branch = event.head_branch.clone();
        let base_branch = event.base_branch.clone();
        let max_file_chars = self.config.max_file_chars;

        let (project_context, diff) = tokio::task::spawn_blocking(move || -> Result<(String, String)> {
            let workdir = tempfile::TempDir::new().context("Failed to create temporary directory")?;
            let git = GitIntegration::clone_branch(&clone_url, token.as_deref(), &head_branch, workdir.path())?;
            let project_context = ContextFetcher::new(workdir.path(), max_file_chars).collect_source_context();
            let diff = git.diff_against_base(&base_branch);
            Ok((project_context, diff))
        })
        .await
        .context("Repository worker panicked")??;

        if diff.trim().is_empty() {
            info!("No diff found for {}#{}, skipping review", event.repository, event.pr_number);
            self.post_comment(event, &CommentFormatter::info(NO_CHANGES_MESSAGE))
                .await?;
            return Ok(ReviewRun::NoChanges);
        }

        let (system, user) = self.prompts.build_repository_prompt(&RepositoryReview {
            repository: &event.repository,
            pr_number: event.pr_number,
            head_branch: &event.head_branch,
            base_branch: &event.base_branch,
            diff: &diff,
            project_context: &project_context,
        });
        let review = self.generate(system, user).await?;

        self.post_comment(event, &CommentFormatter::summary(&review))
            .await?;
        info!("Posted review summary to {}#{}", event.repository, event.pr_number);

        Ok(ReviewRun::Reviewed {
            findings: 0,
            inline: PostReport::default(),
            fix_pull_request: None,
        })
    }

    async fn generate(&self, system: String, user: String) -> Result<String> {
        debug!(
            "Requesting review from {} for a {} change",
            self.llm.model_name(),
            self.host.name()
        );
        let response = self
            .llm
            .complete(LLMRequest::new(system, user))
            .await
            .context("AI review failed due to service error")?;
        if let Some(usage) = &response.usage {
            debug!("Model used {} tokens", usage.total_tokens);
        }
        Ok(response.content)
    }

    async fn post_comment(&self, event: &ReviewEvent, body: &str) -> Result<()> {
        self.host
            .post_summary_comment(&event.repository, event.pr_number, body)
            .await
            .context("Failed to post comment")
    }
}
