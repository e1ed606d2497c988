use crate::core::comment::InlineCommentRequest;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),
}

pub type HostResult<T> = Result<T, HostError>;

/// Pull/merge request metadata needed for one review cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub description: String,
    pub head_sha: String,
    pub head_branch: String,
    pub base_branch: String,
    /// Diff refs GitLab needs to anchor inline comments.
    pub base_sha: Option<String>,
    pub start_sha: Option<String>,
    pub clone_url: Option<String>,
}

/// One file of a pull request with its unified-diff patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    pub patch: String,
    pub deleted: bool,
}

/// Capabilities the reviewer needs from a source-control host.
#[async_trait]
pub trait SourceControl: Send + Sync {
    fn name(&self) -> &str;

    /// Token used for authenticated git clone/push, if any.
    fn git_token(&self) -> Option<&str>;

    async fn fetch_pull_request(&self, repo: &str, number: u64) -> HostResult<PullRequest>;

    async fn fetch_changed_files(&self, repo: &str, number: u64) -> HostResult<Vec<ChangedFile>>;

    /// File content at `git_ref`; empty when the file does not exist there.
    async fn fetch_file_content(&self, repo: &str, path: &str, git_ref: &str)
        -> HostResult<String>;

    async fn post_summary_comment(&self, repo: &str, number: u64, body: &str) -> HostResult<()>;

    async fn post_inline_comment(
        &self,
        repo: &str,
        pr: &PullRequest,
        comment: &InlineCommentRequest,
    ) -> HostResult<()>;

    async fn find_open_pull_request(&self, repo: &str, branch: &str) -> HostResult<Option<u64>>;

    async fn create_pull_request(
        &self,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> HostResult<u64>;
}

/// Turns non-2xx responses into `HostError::Http` carrying the body text.
pub(crate) async fn ensure_success(response: reqwest::Response) -> HostResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(HostError::Http { status, body })
}

pub(crate) async fn decode_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> HostResult<T> {
    let bytes = ensure_success(response).await?.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|err| HostError::Decode(err.to_string()))
}
