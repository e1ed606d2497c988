pub mod autofix;
pub mod orchestrator;

pub use orchestrator::ReviewOrchestrator;

use serde::{Deserialize, Serialize};

/// A pull/merge request event that should be reviewed, normalized from
/// whichever host delivered it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewEvent {
    pub repository: String,
    pub pr_number: u64,
    pub head_sha: Option<String>,
    pub head_branch: String,
    pub base_branch: String,
    pub title: String,
    pub description: String,
    pub clone_url: Option<String>,
}

#[cfg(test)]
pub(crate) mod fakes {
    use crate::adapters::host::{ChangedFile, HostError, HostResult, PullRequest, SourceControl};
    use crate::adapters::llm::{LLMAdapter, LLMRequest, LLMResponse};
    use crate::core::comment::InlineCommentRequest;
    use anyhow::Result;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeHost {
        pub pull_request: PullRequest,
        pub files: Vec<ChangedFile>,
        pub contents: HashMap<String, String>,
        pub reject_inline_for: Vec<String>,
        pub fail_fetch: bool,
        pub summaries: Mutex<Vec<String>>,
        pub inline: Mutex<Vec<InlineCommentRequest>>,
        pub content_requests: Mutex<Vec<String>>,
    }

    impl FakeHost {
        pub fn summaries(&self) -> Vec<String> {
            self.summaries.lock().unwrap().clone()
        }

        pub fn inline(&self) -> Vec<InlineCommentRequest> {
            self.inline.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SourceControl for FakeHost {
        fn name(&self) -> &str {
            "fake"
        }

        fn git_token(&self) -> Option<&str> {
            None
        }

        async fn fetch_pull_request(&self, _repo: &str, number: u64) -> HostResult<PullRequest> {
            if self.fail_fetch {
                return Err(HostError::Http {
                    status: StatusCode::NOT_FOUND,
                    body: "Not Found".to_string(),
                });
            }
            Ok(PullRequest {
                number,
                ..self.pull_request.clone()
            })
        }

        async fn fetch_changed_files(&self, _repo: &str, _number: u64) -> HostResult<Vec<ChangedFile>> {
            Ok(self.files.clone())
        }

        async fn fetch_file_content(
            &self,
            _repo: &str,
            path: &str,
            _git_ref: &str,
        ) -> HostResult<String> {
            self.content_requests.lock().unwrap().push(path.to_string());
            Ok(self.contents.get(path).cloned().unwrap_or_default())
        }

        async fn post_summary_comment(&self, _repo: &str, _number: u64, body: &str) -> HostResult<()> {
            self.summaries.lock().unwrap().push(body.to_string());
            Ok(())
        }

        async fn post_inline_comment(
            &self,
            _repo: &str,
            _pr: &PullRequest,
            comment: &InlineCommentRequest,
        ) -> HostResult<()> {
            if self.reject_inline_for.contains(&comment.file_path) {
                return Err(HostError::Http {
                    status: StatusCode::UNPROCESSABLE_ENTITY,
                    body: "position invalid".to_string(),
                });
            }
            self.inline.lock().unwrap().push(comment.clone());
            Ok(())
        }

        async fn find_open_pull_request(&self, _repo: &str, _branch: &str) -> HostResult<Option<u64>> {
            Ok(None)
        }

        async fn create_pull_request(
            &self,
            _repo: &str,
            _head: &str,
            _base: &str,
            _title: &str,
            _body: &str,
        ) -> HostResult<u64> {
            Ok(99)
        }
    }

    pub struct FakeLlm {
        pub reply: Option<String>,
        pub requests: Mutex<Vec<LLMRequest>>,
    }

    impl FakeLlm {
        pub fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn failing() -> Self {
            Self {
                reply: None,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LLMAdapter for FakeLlm {
        async fn complete(&self, request: LLMRequest) -> Result<LLMResponse> {
            self.requests.lock().unwrap().push(request);
            match &self.reply {
                Some(reply) => Ok(LLMResponse {
                    content: reply.clone(),
                    model: "fake".to_string(),
                    usage: None,
                }),
                None => anyhow::bail!("LLM service unreachable after 3 attempts"),
            }
        }

        fn model_name(&self) -> &str {
            "fake"
        }
    }
}
