//! GitLab REST (v4) client. Merge requests stand in for pull requests;
//! inline comments are discussions anchored by new-file line number.

use crate::adapters::host::{
    decode_json, ensure_success, ChangedFile, HostResult, PullRequest, SourceControl,
};
use crate::core::comment::InlineCommentRequest;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct GitLabClient {
    http: Client,
    base_api: String,
    token: String,
}

#[derive(Deserialize)]
struct GlMergeRequest {
    iid: u64,
    title: Option<String>,
    description: Option<String>,
    sha: Option<String>,
    source_branch: String,
    target_branch: String,
    diff_refs: Option<GlDiffRefs>,
}

#[derive(Deserialize)]
struct GlDiffRefs {
    base_sha: Option<String>,
    head_sha: Option<String>,
    start_sha: Option<String>,
}

#[derive(Deserialize)]
struct GlChanges {
    #[serde(default)]
    changes: Vec<GlChange>,
}

#[derive(Deserialize)]
struct GlChange {
    new_path: String,
    #[serde(default)]
    diff: String,
    #[serde(default)]
    deleted_file: bool,
}

#[derive(Deserialize)]
struct GlIid {
    iid: u64,
}

impl GitLabClient {
    pub fn new(base_api: impl Into<String>, token: impl Into<String>) -> HostResult<Self> {
        let http = Client::builder()
            .user_agent("AI-Code-Reviewer/1.0")
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_api: base_api.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn project_url(&self, project: &str, rest: &str) -> String {
        format!("{}/projects/{}{}", self.base_api, urlencoding::encode(project), rest)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("PRIVATE-TOKEN", &self.token)
    }
}

#[async_trait]
impl SourceControl for GitLabClient {
    fn name(&self) -> &str {
        "gitlab"
    }

    fn git_token(&self) -> Option<&str> {
        Some(&self.token)
    }

    async fn fetch_pull_request(&self, repo: &str, number: u64) -> HostResult<PullRequest> {
        let url = self.project_url(repo, &format!("/merge_requests/{number}"));
        let mr: GlMergeRequest = decode_json(self.authorize(self.http.get(url)).send().await?).await?;

        let refs = mr.diff_refs;
        let head_sha = refs
            .as_ref()
            .and_then(|r| r.head_sha.clone())
            .or(mr.sha)
            .unwrap_or_default();

        Ok(PullRequest {
            number: mr.iid,
            title: mr.title.unwrap_or_default(),
            description: mr.description.unwrap_or_default(),
            head_sha,
            head_branch: mr.source_branch,
            base_branch: mr.target_branch,
            base_sha: refs.as_ref().and_then(|r| r.base_sha.clone()),
            start_sha: refs.and_then(|r| r.start_sha),
            clone_url: None,
        })
    }

    async fn fetch_changed_files(&self, repo: &str, number: u64) -> HostResult<Vec<ChangedFile>> {
        let url = self.project_url(repo, &format!("/merge_requests/{number}/changes"));
        let changes: GlChanges = decode_json(self.authorize(self.http.get(url)).send().await?).await?;

        Ok(changes
            .changes
            .into_iter()
            .map(|change| ChangedFile {
                path: change.new_path,
                patch: change.diff,
                deleted: change.deleted_file,
            })
            .collect())
    }

    async fn fetch_file_content(
        &self,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> HostResult<String> {
        let url = self.project_url(
            repo,
            &format!("/repository/files/{}/raw", urlencoding::encode(path)),
        );
        let response = self
            .authorize(self.http.get(url))
            .query(&[("ref", git_ref)])
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            debug!("No content for {} at {} ({})", path, git_ref, response.status());
            return Ok(String::new());
        }
        Ok(response.text().await?)
    }

    async fn post_summary_comment(&self, repo: &str, number: u64, body: &str) -> HostResult<()> {
        let url = self.project_url(repo, &format!("/merge_requests/{number}/notes"));
        let response = self
            .authorize(self.http.post(url))
            .json(&json!({ "body": body }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn post_inline_comment(
        &self,
        repo: &str,
        pr: &PullRequest,
        comment: &InlineCommentRequest,
    ) -> HostResult<()> {
        let url = self.project_url(repo, &format!("/merge_requests/{}/discussions", pr.number));
        let base_sha = pr.base_sha.clone().unwrap_or_default();
        let start_sha = pr.start_sha.clone().unwrap_or_else(|| base_sha.clone());
        let mut position = json!({
            "position_type": "text",
            "base_sha": base_sha,
            "start_sha": start_sha,
            "head_sha": pr.head_sha,
            "old_path": comment.file_path,
            "new_path": comment.file_path,
            "new_line": comment.line_number,
        });
        // Unchanged lines are addressed by both sides of the diff.
        if let Some(old_line) = comment.old_line {
            position["old_line"] = json!(old_line);
        }
        let response = self
            .authorize(self.http.post(url))
            .json(&json!({ "body": comment.body, "position": position }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn find_open_pull_request(&self, repo: &str, branch: &str) -> HostResult<Option<u64>> {
        let url = self.project_url(repo, "/merge_requests");
        let found: Vec<GlIid> = decode_json(
            self.authorize(self.http.get(url))
                .query(&[("state", "opened"), ("source_branch", branch)])
                .send()
                .await?,
        )
        .await?;
        Ok(found.first().map(|mr| mr.iid))
    }

    async fn create_pull_request(
        &self,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> HostResult<u64> {
        let url = self.project_url(repo, "/merge_requests");
        let created: GlIid = decode_json(
            self.authorize(self.http.post(url))
                .json(&json!({
                    "source_branch": head,
                    "target_branch": base,
                    "title": title,
                    "description": body,
                }))
                .send()
                .await?,
        )
        .await?;
        Ok(created.iid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn reads_merge_request_with_diff_refs() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/projects/group%2Fapp/merge_requests/3")
            .match_header("private-token", "glpat")
            .with_status(200)
            .with_body(
                json!({
                    "iid": 3,
                    "title": "Refactor",
                    "description": "body",
                    "sha": "head1",
                    "source_branch": "refactor",
                    "target_branch": "main",
                    "diff_refs": {"base_sha": "base1", "head_sha": "head1", "start_sha": "start1"}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = GitLabClient::new(server.url(), "glpat").unwrap();
        let mr = client.fetch_pull_request("group/app", 3).await.unwrap();

        assert_eq!(mr.number, 3);
        assert_eq!(mr.head_branch, "refactor");
        assert_eq!(mr.base_sha.as_deref(), Some("base1"));
        assert_eq!(mr.start_sha.as_deref(), Some("start1"));
    }

    #[tokio::test]
    async fn inline_comment_anchors_by_new_line() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/projects/42/merge_requests/3/discussions")
            .match_body(Matcher::PartialJson(json!({
                "position": {"new_path": "app.py", "new_line": 2, "head_sha": "h", "start_sha": "b"}
            })))
            .with_status(201)
            .with_body("{}")
            .create_async()
            .await;

        let client = GitLabClient::new(server.url(), "glpat").unwrap();
        let pr = PullRequest {
            number: 3,
            head_sha: "h".to_string(),
            base_sha: Some("b".to_string()),
            ..PullRequest::default()
        };
        let comment = InlineCommentRequest {
            file_path: "app.py".to_string(),
            line_number: 2,
            diff_position: 3,
            old_line: None,
            body: "**Info**".to_string(),
        };

        client.post_inline_comment("42", &pr, &comment).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn context_line_comment_carries_old_line() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/projects/42/merge_requests/3/discussions")
            .match_body(Matcher::PartialJson(json!({
                "position": {"new_line": 21, "old_line": 11}
            })))
            .with_status(201)
            .with_body("{}")
            .create_async()
            .await;

        let client = GitLabClient::new(server.url(), "glpat").unwrap();
        let pr = PullRequest {
            number: 3,
            head_sha: "h".to_string(),
            base_sha: Some("b".to_string()),
            ..PullRequest::default()
        };
        let comment = InlineCommentRequest {
            file_path: "app.py".to_string(),
            line_number: 21,
            diff_position: 2,
            old_line: Some(11),
            body: "**Minor**".to_string(),
        };

        client.post_inline_comment("42", &pr, &comment).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn changes_become_changed_files() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/projects/42/merge_requests/3/changes")
            .with_status(200)
            .with_body(
                json!({"changes": [
                    {"new_path": "a.rs", "diff": "@@ -1 +1 @@\n-x\n+y\n", "deleted_file": false},
                    {"new_path": "b.rs", "diff": "@@ -1 +0,0 @@\n-z\n", "deleted_file": true}
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let client = GitLabClient::new(server.url(), "glpat").unwrap();
        let files = client.fetch_changed_files("42", 3).await.unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "a.rs");
        assert!(files[1].deleted);
    }
}
