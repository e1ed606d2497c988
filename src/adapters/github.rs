//! GitHub REST client.
//!
//! Endpoints used:
//! - GET  /repos/{repo}/pulls/{number}
//! - GET  /repos/{repo}/pulls/{number}/files      (field "patch" is the unified diff)
//! - GET  /repos/{repo}/contents/{path}?ref=      (raw media type)
//! - POST /repos/{repo}/issues/{number}/comments
//! - POST /repos/{repo}/pulls/{number}/comments   (anchored by diff position)
//! - GET  /repos/{repo}/pulls?state=open&head=owner:branch
//! - POST /repos/{repo}/pulls

use crate::adapters::host::{
    decode_json, ensure_success, ChangedFile, HostResult, PullRequest, SourceControl,
};
use crate::core::comment::InlineCommentRequest;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

const PAGE_SIZE: usize = 100;
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.v3.raw";

#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: Client,
    base_api: String,
    token: String,
}

#[derive(Deserialize)]
struct GhPull {
    number: u64,
    title: Option<String>,
    body: Option<String>,
    head: GhRef,
    base: GhRef,
}

#[derive(Deserialize)]
struct GhRef {
    sha: String,
    #[serde(rename = "ref")]
    ref_name: String,
    repo: Option<GhRepo>,
}

#[derive(Deserialize)]
struct GhRepo {
    clone_url: Option<String>,
}

#[derive(Deserialize)]
struct GhFile {
    filename: String,
    #[serde(default)]
    patch: Option<String>,
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
struct GhNumber {
    number: u64,
}

impl GitHubClient {
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

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.http.get(format!("{}{}", self.base_api, path)), JSON_MEDIA_TYPE)
    }

    fn get_raw(&self, path: &str) -> RequestBuilder {
        self.authorize(self.http.get(format!("{}{}", self.base_api, path)), RAW_MEDIA_TYPE)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorize(self.http.post(format!("{}{}", self.base_api, path)), JSON_MEDIA_TYPE)
    }

    fn authorize(&self, request: RequestBuilder, accept: &str) -> RequestBuilder {
        request
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", accept)
    }
}

#[async_trait]
impl SourceControl for GitHubClient {
    fn name(&self) -> &str {
        "github"
    }

    fn git_token(&self) -> Option<&str> {
        Some(&self.token)
    }

    async fn fetch_pull_request(&self, repo: &str, number: u64) -> HostResult<PullRequest> {
        let pull: GhPull = decode_json(
            self.get(&format!("/repos/{repo}/pulls/{number}"))
                .send()
                .await?,
        )
        .await?;

        Ok(PullRequest {
            number: pull.number,
            title: pull.title.unwrap_or_default(),
            description: pull.body.unwrap_or_default(),
            head_sha: pull.head.sha,
            head_branch: pull.head.ref_name,
            base_branch: pull.base.ref_name,
            base_sha: Some(pull.base.sha),
            start_sha: None,
            clone_url: pull.head.repo.and_then(|r| r.clone_url),
        })
    }

    async fn fetch_changed_files(&self, repo: &str, number: u64) -> HostResult<Vec<ChangedFile>> {
        let mut files = Vec::new();
        let mut page = 1;

        loop {
            let batch: Vec<GhFile> = decode_json(
                self.get(&format!(
                    "/repos/{repo}/pulls/{number}/files?per_page={PAGE_SIZE}&page={page}"
                ))
                .send()
                .await?,
            )
            .await?;
            let last_page = batch.len() < PAGE_SIZE;

            files.extend(batch.into_iter().map(|file| ChangedFile {
                deleted: file.status == "removed",
                path: file.filename,
                patch: file.patch.unwrap_or_default(),
            }));

            if last_page {
                break;
            }
            page += 1;
        }

        debug!("Fetched {} changed files for {}#{}", files.len(), repo, number);
        Ok(files)
    }

    async fn fetch_file_content(
        &self,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> HostResult<String> {
        let response = self
            .get_raw(&format!("/repos/{repo}/contents/{}", encode_path(path)))
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
        let response = self
            .post(&format!("/repos/{repo}/issues/{number}/comments"))
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
        let response = self
            .post(&format!("/repos/{repo}/pulls/{}/comments", pr.number))
            .json(&json!({
                "body": comment.body,
                "commit_id": pr.head_sha,
                "path": comment.file_path,
                "position": comment.diff_position,
            }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn find_open_pull_request(&self, repo: &str, branch: &str) -> HostResult<Option<u64>> {
        let owner = repo.split('/').next().unwrap_or(repo);
        let head = format!("{owner}:{branch}");
        let pulls: Vec<GhNumber> = decode_json(
            self.get(&format!("/repos/{repo}/pulls"))
                .query(&[("state", "open"), ("head", head.as_str())])
                .send()
                .await?,
        )
        .await?;
        Ok(pulls.first().map(|pull| pull.number))
    }

    async fn create_pull_request(
        &self,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> HostResult<u64> {
        let created: GhNumber = decode_json(
            self.post(&format!("/repos/{repo}/pulls"))
                .json(&json!({ "title": title, "head": head, "base": base, "body": body }))
                .send()
                .await?,
        )
        .await?;
        Ok(created.number)
    }
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::host::HostError;
    use mockito::Matcher;

    fn client(server: &mockito::Server) -> GitHubClient {
        GitHubClient::new(server.url(), "tkn").unwrap()
    }

    #[tokio::test]
    async fn fetches_pull_request_metadata() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repos/acme/app/pulls/7")
            .match_header("authorization", "token tkn")
            .with_status(200)
            .with_body(
                json!({
                    "number": 7,
                    "title": "Add guard",
                    "body": null,
                    "head": {"sha": "abc", "ref": "feature", "repo": {"clone_url": "https://github.com/acme/app.git"}},
                    "base": {"sha": "def", "ref": "main", "repo": null}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let pr = client(&server).fetch_pull_request("acme/app", 7).await.unwrap();

        mock.assert_async().await;
        assert_eq!(pr.title, "Add guard");
        assert_eq!(pr.description, "");
        assert_eq!(pr.head_sha, "abc");
        assert_eq!(pr.base_branch, "main");
        assert_eq!(pr.clone_url.as_deref(), Some("https://github.com/acme/app.git"));
    }

    #[tokio::test]
    async fn lists_changed_files_with_missing_patch() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/app/pulls/7/files")
            .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
            .with_status(200)
            .with_body(
                json!([
                    {"filename": "app.py", "status": "modified", "patch": "@@ -1 +1 @@\n-a\n+b"},
                    {"filename": "logo.png", "status": "added"},
                    {"filename": "old.py", "status": "removed", "patch": "@@ -1 +0,0 @@\n-x"}
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let files = client(&server).fetch_changed_files("acme/app", 7).await.unwrap();

        assert_eq!(files.len(), 3);
        assert_eq!(files[0].patch, "@@ -1 +1 @@\n-a\n+b");
        assert_eq!(files[1].patch, "");
        assert!(files[2].deleted);
    }

    #[tokio::test]
    async fn missing_file_content_is_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/app/contents/src/missing.py")
            .match_query(Matcher::UrlEncoded("ref".into(), "abc".into()))
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/app/contents/app.py")
            .match_query(Matcher::Any)
            .match_header("accept", "application/vnd.github.v3.raw")
            .with_status(200)
            .with_body("print('hi')\n")
            .create_async()
            .await;

        let gh = client(&server);

        assert_eq!(gh.fetch_file_content("acme/app", "src/missing.py", "abc").await.unwrap(), "");
        assert_eq!(gh.fetch_file_content("acme/app", "app.py", "abc").await.unwrap(), "print('hi')\n");
    }

    #[test]
    fn encodes_each_path_segment() {
        assert_eq!(encode_path("src/new file.py"), "src/new%20file.py");
    }

    #[tokio::test]
    async fn inline_comment_posts_position_and_reports_failures() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/repos/acme/app/pulls/7/comments")
            .match_body(Matcher::Json(json!({
                "body": "**Info**",
                "commit_id": "abc",
                "path": "app.py",
                "position": 3
            })))
            .with_status(422)
            .with_body("position invalid")
            .create_async()
            .await;

        let pr = PullRequest {
            number: 7,
            head_sha: "abc".to_string(),
            ..PullRequest::default()
        };
        let comment = InlineCommentRequest {
            file_path: "app.py".to_string(),
            line_number: 2,
            diff_position: 3,
            old_line: None,
            body: "**Info**".to_string(),
        };

        let err = client(&server)
            .post_inline_comment("acme/app", &pr, &comment)
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, HostError::Http { status, .. } if status == StatusCode::UNPROCESSABLE_ENTITY));
    }

    #[tokio::test]
    async fn finds_open_pull_request_for_branch() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/app/pulls")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("state".into(), "open".into()),
                Matcher::UrlEncoded("head".into(), "acme:feature".into()),
            ]))
            .with_status(200)
            .with_body(json!([{"number": 12}]).to_string())
            .create_async()
            .await;

        let found = client(&server)
            .find_open_pull_request("acme/app", "feature")
            .await
            .unwrap();

        assert_eq!(found, Some(12));
    }
}
