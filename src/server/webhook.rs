//! Webhook ingestion: payload decoding, signature checks, and turning
//! GitHub/GitLab deliveries into review events.

use crate::review::ReviewEvent;
use crate::server::error::{WebhookError, WebhookResult};
use crate::server::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap},
    Json,
};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

const GITHUB_EVENT_HEADER: &str = "x-github-event";
const GITHUB_SIGNATURE_HEADER: &str = "x-hub-signature-256";
const GITLAB_EVENT_HEADER: &str = "x-gitlab-event";
const GITLAB_TOKEN_HEADER: &str = "x-gitlab-token";

const GITHUB_REVIEW_ACTIONS: [&str; 3] = ["opened", "synchronize", "reopened"];
const GITLAB_REVIEW_ACTIONS: [&str; 3] = ["open", "reopen", "update"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Host {
    GitHub,
    GitLab,
}

impl Host {
    pub fn label(self) -> &'static str {
        match self {
            Host::GitHub => "GitHub",
            Host::GitLab => "GitLab",
        }
    }
}

/// What to do with one webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookDecision {
    Review {
        host: Host,
        action: String,
        event: ReviewEvent,
    },
    /// A branch push; the open pull request for it still has to be found.
    ResolvePush {
        repository: String,
        branch: String,
        clone_url: Option<String>,
    },
    Ignore(String),
}

/// Decodes a JSON body, falling back to a form body carrying
/// `payload=<urlencoded json>`. The content type only matters for the error
/// reported when neither works.
pub fn parse_payload(content_type: &str, body: &[u8]) -> WebhookResult<Value> {
    let payload: Value = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(json_err) => {
            let form = std::str::from_utf8(body).ok();
            match form.and_then(|form| form.strip_prefix("payload=")) {
                Some(encoded) => {
                    let decoded = urlencoding::decode(&encoded.replace('+', " "))
                        .map_err(|err| WebhookError::BadPayload(err.to_string()))?
                        .into_owned();
                    serde_json::from_str(&decoded)
                        .map_err(|err| WebhookError::BadPayload(err.to_string()))?
                }
                None if content_type.contains("application/x-www-form-urlencoded") => {
                    return Err(WebhookError::BadPayload(
                        "No payload parameter found in form data".to_string(),
                    ));
                }
                None => {
                    debug!("Body of type {:?} is not JSON: {}", content_type, json_err);
                    return Err(WebhookError::BadPayload(format!(
                        "Invalid payload format: {json_err}"
                    )));
                }
            }
        }
    };

    let empty = match &payload {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if empty {
        return Err(WebhookError::BadPayload("Empty payload".to_string()));
    }
    Ok(payload)
}

/// Checks a GitHub `sha256=<hex>` HMAC of `body`.
pub fn verify_signature(secret: &str, body: &[u8], signature_header: &str) -> WebhookResult<()> {
    let signature_hex = signature_header
        .strip_prefix("sha256=")
        .ok_or(WebhookError::Unauthorized("Missing sha256 signature"))?;
    let expected = hex::decode(signature_hex)
        .map_err(|_| WebhookError::Unauthorized("Malformed signature"))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::Unauthorized("Invalid webhook secret"))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| WebhookError::Unauthorized("Signature mismatch"))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Verifies the delivery against the configured secret, if any.
pub fn authenticate(secret: Option<&str>, headers: &HeaderMap, body: &[u8]) -> WebhookResult<()> {
    let Some(secret) = secret else {
        debug!("No webhook secret configured, skipping signature verification");
        return Ok(());
    };

    if headers.contains_key(GITLAB_EVENT_HEADER) {
        let token = header_str(headers, GITLAB_TOKEN_HEADER)
            .ok_or(WebhookError::Unauthorized("Missing GitLab token"))?;
        return if constant_time_eq(token.as_bytes(), secret.as_bytes()) {
            Ok(())
        } else {
            Err(WebhookError::Unauthorized("GitLab token mismatch"))
        };
    }

    let signature = header_str(headers, GITHUB_SIGNATURE_HEADER)
        .ok_or(WebhookError::Unauthorized("Missing signature header"))?;
    verify_signature(secret, body, signature)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn text(payload: &Value, pointer: &str) -> String {
    payload
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn optional_text(payload: &Value, pointer: &str) -> Option<String> {
    payload
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// A review needs both a repository and a PR number to act on.
fn review_target(repository: Option<String>, number: Option<u64>) -> WebhookResult<(String, u64)> {
    match (repository.filter(|repo| !repo.is_empty()), number) {
        (Some(repository), Some(number)) => Ok((repository, number)),
        _ => Err(WebhookError::BadPayload(
            "Missing repository info or PR number".to_string(),
        )),
    }
}

/// Decides what to do with a delivery from its event headers and payload.
pub fn classify(headers: &HeaderMap, payload: &Value) -> WebhookResult<WebhookDecision> {
    if let Some(event) = header_str(headers, GITLAB_EVENT_HEADER) {
        return classify_gitlab(event, payload);
    }
    let event = header_str(headers, GITHUB_EVENT_HEADER).unwrap_or_default();
    classify_github(event, payload)
}

fn classify_github(event: &str, payload: &Value) -> WebhookResult<WebhookDecision> {
    let decision = match event {
        "pull_request" => {
            let (Some(_), Some(action)) = (
                payload.get("pull_request"),
                payload.get("action").and_then(Value::as_str),
            ) else {
                return Ok(WebhookDecision::Ignore("Not a valid PR event".to_string()));
            };
            if !GITHUB_REVIEW_ACTIONS.contains(&action) {
                return Ok(WebhookDecision::Ignore(format!("Ignoring action: {action}")));
            }
            let (repository, pr_number) = review_target(
                optional_text(payload, "/repository/full_name"),
                payload.pointer("/pull_request/number").and_then(Value::as_u64),
            )?;

            WebhookDecision::Review {
                host: Host::GitHub,
                action: action.to_string(),
                event: ReviewEvent {
                    repository,
                    pr_number,
                    head_sha: optional_text(payload, "/pull_request/head/sha"),
                    head_branch: text(payload, "/pull_request/head/ref"),
                    base_branch: text(payload, "/pull_request/base/ref"),
                    title: text(payload, "/pull_request/title"),
                    description: text(payload, "/pull_request/body"),
                    clone_url: optional_text(payload, "/repository/clone_url"),
                },
            }
        }
        "push" => {
            let git_ref = text(payload, "/ref");
            match git_ref.strip_prefix("refs/heads/") {
                Some(branch) => WebhookDecision::ResolvePush {
                    repository: optional_text(payload, "/repository/full_name")
                        .filter(|repo| !repo.is_empty())
                        .ok_or_else(|| {
                            WebhookError::BadPayload("Missing repository info or branch".to_string())
                        })?,
                    branch: branch.to_string(),
                    clone_url: optional_text(payload, "/repository/clone_url"),
                },
                None => WebhookDecision::Ignore(format!("Ignoring push to {git_ref}")),
            }
        }
        other => WebhookDecision::Ignore(format!("Ignoring event: {other}")),
    };
    Ok(decision)
}

fn classify_gitlab(event: &str, payload: &Value) -> WebhookResult<WebhookDecision> {
    if event != "Merge Request Hook" {
        return Ok(WebhookDecision::Ignore(format!("Ignoring event: {event}")));
    }
    let action = text(payload, "/object_attributes/action");
    if !GITLAB_REVIEW_ACTIONS.contains(&action.as_str()) {
        return Ok(WebhookDecision::Ignore(format!("Ignoring action: {action}")));
    }

    let project = optional_text(payload, "/project/path_with_namespace").or_else(|| {
        payload
            .pointer("/project/id")
            .and_then(Value::as_u64)
            .map(|id| id.to_string())
    });
    let (repository, pr_number) = review_target(
        project,
        payload.pointer("/object_attributes/iid").and_then(Value::as_u64),
    )?;

    Ok(WebhookDecision::Review {
        host: Host::GitLab,
        action,
        event: ReviewEvent {
            repository,
            pr_number,
            head_sha: optional_text(payload, "/object_attributes/last_commit/id"),
            head_branch: text(payload, "/object_attributes/source_branch"),
            base_branch: text(payload, "/object_attributes/target_branch"),
            title: text(payload, "/object_attributes/title"),
            description: text(payload, "/object_attributes/description"),
            clone_url: optional_text(payload, "/project/git_http_url"),
        },
    })
}

/// `POST /review`
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult<Json<Value>> {
    authenticate(state.config.webhook_secret.as_deref(), &headers, &body).map_err(|err| {
        warn!("Rejected webhook: {}", err);
        err
    })?;

    let content_type = header_str(&headers, header::CONTENT_TYPE.as_str()).unwrap_or_default();
    let payload = parse_payload(content_type, &body).map_err(|err| {
        warn!("{}", err);
        err
    })?;

    let decision = classify(&headers, &payload).map_err(|err| {
        warn!("{}", err);
        err
    })?;

    match decision {
        WebhookDecision::Ignore(message) => {
            info!("{}", message);
            Ok(Json(json!({ "message": message })))
        }
        WebhookDecision::Review {
            host,
            action,
            event,
        } => start_review(&state, host, &action, event),
        WebhookDecision::ResolvePush {
            repository,
            branch,
            clone_url,
        } => {
            let reviewer = state.reviewer(Host::GitHub)?;
            let found = reviewer
                .host()
                .find_open_pull_request(&repository, &branch)
                .await
                .map_err(|err| WebhookError::Upstream(err.to_string()))?;
            let Some(number) = found else {
                let message = format!("No open PR found for branch {branch}");
                info!("{}", message);
                return Ok(Json(json!({ "message": message })));
            };

            let pr = reviewer
                .host()
                .fetch_pull_request(&repository, number)
                .await
                .map_err(|err| WebhookError::Upstream(err.to_string()))?;
            let event = ReviewEvent {
                repository,
                pr_number: number,
                head_sha: Some(pr.head_sha),
                head_branch: pr.head_branch,
                base_branch: pr.base_branch,
                title: pr.title,
                description: pr.description,
                clone_url: clone_url.or(pr.clone_url),
            };
            start_review(&state, Host::GitHub, "push", event)
        }
    }
}

/// Spawns the review and acknowledges at once.
fn start_review(
    state: &AppState,
    host: Host,
    action: &str,
    event: ReviewEvent,
) -> WebhookResult<Json<Value>> {
    let reviewer = Arc::clone(state.reviewer(host)?);
    info!(
        "Processing PR #{} in {} (action: {})",
        event.pr_number, event.repository, action
    );

    let response = json!({
        "status": "processing",
        "action": action,
        "pr_number": event.pr_number,
        "repository": event.repository,
    });
    tokio::spawn(async move { reviewer.handle(event).await });

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    fn pull_request_payload(action: &str) -> Value {
        json!({
            "action": action,
            "pull_request": {
                "number": 7,
                "title": "Add guard",
                "body": "Fixes a crash",
                "head": {"ref": "feature", "sha": "abc"},
                "base": {"ref": "main", "sha": "def"}
            },
            "repository": {"full_name": "acme/app", "clone_url": "https://github.com/acme/app.git"}
        })
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn parses_json_and_form_payloads() {
        let json_body = br#"{"action":"opened"}"#;
        assert_eq!(
            parse_payload("application/json", json_body).unwrap()["action"],
            "opened"
        );

        let form_body = format!(
            "payload={}",
            urlencoding::encode(r#"{"action":"closed","n":1}"#)
        );
        assert_eq!(
            parse_payload("application/x-www-form-urlencoded", form_body.as_bytes()).unwrap()["action"],
            "closed"
        );
    }

    #[test]
    fn form_payload_decodes_plus_as_space() {
        let body = b"payload=%7B%22title%22%3A%22two+words%22%7D";
        let payload = parse_payload("application/x-www-form-urlencoded", body).unwrap();
        assert_eq!(payload["title"], "two words");
    }

    #[test]
    fn json_is_tried_whatever_the_content_type() {
        assert_eq!(
            parse_payload("text/plain", br#"{"action":"opened"}"#).unwrap()["action"],
            "opened"
        );
        assert_eq!(parse_payload("", br#"{"n":1}"#).unwrap()["n"], 1);

        let form_body = format!("payload={}", urlencoding::encode(r#"{"action":"closed"}"#));
        assert_eq!(
            parse_payload("application/json", form_body.as_bytes()).unwrap()["action"],
            "closed"
        );
    }

    #[test]
    fn rejects_unusable_payloads() {
        assert!(matches!(
            parse_payload("text/plain", b"hi"),
            Err(WebhookError::BadPayload(_))
        ));
        assert!(matches!(
            parse_payload("application/x-www-form-urlencoded", b"other=1"),
            Err(WebhookError::BadPayload(_))
        ));
        assert!(matches!(
            parse_payload("application/json", b"{}"),
            Err(WebhookError::BadPayload(message)) if message == "Empty payload"
        ));
        assert!(matches!(
            parse_payload("application/json", b"{not json"),
            Err(WebhookError::BadPayload(_))
        ));
    }

    #[test]
    fn signature_must_match_body() {
        let body = br#"{"action":"opened"}"#;
        let signature = sign("s3cret", body);

        assert!(verify_signature("s3cret", body, &signature).is_ok());
        assert!(verify_signature("other", body, &signature).is_err());
        assert!(verify_signature("s3cret", b"tampered", &signature).is_err());
        assert!(verify_signature("s3cret", body, "deadbeef").is_err());
        assert!(verify_signature("s3cret", body, "sha256=zz").is_err());
    }

    #[test]
    fn authentication_is_skipped_without_secret() {
        assert!(authenticate(None, &HeaderMap::new(), b"{}").is_ok());
        assert!(matches!(
            authenticate(Some("s"), &HeaderMap::new(), b"{}"),
            Err(WebhookError::Unauthorized(_))
        ));
    }

    #[test]
    fn gitlab_token_is_compared_verbatim() {
        let good = headers(&[(GITLAB_EVENT_HEADER, "Merge Request Hook"), (GITLAB_TOKEN_HEADER, "tok")]);
        let bad = headers(&[(GITLAB_EVENT_HEADER, "Merge Request Hook"), (GITLAB_TOKEN_HEADER, "nope")]);

        assert!(authenticate(Some("tok"), &good, b"{}").is_ok());
        assert!(authenticate(Some("tok"), &bad, b"{}").is_err());
    }

    #[test]
    fn reviews_only_selected_pull_request_actions() {
        let github = headers(&[(GITHUB_EVENT_HEADER, "pull_request")]);

        match classify(&github, &pull_request_payload("synchronize")).unwrap() {
            WebhookDecision::Review { host, action, event } => {
                assert_eq!(host, Host::GitHub);
                assert_eq!(action, "synchronize");
                assert_eq!(event.repository, "acme/app");
                assert_eq!(event.pr_number, 7);
                assert_eq!(event.head_branch, "feature");
                assert_eq!(event.base_branch, "main");
                assert_eq!(event.head_sha.as_deref(), Some("abc"));
                assert_eq!(event.clone_url.as_deref(), Some("https://github.com/acme/app.git"));
            }
            other => panic!("unexpected decision: {other:?}"),
        }

        assert_eq!(
            classify(&github, &pull_request_payload("closed")).unwrap(),
            WebhookDecision::Ignore("Ignoring action: closed".to_string())
        );
        assert_eq!(
            classify(&headers(&[(GITHUB_EVENT_HEADER, "issues")]), &pull_request_payload("opened")).unwrap(),
            WebhookDecision::Ignore("Ignoring event: issues".to_string())
        );
        assert_eq!(
            classify(&github, &json!({"action": "opened"})).unwrap(),
            WebhookDecision::Ignore("Not a valid PR event".to_string())
        );
    }

    #[test]
    fn push_events_resolve_by_branch() {
        let push = headers(&[(GITHUB_EVENT_HEADER, "push")]);
        let payload = json!({
            "ref": "refs/heads/feature/x",
            "repository": {"full_name": "acme/app", "clone_url": "https://github.com/acme/app.git"}
        });

        assert_eq!(
            classify(&push, &payload).unwrap(),
            WebhookDecision::ResolvePush {
                repository: "acme/app".to_string(),
                branch: "feature/x".to_string(),
                clone_url: Some("https://github.com/acme/app.git".to_string()),
            }
        );
        assert!(matches!(
            classify(&push, &json!({"ref": "refs/tags/v1"})).unwrap(),
            WebhookDecision::Ignore(_)
        ));
        assert!(matches!(
            classify(&push, &json!({"ref": "refs/heads/main"})),
            Err(WebhookError::BadPayload(_))
        ));
    }

    #[test]
    fn gitlab_merge_request_hook_becomes_review() {
        let gitlab = headers(&[(GITLAB_EVENT_HEADER, "Merge Request Hook")]);
        let payload = json!({
            "object_kind": "merge_request",
            "project": {"id": 42, "path_with_namespace": "group/app", "git_http_url": "https://gitlab.com/group/app.git"},
            "object_attributes": {
                "iid": 3,
                "action": "update",
                "source_branch": "refactor",
                "target_branch": "main",
                "title": "Refactor",
                "description": null,
                "last_commit": {"id": "head1"}
            }
        });

        match classify(&gitlab, &payload).unwrap() {
            WebhookDecision::Review { host, event, .. } => {
                assert_eq!(host, Host::GitLab);
                assert_eq!(event.repository, "group/app");
                assert_eq!(event.pr_number, 3);
                assert_eq!(event.head_sha.as_deref(), Some("head1"));
                assert_eq!(event.description, "");
            }
            other => panic!("unexpected decision: {other:?}"),
        }

        let mut merged = payload.clone();
        merged["object_attributes"]["action"] = json!("merge");
        assert!(matches!(classify(&gitlab, &merged).unwrap(), WebhookDecision::Ignore(_)));

        let mut anonymous = payload.clone();
        anonymous["object_attributes"]
            .as_object_mut()
            .unwrap()
            .remove("iid");
        assert!(matches!(
            classify(&gitlab, &anonymous),
            Err(WebhookError::BadPayload(_))
        ));
    }

    #[test]
    fn pull_request_without_number_or_repository_is_rejected() {
        let github = headers(&[(GITHUB_EVENT_HEADER, "pull_request")]);

        let mut no_number = pull_request_payload("opened");
        no_number["pull_request"].as_object_mut().unwrap().remove("number");
        assert!(matches!(
            classify(&github, &no_number),
            Err(WebhookError::BadPayload(message)) if message == "Missing repository info or PR number"
        ));

        let mut no_repository = pull_request_payload("opened");
        no_repository.as_object_mut().unwrap().remove("repository");
        assert!(matches!(
            classify(&github, &no_repository),
            Err(WebhookError::BadPayload(_))
        ));
    }
}
