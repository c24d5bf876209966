//! Unit tests for the host API client

use super::*;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn remote() -> RemoteRepo {
    RemoteRepo {
        host: "github.com".to_string(),
        owner: "acme".to_string(),
        repo: "rules".to_string(),
    }
}

fn client_for(server: &MockServer) -> GitHostClient {
    GitHostClient::new(
        "team",
        &server.uri(),
        remote(),
        Some("ghp_token"),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[test]
fn test_parse_remote_variants() {
    let expected = remote();
    assert_eq!(RemoteRepo::parse("https://github.com/acme/rules.git"), Some(expected.clone()));
    assert_eq!(RemoteRepo::parse("https://github.com/acme/rules/"), Some(expected.clone()));
    assert_eq!(RemoteRepo::parse("git@github.com:acme/rules.git"), Some(expected.clone()));
    assert_eq!(RemoteRepo::parse("ssh://git@GitHub.com:22/acme/rules"), Some(expected));

    let local = RemoteRepo::parse("file:///tmp/registries/acme/rules.git").unwrap();
    assert_eq!(local.host, "");
    assert_eq!(local.owner, "acme");
    assert_eq!(local.api_base(), None);

    assert!(RemoteRepo::parse("https://github.com/").is_none());
}

#[test]
fn test_api_base_by_host() {
    assert_eq!(remote().api_base().unwrap(), "https://api.github.com");
    let enterprise = RemoteRepo::parse("https://git.corp.example/acme/rules").unwrap();
    assert_eq!(enterprise.api_base().unwrap(), "https://git.corp.example/api/v3");
}

#[test]
fn test_compare_url() {
    assert_eq!(
        compare_url(
            "https://user:pw@github.com/acme/rules.git",
            "main",
            "publish/security-rules/1.2.0"
        ),
        "https://github.com/acme/rules/compare/main...publish/security-rules/1.2.0"
    );
    assert_eq!(
        web_url("git@github.com:acme/rules.git"),
        "https://github.com/acme/rules"
    );
    assert_eq!(
        web_url("file:///srv/acme/rules.git"),
        "file:///srv/acme/rules"
    );
}

#[test]
fn test_quota_wait() {
    let status = RateLimitStatus {
        limit: 5000,
        remaining: 4000,
        reset: 100,
    };
    assert_eq!(quota_wait(&status, 10, 0), None);

    let low = RateLimitStatus { remaining: 3, ..status };
    assert_eq!(quota_wait(&low, 10, 40), Some(Duration::from_secs(61)));
    // Reset already passed
    assert_eq!(quota_wait(&low, 10, 500), Some(Duration::from_secs(1)));
}

#[tokio::test]
async fn test_write_access_confirmed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/rules"))
        .and(header("authorization", "Bearer ghp_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "default_branch": "main",
            "html_url": "https://github.com/acme/rules",
            "permissions": {"admin": false, "maintain": false, "push": true, "pull": true}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let info = client_for(&server).check_write_access().await.unwrap();
    assert_eq!(info.default_branch, "main");
}

#[tokio::test]
async fn test_read_only_token_is_insufficient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/rules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "default_branch": "main",
            "permissions": {"push": false, "pull": true}
        })))
        .mount(&server)
        .await;

    let err = client_for(&server).check_write_access().await.unwrap_err();
    assert!(matches!(err, RulepackError::InsufficientAccess { .. }));
}

#[tokio::test]
async fn test_hidden_repository_is_insufficient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/rules"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(serde_json::json!({"message": "Not Found"})),
        )
        .mount(&server)
        .await;

    let err = client_for(&server).check_write_access().await.unwrap_err();
    assert!(matches!(err, RulepackError::InsufficientAccess { .. }));
}

#[tokio::test]
async fn test_bad_token_is_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/rules"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(serde_json::json!({"message": "Bad credentials"})),
        )
        .mount(&server)
        .await;

    let err = client_for(&server).check_write_access().await.unwrap_err();
    match err {
        RulepackError::Unauthorized { message, .. } => assert_eq!(message, "Bad credentials"),
        other => panic!("expected Unauthorized, got {other:?}"),
    }
}

#[tokio::test]
async fn test_exhausted_quota_is_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/rules"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .set_body_json(serde_json::json!({"message": "API rate limit exceeded"})),
        )
        .mount(&server)
        .await;

    let err = client_for(&server).repository().await.unwrap_err();
    assert!(matches!(err, RulepackError::RateLimited { .. }));
}

#[tokio::test]
async fn test_wait_for_quota_with_headroom_returns_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rate_limit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "resources": {"core": {"limit": 5000, "remaining": 4999, "reset": 0}},
            "rate": {"limit": 5000, "remaining": 4999, "reset": 0}
        })))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server).wait_for_quota().await.unwrap();
}

#[tokio::test]
async fn test_wait_beyond_cap_is_rate_limited() {
    let server = MockServer::start().await;
    let reset = chrono::Utc::now().timestamp() + 3600;
    Mock::given(method("GET"))
        .and(path("/rate_limit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "resources": {"core": {"limit": 5000, "remaining": 2, "reset": reset}}
        })))
        .mount(&server)
        .await;

    let err = client_for(&server).wait_for_quota().await.unwrap_err();
    assert!(matches!(err, RulepackError::RateLimited { .. }));
}

#[tokio::test]
async fn test_create_pull_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/repos/acme/rules/pulls"))
        .and(body_partial_json(serde_json::json!({
            "head": "publish/security-rules/1.2.0",
            "base": "main"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "number": 7,
            "html_url": "https://github.com/acme/rules/pull/7"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let pr = client_for(&server)
        .create_pull_request(&PullRequestRequest {
            title: "Publish security-rules@1.2.0".to_string(),
            head: "publish/security-rules/1.2.0".to_string(),
            base: "main".to_string(),
            body: "sha256: abc".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(pr.number, 7);
    assert_eq!(pr.html_url, "https://github.com/acme/rules/pull/7");
}

#[tokio::test]
async fn test_existing_pull_request_error_keeps_details() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/repos/acme/rules/pulls"))
        .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
            "message": "Validation Failed",
            "errors": [{"resource": "PullRequest", "code": "custom",
                        "message": "A pull request already exists for acme:publish/x/1.0.0."}]
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .create_pull_request(&PullRequestRequest {
            title: "t".to_string(),
            head: "publish/x/1.0.0".to_string(),
            base: "main".to_string(),
            body: String::new(),
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already exists"));
}
