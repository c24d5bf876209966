//! Unit tests for the HTTP registry client

use super::*;
use rulepack_config::RegistryConfig;
use rulepack_core::utils::sha256_hex;
use tempfile::tempdir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> HttpRegistryClient {
    let config = RegistryConfig::new("test", server.uri(), RegistryKind::Http).with_token("secret");
    HttpRegistryClient::new(&config)
        .unwrap()
        .with_retry_config(RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        })
}

fn write_staged(dir: &Path, archive: &[u8]) -> (std::path::PathBuf, std::path::PathBuf) {
    let manifest = PackageManifest::new("security-rules".to_string(), Version::new(1, 2, 0));
    let manifest_path = dir.join("security-rules-1.2.0.manifest.json");
    let archive_path = dir.join("security-rules-1.2.0.tgz");
    std::fs::write(&manifest_path, serde_json::to_vec(&manifest).unwrap()).unwrap();
    std::fs::write(&archive_path, archive).unwrap();
    (manifest_path, archive_path)
}

#[tokio::test]
async fn test_search_sends_filters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/packages"))
        .and(query_param("q", "secur"))
        .and(query_param("tag", "security"))
        .and(query_param("limit", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "packages": [{
                "name": "security-rules",
                "latest_version": "1.2.0",
                "description": "Hardening",
                "tags": ["security"],
                "targets": ["cursor"]
            }],
            "total": 1
        })))
        .expect(1)
        .mount(&server)
        .await;

    let query = SearchQuery {
        query: "secur".to_string(),
        tag: Some("security".to_string()),
        target: None,
        limit: Some(5),
    };
    let results = client_for(&server).search(&query).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].latest_version, Version::new(1, 2, 0));
}

#[tokio::test]
async fn test_get_package_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/packages/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": "package not found", "status": 404
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server).get_package("missing").await.unwrap_err();
    assert!(matches!(err, RulepackError::NotFound { .. }));
}

#[tokio::test]
async fn test_get_package_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/packages/security-rules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "security-rules",
            "versions": ["1.2.0", "1.0.0"],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let first = client.get_package("security-rules").await.unwrap();
    let second = client.get_package("security-rules").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.versions, vec![Version::new(1, 0, 0), Version::new(1, 2, 0)]);
}

#[tokio::test]
async fn test_invalid_name_never_hits_network() {
    let server = MockServer::start().await;
    let err = client_for(&server).get_package("../etc").await.unwrap_err();
    assert!(matches!(err, RulepackError::InvalidFormat { .. }));
}

#[tokio::test]
async fn test_transient_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/packages/security-rules/versions/1.2.0"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/packages/security-rules/versions/1.2.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "security-rules",
            "version": "1.2.0",
            "sha256": "ab".repeat(32),
            "size_bytes": 512
        })))
        .mount(&server)
        .await;

    let info = client_for(&server)
        .get_version("security-rules", &Version::new(1, 2, 0))
        .await
        .unwrap();
    assert_eq!(info.size_bytes, 512);
}

#[tokio::test]
async fn test_publish_success() {
    let server = MockServer::start().await;
    let archive = b"fake archive bytes".to_vec();
    let sha = sha256_hex(&archive);

    Mock::given(method("POST"))
        .and(path("/packages"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "name": "security-rules",
            "version": "1.2.0",
            "sha256": sha,
            "download_url": format!("/blobs/{}", sha),
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let (manifest_path, archive_path) = write_staged(dir.path(), &archive);
    let result = client_for(&server)
        .publish(&manifest_path, &archive_path)
        .await
        .unwrap();

    assert_eq!(result.sha256, sha);
    assert_eq!(result.locator, format!("{}/blobs/{}", server.uri(), sha));
    assert!(!result.degraded);
}

#[tokio::test]
async fn test_publish_status_mapping() {
    let cases = [
        (401, "unauthorized"),
        (403, "unauthorized"),
        (409, "conflict"),
        (429, "rate-limited"),
        (500, "server-error"),
    ];

    for (status, code) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/packages"))
            .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!({
                "error": "nope", "status": status
            })))
            // Publish is never retried
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let (manifest_path, archive_path) = write_staged(dir.path(), b"archive");
        let err = client_for(&server)
            .publish(&manifest_path, &archive_path)
            .await
            .unwrap_err();
        assert_eq!(err.code(), code, "status {}", status);
        if let RulepackError::Conflict { package, version, .. } = err {
            assert_eq!(package, "security-rules");
            assert_eq!(version, "1.2.0");
        }
    }
}

#[tokio::test]
async fn test_download_blob_verifies_hash() {
    let server = MockServer::start().await;
    let content = b"archive content".to_vec();
    let sha = sha256_hex(&content);
    Mock::given(method("GET"))
        .and(path(format!("/blobs/{}", sha)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let dest = dir.path().join("downloads").join("blob.tgz");
    client_for(&server).download_blob(&sha, &dest).await.unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), content);
}

#[tokio::test]
async fn test_download_blob_mismatch_removes_partial_file() {
    let server = MockServer::start().await;
    let requested = sha256_hex(b"what we asked for");
    Mock::given(method("GET"))
        .and(path(format!("/blobs/{}", requested)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"something else".to_vec()))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let dest = dir.path().join("blob.tgz");
    let err = client_for(&server)
        .download_blob(&requested, &dest)
        .await
        .unwrap_err();

    assert!(matches!(err, RulepackError::IntegrityMismatch { .. }));
    assert!(!dest.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_slow_response_is_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"status": "ok"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = client_for(&server).with_timeout(Duration::from_millis(100));
    let err = client.health().await.unwrap_err();
    assert!(matches!(err, RulepackError::Timeout { .. }));
}

#[tokio::test]
async fn test_health_ok() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok", "version": "0.1.0"
        })))
        .mount(&server)
        .await;

    client_for(&server).health().await.unwrap();
    assert_eq!(client_for(&server).kind(), RegistryKind::Http);
}

#[test]
fn test_classify_unexpected_status() {
    let err = classify_status("r", StatusCode::IM_A_TEAPOT, "tea".to_string(), "x", None);
    assert!(matches!(err, RulepackError::ConnectionFailed { .. }));
}
