//! Unit tests for the shared client helpers

use super::*;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::tempdir;

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        multiplier: 2.0,
    }
}

#[test]
fn test_retry_config_default() {
    let config = RetryConfig::default();
    assert_eq!(config.max_retries, 3);
    assert_eq!(config.initial_delay, Duration::from_millis(100));
    assert_eq!(config.max_delay, Duration::from_secs(10));
    assert_eq!(config.multiplier, 2.0);
    assert_eq!(RetryConfig::none().max_retries, 0);
}

#[tokio::test]
async fn test_recoverable_error_is_retried_until_success() {
    let calls = AtomicU32::new(0);
    let counter = &calls;
    let result = with_retry(&fast_retry(), || async move {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(RulepackError::ServerError {
                status: 503,
                message: "busy".to_string(),
            })
        } else {
            Ok("done")
        }
    })
    .await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let calls = AtomicU32::new(0);
    let counter = &calls;
    let result: RegistryResult<()> = with_retry(&fast_retry(), || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(RulepackError::ConnectionFailed {
            message: "refused".to_string(),
            source: None,
        })
    })
    .await;

    assert!(matches!(result, Err(RulepackError::ConnectionFailed { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_terminal_error_is_not_retried() {
    let calls = AtomicU32::new(0);
    let counter = &calls;
    let result: RegistryResult<()> = with_retry(&fast_retry(), || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(RulepackError::not_found("package 'missing'"))
    })
    .await;

    assert!(matches!(result, Err(RulepackError::NotFound { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_deadline_reports_timeout() {
    let result: RegistryResult<()> = with_deadline("search", Duration::from_millis(10), async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    })
    .await;

    match result {
        Err(RulepackError::Timeout { operation, .. }) => assert_eq!(operation, "search"),
        other => panic!("expected Timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_place_verified_removes_mismatch() {
    let dir = tempdir().unwrap();
    let dest = dir.path().join("blob.tgz");
    let temp = partial_path(&dest);
    tokio::fs::write(&temp, b"corrupt").await.unwrap();

    let err = place_verified(&temp, &dest, &"a".repeat(64), &"b".repeat(64))
        .await
        .unwrap_err();
    assert!(matches!(err, RulepackError::IntegrityMismatch { .. }));
    assert!(!temp.exists());
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_place_verified_moves_match() {
    let dir = tempdir().unwrap();
    let dest = dir.path().join("blob.tgz");
    let temp = partial_path(&dest);
    assert!(temp.ends_with("blob.tgz.partial"));
    tokio::fs::write(&temp, b"ok").await.unwrap();

    let sha = "c".repeat(64);
    place_verified(&temp, &dest, &sha, &sha).await.unwrap();
    assert!(dest.exists());
    assert!(!temp.exists());
}

#[test]
fn test_ensure_sha256() {
    assert!(ensure_sha256(&"0f".repeat(32)).is_ok());
    assert!(ensure_sha256("../etc/passwd").is_err());
}
