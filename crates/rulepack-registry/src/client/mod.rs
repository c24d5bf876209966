//! The backend-neutral registry contract and the helpers every backend uses
//!
//! Transport failures are classified into `RulepackError` before they leave
//! a backend, so callers never see HTTP status codes or git stderr parsing.

use async_trait::async_trait;
use rulepack_core::error::RulepackError;
use rulepack_core::types::{
    PackageInfo, PackageManifest, PackageSummary, PublishResult, RegistryKind, SearchQuery,
    Version, VersionInfo,
};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::RegistryResult;

/// Operations every registry backend provides
///
/// Each call is bounded by the backend's configured deadline; running out
/// of time yields `RulepackError::Timeout`.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Configured registry name
    fn name(&self) -> &str;

    /// Backend type tag
    fn kind(&self) -> RegistryKind;

    async fn search(&self, query: &SearchQuery) -> RegistryResult<Vec<PackageSummary>>;

    async fn get_package(&self, name: &str) -> RegistryResult<PackageInfo>;

    async fn get_version(&self, name: &str, version: &Version) -> RegistryResult<VersionInfo>;

    /// Publish a staged archive together with its manifest
    async fn publish(
        &self,
        manifest_path: &Path,
        archive_path: &Path,
    ) -> RegistryResult<PublishResult>;

    /// Write the blob with the given sha256 to `dest`
    ///
    /// The written file is re-hashed; on mismatch it is removed and
    /// `IntegrityMismatch` is returned.
    async fn download_blob(&self, sha256: &str, dest: &Path) -> RegistryResult<()>;

    async fn health(&self) -> RegistryResult<()>;
}

/// Configuration for exponential backoff retry logic
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A configuration that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Run `operation`, retrying recoverable failures with exponential backoff
///
/// Only use this for idempotent operations.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> RegistryResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = RegistryResult<T>>,
{
    let mut delay = config.initial_delay;
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if attempt >= config.max_retries || !error.is_recoverable() {
                    return Err(error);
                }
                attempt += 1;
                warn!("Attempt {} failed ({}), retrying in {:?}", attempt, error, delay);

                tokio::time::sleep(delay).await;
                delay = std::cmp::min(
                    Duration::from_millis((delay.as_millis() as f64 * config.multiplier) as u64),
                    config.max_delay,
                );
            },
        }
    }
}

/// Bound a future by a deadline, reporting expiry as `Timeout`
pub async fn with_deadline<Fut, T>(operation: &str, limit: Duration, future: Fut) -> RegistryResult<T>
where
    Fut: Future<Output = RegistryResult<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(RulepackError::Timeout {
            operation: operation.to_string(),
            seconds: limit.as_secs(),
        }),
    }
}

/// Move a downloaded temp file into place if its hash matches
///
/// On mismatch the temp file is deleted and nothing is written at `dest`.
pub(crate) async fn place_verified(
    temp: &Path,
    dest: &Path,
    expected: &str,
    actual: &str,
) -> RegistryResult<()> {
    if !actual.eq_ignore_ascii_case(expected) {
        if let Err(e) = tokio::fs::remove_file(temp).await {
            warn!("Failed to remove corrupt download {}: {}", temp.display(), e);
        }
        return Err(RulepackError::IntegrityMismatch {
            resource: format!("blob {}", expected),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }

    tokio::fs::rename(temp, dest)
        .await
        .map_err(|e| RulepackError::io(format!("Failed to move download to {}", dest.display()), e))?;
    debug!("Verified blob {} at {}", expected, dest.display());
    Ok(())
}

/// Temp file name used while a blob is being written next to `dest`
pub(crate) fn partial_path(dest: &Path) -> std::path::PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "blob".into());
    name.push(".partial");
    dest.with_file_name(name)
}

/// Reject anything that is not a sha256 hex digest
pub(crate) fn ensure_sha256(sha256: &str) -> RegistryResult<()> {
    if rulepack_core::utils::is_sha256_hex(sha256) {
        Ok(())
    } else {
        Err(RulepackError::InvalidFormat {
            what: "sha256".to_string(),
            input: sha256.to_string(),
            reason: "expected 64 hex characters".to_string(),
        })
    }
}

/// Reject package names that could escape a URL path or directory
pub(crate) fn validate_name(name: &str) -> RegistryResult<()> {
    if PackageManifest::is_valid_name(name) {
        Ok(())
    } else {
        Err(RulepackError::InvalidFormat {
            what: "package name".to_string(),
            input: name.to_string(),
            reason: "use lowercase letters, digits, '-' and '_'".to_string(),
        })
    }
}

#[cfg(test)]
mod tests;
