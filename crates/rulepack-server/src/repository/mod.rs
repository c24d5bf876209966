//! Package metadata storage
//!
//! Handlers talk to storage only through [`PackageRepository`]. Every call
//! first takes a slot from a bounded pool; waiting for a slot is capped by
//! the acquire timeout so a saturated store answers 503 instead of queueing
//! requests without limit. Writes that lose a race against a concurrent
//! writer report [`RepositoryError::WriteConflict`] and are retried with
//! [`with_write_retry`].

pub mod memory;

use async_trait::async_trait;
use rulepack_core::types::{
    PackageInfo, PackageManifest, PackageSummary, SearchQuery, Version, VersionInfo,
};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub use memory::InMemoryRepository;

/// Storage-level failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{name}@{version} already exists")]
    AlreadyExists { name: String, version: String },

    #[error("Concurrent update of {0}, try again")]
    WriteConflict(String),

    #[error("No storage connection available within {0:?}")]
    PoolTimeout(Duration),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// A version about to be recorded
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub manifest: PackageManifest,
    pub sha256: String,
    pub size_bytes: u64,
    /// Rule files inside the archive
    pub files: Vec<String>,
}

/// One page of search results
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub packages: Vec<PackageSummary>,
    /// Matches before the limit was applied
    pub total: usize,
}

#[async_trait]
pub trait PackageRepository: Send + Sync {
    async fn get_package(&self, name: &str) -> RepositoryResult<PackageInfo>;

    /// Register a package if it does not exist yet
    async fn create_package(&self, manifest: &PackageManifest) -> RepositoryResult<PackageInfo>;

    async fn get_version(&self, name: &str, version: &Version) -> RepositoryResult<VersionInfo>;

    /// Record a new version of an existing package
    async fn create_version(&self, version: &NewVersion) -> RepositoryResult<VersionInfo>;

    async fn search(&self, query: &SearchQuery) -> RepositoryResult<SearchPage>;

    /// Whether `token` may publish
    async fn validate_token(&self, token: &str) -> RepositoryResult<bool>;

    /// Cheap liveness probe
    async fn ping(&self) -> RepositoryResult<()>;
}

/// Retry policy for write conflicts
#[derive(Debug, Clone, Copy)]
pub struct WriteRetry {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for WriteRetry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(200),
        }
    }
}

/// Run a write, retrying only on [`RepositoryError::WriteConflict`]
pub async fn with_write_retry<T, F, Fut>(policy: &WriteRetry, mut operation: F) -> RepositoryResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RepositoryResult<T>>,
{
    let mut attempt = 1;
    let mut backoff = policy.initial_backoff;
    loop {
        match operation().await {
            Err(RepositoryError::WriteConflict(resource)) if attempt < policy.max_attempts => {
                debug!(
                    "Write conflict on {} (attempt {}/{}), retrying in {:?}",
                    resource, attempt, policy.max_attempts, backoff
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
                attempt += 1;
            },
            result => return result,
        }
    }
}
