//! In-memory package repository
//!
//! Rows carry a revision number. Writers read a snapshot, build the new row
//! and commit only if the stored revision is still the one they read, so two
//! publishes racing on the same package never overwrite each other.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rulepack_core::types::{
    PackageInfo, PackageManifest, PackageSummary, SearchQuery, Version, VersionInfo,
};
use rulepack_core::utils::sha256_hex;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, warn};

use super::{
    with_write_retry, NewVersion, PackageRepository, RepositoryError, RepositoryResult,
    SearchPage, WriteRetry,
};
use crate::config::ServerConfig;

#[derive(Debug, Clone, Default)]
struct PackageRow {
    revision: u64,
    description: Option<String>,
    tags: Vec<String>,
    targets: Vec<String>,
    versions: BTreeMap<Version, VersionInfo>,
}

impl PackageRow {
    fn info(&self, name: &str) -> PackageInfo {
        PackageInfo {
            name: name.to_string(),
            description: self.description.clone(),
            versions: self.versions.keys().cloned().collect(),
            tags: self.tags.clone(),
            targets: self.targets.clone(),
        }
    }

    fn describe(&mut self, manifest: &PackageManifest) {
        self.description = manifest.description.clone();
        self.tags = manifest.tags.clone();
        self.targets = manifest.targets.clone();
    }
}

/// Process-local repository behind a bounded pool
pub struct InMemoryRepository {
    packages: DashMap<String, PackageRow>,
    token_digests: HashSet<String>,
    pool: Semaphore,
    acquire_timeout: Duration,
    retry: WriteRetry,
}

impl InMemoryRepository {
    pub fn new(pool_size: usize, acquire_timeout: Duration) -> Self {
        Self {
            packages: DashMap::new(),
            token_digests: HashSet::new(),
            pool: Semaphore::new(pool_size),
            acquire_timeout,
            retry: WriteRetry::default(),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.pool_size, config.acquire_timeout).with_tokens(&config.tokens)
    }

    /// Tokens are kept only as sha256 digests
    pub fn with_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.token_digests = tokens
            .into_iter()
            .map(|t| sha256_hex(t.as_ref().as_bytes()))
            .collect();
        self
    }

    pub fn with_retry(mut self, retry: WriteRetry) -> Self {
        self.retry = retry;
        self
    }

    pub(crate) async fn acquire(&self) -> RepositoryResult<SemaphorePermit<'_>> {
        match tokio::time::timeout(self.acquire_timeout, self.pool.acquire()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) | Err(_) => {
                warn!(
                    "No repository slot freed up within {:?}",
                    self.acquire_timeout
                );
                Err(RepositoryError::PoolTimeout(self.acquire_timeout))
            },
        }
    }

    fn snapshot(&self, name: &str) -> Option<PackageRow> {
        self.packages.get(name).map(|row| row.value().clone())
    }

    /// Store `row` if the stored revision still equals `expected`
    fn commit(&self, name: &str, expected: Option<u64>, mut row: PackageRow) -> RepositoryResult<()> {
        match self.packages.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get().revision;
                if expected != Some(current) {
                    return Err(RepositoryError::WriteConflict(format!("package '{}'", name)));
                }
                row.revision = current + 1;
                entry.insert(row);
            },
            Entry::Vacant(entry) => {
                if expected.is_some() {
                    return Err(RepositoryError::WriteConflict(format!("package '{}'", name)));
                }
                row.revision = 0;
                entry.insert(row);
            },
        }
        Ok(())
    }

    fn try_create_package(&self, manifest: &PackageManifest) -> RepositoryResult<PackageInfo> {
        if let Some(existing) = self.snapshot(&manifest.name) {
            return Ok(existing.info(&manifest.name));
        }
        let mut row = PackageRow::default();
        row.describe(manifest);
        let info = row.info(&manifest.name);
        self.commit(&manifest.name, None, row)?;
        debug!("Registered package {}", manifest.name);
        Ok(info)
    }

    fn try_create_version(&self, new: &NewVersion) -> RepositoryResult<VersionInfo> {
        let manifest = &new.manifest;
        let current = self
            .snapshot(&manifest.name)
            .ok_or_else(|| RepositoryError::NotFound(format!("package '{}'", manifest.name)))?;
        if current.versions.contains_key(&manifest.version) {
            return Err(RepositoryError::AlreadyExists {
                name: manifest.name.clone(),
                version: manifest.version.to_string(),
            });
        }

        let info = VersionInfo {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            sha256: new.sha256.clone(),
            size_bytes: new.size_bytes,
            files: new.files.clone(),
            tags: manifest.tags.clone(),
            targets: manifest.targets.clone(),
            published_at: Some(Utc::now()),
        };

        let mut row = current.clone();
        let is_latest = row
            .versions
            .keys()
            .next_back()
            .map_or(true, |latest| &manifest.version > latest);
        if is_latest {
            row.describe(manifest);
        }
        row.versions.insert(manifest.version.clone(), info.clone());
        self.commit(&manifest.name, Some(current.revision), row)?;
        Ok(info)
    }
}

#[async_trait]
impl PackageRepository for InMemoryRepository {
    async fn get_package(&self, name: &str) -> RepositoryResult<PackageInfo> {
        let _permit = self.acquire().await?;
        self.snapshot(name)
            .map(|row| row.info(name))
            .ok_or_else(|| RepositoryError::NotFound(format!("package '{}'", name)))
    }

    async fn create_package(&self, manifest: &PackageManifest) -> RepositoryResult<PackageInfo> {
        let _permit = self.acquire().await?;
        with_write_retry(&self.retry, || async { self.try_create_package(manifest) }).await
    }

    async fn get_version(&self, name: &str, version: &Version) -> RepositoryResult<VersionInfo> {
        let _permit = self.acquire().await?;
        self.packages
            .get(name)
            .and_then(|row| row.versions.get(version).cloned())
            .ok_or_else(|| RepositoryError::NotFound(format!("{}@{}", name, version)))
    }

    async fn create_version(&self, version: &NewVersion) -> RepositoryResult<VersionInfo> {
        let _permit = self.acquire().await?;
        with_write_retry(&self.retry, || async { self.try_create_version(version) }).await
    }

    async fn search(&self, query: &SearchQuery) -> RepositoryResult<SearchPage> {
        let _permit = self.acquire().await?;
        let mut matches: Vec<PackageSummary> = self
            .packages
            .iter()
            .filter_map(|row| row.value().info(row.key()).summary())
            .filter(|summary| query.matches(summary))
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));

        let total = matches.len();
        matches.truncate(query.limit());
        Ok(SearchPage {
            packages: matches,
            total,
        })
    }

    async fn validate_token(&self, token: &str) -> RepositoryResult<bool> {
        let _permit = self.acquire().await?;
        Ok(self.token_digests.contains(&sha256_hex(token.as_bytes())))
    }

    async fn ping(&self) -> RepositoryResult<()> {
        self.acquire().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn repo() -> InMemoryRepository {
        InMemoryRepository::new(4, Duration::from_millis(200))
    }

    fn manifest(name: &str, version: &str, description: &str) -> PackageManifest {
        let mut manifest = PackageManifest::new(name.to_string(), version.parse().unwrap());
        manifest.description = Some(description.to_string());
        manifest.tags = vec!["security".to_string()];
        manifest
    }

    fn new_version(manifest: PackageManifest) -> NewVersion {
        NewVersion {
            sha256: sha256_hex(manifest.version.to_string().as_bytes()),
            manifest,
            size_bytes: 42,
            files: vec!["rules.md".to_string()],
        }
    }

    async fn publish(repo: &InMemoryRepository, name: &str, version: &str, description: &str) {
        let manifest = manifest(name, version, description);
        repo.create_package(&manifest).await.unwrap();
        repo.create_version(&new_version(manifest)).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let repo = repo();
        publish(&repo, "security-rules", "1.0.0", "first").await;
        publish(&repo, "security-rules", "1.1.0", "second").await;

        let info = repo.get_package("security-rules").await.unwrap();
        assert_eq!(info.versions, vec![Version::new(1, 0, 0), Version::new(1, 1, 0)]);
        assert_eq!(info.description.as_deref(), Some("second"));

        let version = repo
            .get_version("security-rules", &Version::new(1, 0, 0))
            .await
            .unwrap();
        assert_eq!(version.size_bytes, 42);
        assert!(version.published_at.is_some());
    }

    #[tokio::test]
    async fn test_older_version_keeps_latest_metadata() {
        let repo = repo();
        publish(&repo, "alpha", "2.0.0", "current").await;
        publish(&repo, "alpha", "1.5.0", "backport").await;

        let info = repo.get_package("alpha").await.unwrap();
        assert_eq!(info.description.as_deref(), Some("current"));
        assert_eq!(info.latest(), Some(&Version::new(2, 0, 0)));
    }

    #[tokio::test]
    async fn test_duplicate_version_is_rejected() {
        let repo = repo();
        publish(&repo, "alpha", "1.0.0", "a").await;

        let err = repo
            .create_version(&new_version(manifest("alpha", "1.0.0", "again")))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::AlreadyExists { .. }));

        // Build metadata does not make a version distinct
        let err = repo
            .create_version(&new_version(manifest("alpha", "1.0.0+build.7", "again")))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_version_requires_package() {
        let repo = repo();
        let err = repo
            .create_version(&new_version(manifest("ghost", "1.0.0", "x")))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
        assert!(matches!(
            repo.get_package("ghost").await,
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_search() {
        let repo = repo();
        publish(&repo, "security-rules", "1.0.0", "Hardening").await;
        publish(&repo, "style-guide", "0.3.0", "Formatting").await;
        publish(&repo, "secrets-scan", "1.0.0", "Leak checks").await;

        let page = repo.search(&SearchQuery::new("se")).await.unwrap();
        let names: Vec<&str> = page.packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["secrets-scan", "security-rules"]);

        let mut limited = SearchQuery::new("");
        limited.limit = Some(1);
        let page = repo.search(&limited).await.unwrap();
        assert_eq!(page.packages.len(), 1);
        assert_eq!(page.total, 3);

        let mut tagged = SearchQuery::new("");
        tagged.tag = Some("performance".to_string());
        assert!(repo.search(&tagged).await.unwrap().packages.is_empty());
    }

    #[tokio::test]
    async fn test_token_validation() {
        let repo = repo().with_tokens(["s3cret"]);
        assert!(repo.validate_token("s3cret").await.unwrap());
        assert!(!repo.validate_token("guess").await.unwrap());
    }

    #[tokio::test]
    async fn test_exhausted_pool_fails_fast() {
        let repo = InMemoryRepository::new(1, Duration::from_millis(20));
        let _held = repo.acquire().await.unwrap();

        let err = repo.get_package("alpha").await.unwrap_err();
        assert_eq!(err, RepositoryError::PoolTimeout(Duration::from_millis(20)));
        assert!(repo.ping().await.is_err());
    }

    #[test]
    fn test_stale_commit_conflicts() {
        let repo = repo();
        repo.commit("alpha", None, PackageRow::default()).unwrap();
        let stale = repo.snapshot("alpha").unwrap();

        repo.commit("alpha", Some(stale.revision), stale.clone()).unwrap();
        let err = repo.commit("alpha", Some(stale.revision), stale).unwrap_err();
        assert!(matches!(err, RepositoryError::WriteConflict(_)));

        let err = repo.commit("alpha", None, PackageRow::default()).unwrap_err();
        assert!(matches!(err, RepositoryError::WriteConflict(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishes_all_land() {
        let repo = Arc::new(repo().with_retry(WriteRetry {
            max_attempts: 50,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }));

        let handles: Vec<_> = (0..8)
            .map(|minor| {
                let repo = Arc::clone(&repo);
                tokio::spawn(async move {
                    let manifest = manifest("alpha", &format!("1.{}.0", minor), "x");
                    repo.create_package(&manifest).await?;
                    repo.create_version(&new_version(manifest)).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let info = repo.get_package("alpha").await.unwrap();
        assert_eq!(info.versions.len(), 8);
    }
}
