//! On-disk cache of registry clones
//!
//! Clones are keyed by a normalized repository URL so `.../repo`,
//! `.../repo/` and `.../repo.git` share one checkout. Access to a clone is
//! serialized by a per-repository async lock; different repositories never
//! contend.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rulepack_config::write_atomic;
use rulepack_core::error::RulepackError;
use rulepack_core::utils::sha256_hex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::RegistryResult;

/// Name of the bookkeeping file at the cache root
pub const CACHE_INDEX_FILE: &str = "cache.json";

/// Bookkeeping for one cloned repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitCacheEntry {
    pub repo_url: String,
    pub local_path: PathBuf,
    pub last_fetched_at: DateTime<Utc>,
}

/// Cache of clones under one root directory
#[derive(Debug)]
pub struct GitCache {
    root: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
    // Guards read-modify-write of cache.json across repositories
    index_lock: Mutex<()>,
}

static SHARED: OnceLock<DashMap<PathBuf, Arc<GitCache>>> = OnceLock::new();

impl GitCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: DashMap::new(),
            index_lock: Mutex::new(()),
        }
    }

    /// The cache instance for `root`, shared by every client in the process
    ///
    /// Two clients configured with the same cache directory must see the
    /// same locks, otherwise they could both mutate one clone.
    pub fn shared(root: &Path) -> Arc<GitCache> {
        let caches = SHARED.get_or_init(DashMap::new);
        caches
            .entry(root.to_path_buf())
            .or_insert_with(|| Arc::new(GitCache::new(root)))
            .clone()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the clone of `repo_url` lives
    pub fn local_path(&self, repo_url: &str) -> PathBuf {
        let normalized = normalize_url(repo_url);
        let readable: String = strip_scheme(&normalized)
            .trim_end_matches(".git")
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let digest = sha256_hex(normalized.as_bytes());
        self.root
            .join(format!("{}-{}", readable.trim_matches('_'), &digest[..8]))
    }

    /// Take the exclusive lock for a repository's clone
    pub async fn lock(&self, repo_url: &str) -> OwnedMutexGuard<()> {
        let key = normalize_url(repo_url);
        let lock = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// All recorded entries, keyed by normalized URL
    pub async fn entries(&self) -> RegistryResult<BTreeMap<String, GitCacheEntry>> {
        let path = self.root.join(CACHE_INDEX_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => Ok(entries),
                Err(e) => {
                    warn!("Ignoring unreadable {}: {}", path.display(), e);
                    Ok(BTreeMap::new())
                },
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(RulepackError::io(
                format!("Failed to read {}", path.display()),
                e,
            )),
        }
    }

    pub async fn entry(&self, repo_url: &str) -> RegistryResult<Option<GitCacheEntry>> {
        Ok(self.entries().await?.remove(&normalize_url(repo_url)))
    }

    /// Record a successful clone or fetch
    pub async fn record_fetch(&self, repo_url: &str) -> RegistryResult<GitCacheEntry> {
        let _guard = self.index_lock.lock().await;
        let mut entries = self.entries().await?;
        let entry = GitCacheEntry {
            repo_url: repo_url.to_string(),
            local_path: self.local_path(repo_url),
            last_fetched_at: Utc::now(),
        };
        entries.insert(normalize_url(repo_url), entry.clone());

        write_atomic(
            &self.root.join(CACHE_INDEX_FILE),
            &serde_json::to_vec_pretty(&entries)?,
        )?;

        debug!("Recorded fetch of {} at {}", repo_url, entry.last_fetched_at);
        Ok(entry)
    }
}

/// Canonical form of a repository URL used as the cache key
///
/// Surrounding whitespace and trailing slashes are dropped, the `.git`
/// suffix is added when missing and the host is lowercased.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let mut normalized = match trimmed.split_once("://") {
        Some((scheme, rest)) => {
            let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
            if path.is_empty() {
                format!("{}://{}", scheme.to_lowercase(), host.to_lowercase())
            } else {
                format!("{}://{}/{}", scheme.to_lowercase(), host.to_lowercase(), path)
            }
        },
        None => trimmed.to_string(),
    };
    if !normalized.ends_with(".git") {
        normalized.push_str(".git");
    }
    normalized
}

fn strip_scheme(url: &str) -> &str {
    url.split_once("://").map(|(_, rest)| rest).unwrap_or(url)
}
