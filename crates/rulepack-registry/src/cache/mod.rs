//! Package metadata caching with TTL support

use dashmap::DashMap;
use rulepack_core::types::PackageInfo;
use std::time::{Duration, SystemTime};

/// Default time-to-live of a cached lookup
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Cache entry with TTL
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub info: PackageInfo,
    pub stored_at: SystemTime,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn with_ttl(info: PackageInfo, ttl: Duration) -> Self {
        Self {
            info,
            stored_at: SystemTime::now(),
            ttl,
        }
    }

    /// Check if cache entry is still fresh
    pub fn is_fresh(&self) -> bool {
        match self.stored_at.elapsed() {
            Ok(elapsed) => elapsed < self.ttl,
            // Clock went backwards, consider stale
            Err(_) => false,
        }
    }
}

/// In-memory `get_package` cache keyed by package name
#[derive(Debug)]
pub struct MetadataCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Get cached info if fresh
    pub fn get(&self, name: &str) -> Option<PackageInfo> {
        let info = {
            let entry = self.entries.get(name)?;
            entry.is_fresh().then(|| entry.info.clone())
        };
        if info.is_none() {
            // Remove stale entry
            self.entries.remove(name);
        }
        info
    }

    pub fn insert(&self, info: PackageInfo) {
        let entry = CacheEntry::with_ttl(info, self.ttl);
        self.entries.insert(entry.info.name.clone(), entry);
    }

    /// Forget a package, e.g. after publishing a new version of it
    pub fn invalidate(&self, name: &str) {
        self.entries.remove(name);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove stale entries
    pub fn cleanup(&self) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            if entry.is_fresh() {
                true
            } else {
                removed += 1;
                false
            }
        });
        removed
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}
