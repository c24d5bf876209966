//! Directory layout and search index of a git-backed registry
//!
//! ```text
//! index.json
//! packages/<name>/versions/<version>/manifest.json
//! packages/<name>/versions/<version>/archive.tgz
//! ```

use chrono::{DateTime, Utc};
use rulepack_core::error::RulepackError;
use rulepack_core::types::{
    PackageInfo, PackageManifest, PackageSummary, SearchQuery, Version, VersionInfo,
};
use rulepack_core::utils::sha256_file;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::RegistryResult;

pub const INDEX_FILE: &str = "index.json";
pub const PACKAGES_DIR: &str = "packages";
pub const VERSION_MANIFEST_FILE: &str = "manifest.json";
pub const VERSION_ARCHIVE_FILE: &str = "archive.tgz";

const INDEX_SCHEMA_VERSION: u32 = 1;

/// `packages/<name>/versions/<version>` relative to the repository root
pub fn version_dir(root: &Path, name: &str, version: &Version) -> PathBuf {
    root.join(PACKAGES_DIR)
        .join(name)
        .join("versions")
        .join(version.to_string())
}

/// Ensure the checkout looks like a registry
pub fn validate_structure(root: &Path, registry: &str) -> RegistryResult<()> {
    if root.join(PACKAGES_DIR).is_dir() || root.join(INDEX_FILE).is_file() {
        Ok(())
    } else {
        Err(RulepackError::InvalidRegistryStructure {
            registry: registry.to_string(),
            reason: format!("neither {}/ nor {} exists", PACKAGES_DIR, INDEX_FILE),
        })
    }
}

/// Lay down an empty registry in a repository without commits
pub fn bootstrap(root: &Path) -> RegistryResult<()> {
    let packages = root.join(PACKAGES_DIR);
    std::fs::create_dir_all(&packages)
        .map_err(|e| RulepackError::io(format!("Failed to create {}", packages.display()), e))?;
    let keep = packages.join(".gitkeep");
    std::fs::write(&keep, b"")
        .map_err(|e| RulepackError::io(format!("Failed to write {}", keep.display()), e))?;
    RegistryIndex::default().save(root)
}

/// One version entry of `index.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedVersion {
    pub sha256: String,
    pub size_bytes: u64,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub files: Vec<String>,
}

/// One package entry of `index.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedPackage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub versions: BTreeMap<String, IndexedVersion>,
}

impl IndexedPackage {
    /// Published versions, ascending, skipping keys that do not parse
    pub fn sorted_versions(&self) -> Vec<Version> {
        let mut versions: Vec<Version> = self
            .versions
            .keys()
            .filter_map(|v| v.parse().ok())
            .collect();
        versions.sort();
        versions
    }

    fn find(&self, version: &Version) -> Option<(&String, &IndexedVersion)> {
        self.versions
            .iter()
            .find(|(key, _)| key.parse::<Version>().ok().as_ref() == Some(version))
    }
}

/// The registry-wide search index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryIndex {
    pub version: u32,
    #[serde(default)]
    pub packages: BTreeMap<String, IndexedPackage>,
}

impl Default for RegistryIndex {
    fn default() -> Self {
        Self {
            version: INDEX_SCHEMA_VERSION,
            packages: BTreeMap::new(),
        }
    }
}

impl RegistryIndex {
    /// Read `index.json`, rebuilding it from `packages/` when absent
    pub fn load(root: &Path) -> RegistryResult<Self> {
        let path = root.join(INDEX_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::rebuild(root),
            Err(e) => Err(RulepackError::io(format!("Failed to read {}", path.display()), e)),
        }
    }

    /// Scan `packages/*/versions/*` for manifests and archives
    pub fn rebuild(root: &Path) -> RegistryResult<Self> {
        let mut index = Self::default();
        let packages = root.join(PACKAGES_DIR);
        let Ok(entries) = std::fs::read_dir(&packages) else {
            return Ok(index);
        };

        for entry in entries.flatten() {
            let versions_dir = entry.path().join("versions");
            let Ok(versions) = std::fs::read_dir(&versions_dir) else {
                continue;
            };
            for version_entry in versions.flatten() {
                let dir = version_entry.path();
                match read_version_dir(&dir) {
                    Ok((manifest, indexed)) => index.insert(&manifest, indexed),
                    Err(e) => warn!("Skipping {}: {}", dir.display(), e),
                }
            }
        }
        debug!("Rebuilt index with {} packages", index.packages.len());
        Ok(index)
    }

    pub fn save(&self, root: &Path) -> RegistryResult<()> {
        let path = root.join(INDEX_FILE);
        let mut content = serde_json::to_vec_pretty(self)?;
        content.push(b'\n');
        std::fs::write(&path, content)
            .map_err(|e| RulepackError::io(format!("Failed to write {}", path.display()), e))
    }

    pub fn contains(&self, name: &str, version: &Version) -> bool {
        self.packages
            .get(name)
            .and_then(|p| p.find(version))
            .is_some()
    }

    /// Append a new version, refreshing the package's descriptive fields
    pub fn add_version(
        &mut self,
        manifest: &PackageManifest,
        sha256: &str,
        size_bytes: u64,
        registry: &str,
    ) -> RegistryResult<()> {
        if self.contains(&manifest.name, &manifest.version) {
            return Err(RulepackError::Conflict {
                package: manifest.name.clone(),
                version: manifest.version.to_string(),
                registry: registry.to_string(),
            });
        }
        self.insert(
            manifest,
            IndexedVersion {
                sha256: sha256.to_string(),
                size_bytes,
                published_at: Utc::now(),
                files: manifest.files.clone(),
            },
        );
        Ok(())
    }

    fn insert(&mut self, manifest: &PackageManifest, indexed: IndexedVersion) {
        let package = self.packages.entry(manifest.name.clone()).or_default();
        let is_latest = package
            .sorted_versions()
            .last()
            .map_or(true, |latest| manifest.version > *latest);
        if is_latest {
            package.description = manifest.description.clone();
            package.tags = manifest.tags.clone();
            package.targets = manifest.targets.clone();
        }
        package
            .versions
            .insert(manifest.version.to_string(), indexed);
    }

    pub fn search(&self, query: &SearchQuery) -> Vec<PackageSummary> {
        self.packages
            .keys()
            .filter_map(|name| self.package_info(name).ok()?.summary())
            .filter(|summary| query.matches(summary))
            .take(query.limit())
            .collect()
    }

    pub fn package_info(&self, name: &str) -> RegistryResult<PackageInfo> {
        let package = self
            .packages
            .get(name)
            .ok_or_else(|| RulepackError::not_found(format!("package '{}'", name)))?;
        Ok(PackageInfo {
            name: name.to_string(),
            description: package.description.clone(),
            versions: package.sorted_versions(),
            tags: package.tags.clone(),
            targets: package.targets.clone(),
        })
    }

    pub fn version_info(&self, name: &str, version: &Version) -> RegistryResult<VersionInfo> {
        let package = self
            .packages
            .get(name)
            .ok_or_else(|| RulepackError::not_found(format!("package '{}'", name)))?;
        let (_, indexed) = package
            .find(version)
            .ok_or_else(|| RulepackError::not_found(format!("{}@{}", name, version)))?;
        Ok(VersionInfo {
            name: name.to_string(),
            version: version.clone(),
            sha256: indexed.sha256.clone(),
            size_bytes: indexed.size_bytes,
            files: indexed.files.clone(),
            tags: package.tags.clone(),
            targets: package.targets.clone(),
            published_at: Some(indexed.published_at),
        })
    }

    /// Locate the version whose archive has the given digest
    pub fn find_blob(&self, sha256: &str) -> Option<(String, Version)> {
        self.packages.iter().find_map(|(name, package)| {
            package.versions.iter().find_map(|(version, indexed)| {
                if indexed.sha256.eq_ignore_ascii_case(sha256) {
                    Some((name.clone(), version.parse().ok()?))
                } else {
                    None
                }
            })
        })
    }
}

fn read_version_dir(dir: &Path) -> RegistryResult<(PackageManifest, IndexedVersion)> {
    let manifest_path = dir.join(VERSION_MANIFEST_FILE);
    let content = std::fs::read_to_string(&manifest_path).map_err(|e| {
        RulepackError::io(format!("Failed to read {}", manifest_path.display()), e)
    })?;
    let manifest: PackageManifest = serde_json::from_str(&content)?;

    let archive = dir.join(VERSION_ARCHIVE_FILE);
    let size_bytes = std::fs::metadata(&archive)
        .map_err(|e| RulepackError::io(format!("Failed to stat {}", archive.display()), e))?
        .len();
    let published_at = std::fs::metadata(&manifest_path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    let indexed = IndexedVersion {
        sha256: sha256_file(&archive)?,
        size_bytes,
        published_at,
        files: manifest.files.clone(),
    };
    Ok((manifest, indexed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulepack_core::utils::sha256_hex;
    use tempfile::tempdir;

    fn manifest(name: &str, version: Version, tags: &[&str]) -> PackageManifest {
        let mut manifest = PackageManifest::new(name.to_string(), version);
        manifest.description = Some(format!("{} rules", name));
        manifest.tags = tags.iter().map(|t| t.to_string()).collect();
        manifest.files = vec!["rules.md".to_string()];
        manifest
    }

    #[test]
    fn test_structure_validation() {
        let dir = tempdir().unwrap();
        let err = validate_structure(dir.path(), "team").unwrap_err();
        assert!(matches!(err, RulepackError::InvalidRegistryStructure { .. }));

        bootstrap(dir.path()).unwrap();
        validate_structure(dir.path(), "team").unwrap();
        assert_eq!(RegistryIndex::load(dir.path()).unwrap(), RegistryIndex::default());
    }

    #[test]
    fn test_add_version_rejects_duplicates() {
        let mut index = RegistryIndex::default();
        let m = manifest("security-rules", Version::new(1, 0, 0), &["security"]);
        index.add_version(&m, &"a".repeat(64), 10, "team").unwrap();

        let err = index.add_version(&m, &"b".repeat(64), 10, "team").unwrap_err();
        assert!(matches!(err, RulepackError::Conflict { .. }));
    }

    #[test]
    fn test_descriptive_fields_follow_latest_version() {
        let mut index = RegistryIndex::default();
        let newer = manifest("security-rules", Version::new(2, 0, 0), &["security"]);
        let older = manifest("security-rules", Version::new(1, 5, 0), &["legacy"]);
        index.add_version(&newer, &"a".repeat(64), 10, "team").unwrap();
        index.add_version(&older, &"b".repeat(64), 10, "team").unwrap();

        let info = index.package_info("security-rules").unwrap();
        assert_eq!(info.tags, vec!["security"]);
        assert_eq!(info.versions, vec![Version::new(1, 5, 0), Version::new(2, 0, 0)]);
    }

    #[test]
    fn test_search_and_lookup() {
        let mut index = RegistryIndex::default();
        index
            .add_version(
                &manifest("security-rules", Version::new(1, 2, 0), &["security"]),
                &"a".repeat(64),
                10,
                "team",
            )
            .unwrap();
        index
            .add_version(
                &manifest("style-guide", Version::new(0, 1, 0), &["style"]),
                &"b".repeat(64),
                20,
                "team",
            )
            .unwrap();

        let mut query = SearchQuery::new("");
        query.tag = Some("style".to_string());
        let found = index.search(&query);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "style-guide");

        let info = index
            .version_info("security-rules", &Version::new(1, 2, 0))
            .unwrap();
        assert_eq!(info.size_bytes, 10);
        assert!(matches!(
            index.version_info("security-rules", &Version::new(9, 9, 9)),
            Err(RulepackError::NotFound { .. })
        ));
        assert_eq!(
            index.find_blob(&"B".repeat(64)),
            Some(("style-guide".to_string(), Version::new(0, 1, 0)))
        );
    }

    #[test]
    fn test_rebuild_from_packages_dir() {
        let dir = tempdir().unwrap();
        let m = manifest("security-rules", Version::new(1, 0, 0), &["security"]);
        let version_path = version_dir(dir.path(), &m.name, &m.version);
        std::fs::create_dir_all(&version_path).unwrap();
        std::fs::write(
            version_path.join(VERSION_MANIFEST_FILE),
            serde_json::to_vec(&m).unwrap(),
        )
        .unwrap();
        std::fs::write(version_path.join(VERSION_ARCHIVE_FILE), b"archive").unwrap();

        let index = RegistryIndex::load(dir.path()).unwrap();
        let info = index
            .version_info("security-rules", &Version::new(1, 0, 0))
            .unwrap();
        assert_eq!(info.sha256, sha256_hex(b"archive"));
        assert_eq!(info.size_bytes, 7);
    }
}
