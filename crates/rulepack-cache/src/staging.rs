//! Staging area for packed, not-yet-published archives
//!
//! Layout under the staging root, per archive:
//! - `<name>-<version>.tgz` the archive itself
//! - `<name>-<version>.manifest.json` the manifest handed to `Publish`
//! - `<name>-<version>.tgz.json` the `StagedArchive` record, written last
//!
//! At most one archive per package is pending at any time.

use rulepack_core::error::RulepackError;
use rulepack_core::types::{PackageManifest, StagedArchive};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::tarball::CanonicalArchive;
use crate::CacheResult;

const RECORD_SUFFIX: &str = ".tgz.json";

/// Directory of pending archives
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Manifest file written next to a staged archive
    pub fn manifest_path(archive: &StagedArchive) -> PathBuf {
        archive.archive_path.with_extension("manifest.json")
    }

    fn record_path(archive_path: &Path) -> PathBuf {
        archive_path.with_extension("tgz.json")
    }

    /// Store an archive, replacing any pending archive of the same package
    pub fn stage(
        &self,
        manifest: &PackageManifest,
        archive: &CanonicalArchive,
        file_paths: BTreeSet<String>,
    ) -> CacheResult<StagedArchive> {
        fs::create_dir_all(&self.root)
            .map_err(|e| RulepackError::io(format!("Failed to create {}", self.root.display()), e))?;

        for previous in self.list()? {
            if previous.package_name == manifest.name && previous.version != manifest.version {
                info!("Replacing staged {}", previous.label());
                self.remove(&previous)?;
            }
        }

        let archive_path = self
            .root
            .join(StagedArchive::file_name(&manifest.name, &manifest.version));
        let staged = StagedArchive {
            package_name: manifest.name.clone(),
            version: manifest.version.clone(),
            sha256: archive.sha256.clone(),
            size_bytes: archive.size_bytes(),
            file_paths,
            archive_path: archive_path.clone(),
        };

        self.write_file(&archive_path, &archive.bytes)?;
        self.write_file(
            &Self::manifest_path(&staged),
            serde_json::to_string_pretty(manifest)?.as_bytes(),
        )?;
        self.write_file(
            &Self::record_path(&archive_path),
            serde_json::to_string_pretty(&staged)?.as_bytes(),
        )?;

        debug!("Staged {} at {}", staged.label(), archive_path.display());
        Ok(staged)
    }

    /// Pending archives, ordered by file name
    pub fn list(&self) -> CacheResult<Vec<StagedArchive>> {
        let read_dir = match fs::read_dir(&self.root) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(RulepackError::io(
                    format!("Failed to read {}", self.root.display()),
                    e,
                ))
            },
        };

        let mut records: Vec<PathBuf> = read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.ends_with(RECORD_SUFFIX))
            })
            .collect();
        records.sort();

        let mut staged = Vec::with_capacity(records.len());
        for record in records {
            let content = fs::read_to_string(&record)
                .map_err(|e| RulepackError::io(format!("Failed to read {}", record.display()), e))?;
            let archive: StagedArchive = match serde_json::from_str(&content) {
                Ok(archive) => archive,
                Err(e) => {
                    warn!("Ignoring unreadable staging record {}: {}", record.display(), e);
                    continue;
                },
            };
            if !archive.archive_path.exists() {
                warn!("Staged archive {} is missing, ignoring", archive.archive_path.display());
                continue;
            }
            staged.push(archive);
        }
        Ok(staged)
    }

    /// Pending archive of a package
    pub fn find(&self, package_name: &str) -> CacheResult<Option<StagedArchive>> {
        Ok(self
            .list()?
            .into_iter()
            .find(|archive| archive.package_name == package_name))
    }

    /// Delete an archive and its companions
    pub fn remove(&self, archive: &StagedArchive) -> CacheResult<()> {
        for path in [
            Self::record_path(&archive.archive_path),
            Self::manifest_path(archive),
            archive.archive_path.clone(),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => {},
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => {
                    return Err(RulepackError::io(
                        format!("Failed to remove {}", path.display()),
                        e,
                    ))
                },
            }
        }
        Ok(())
    }

    fn write_file(&self, path: &Path, content: &[u8]) -> CacheResult<()> {
        let mut temp = tempfile::NamedTempFile::new_in(&self.root)
            .map_err(|e| RulepackError::io("Failed to create staging temp file".to_string(), e))?;
        temp.write_all(content)
            .map_err(|e| RulepackError::io("Failed to write staging temp file".to_string(), e))?;
        temp.persist(path)
            .map_err(|e| RulepackError::io(format!("Failed to write {}", path.display()), e.error))?;
        Ok(())
    }
}
