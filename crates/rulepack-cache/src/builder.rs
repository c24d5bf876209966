//! Packs a named, versioned file set into a staged archive
//!
//! Version selection and file-conflict detection run before anything is
//! written, so a rejected pack leaves the staging area untouched.

use rulepack_core::error::RulepackError;
use rulepack_core::types::{
    validate_increase, PackageManifest, StagedArchive, Version, MANIFEST_FILE_NAME,
};
use rulepack_core::utils::{archive_entry_name, validate_archive_path};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::security::SecurityPolicy;
use crate::staging::StagingArea;
use crate::tarball::{create_archive, ArchiveContents};
use crate::CacheResult;

/// Everything needed to pack one archive
#[derive(Debug, Clone, Default)]
pub struct PackRequest {
    pub name: String,
    pub explicit_version: Option<Version>,
    /// Directory entry names are computed against
    pub base_dir: PathBuf,
    /// Files or directories, relative to `base_dir` or absolute beneath it
    pub files: Vec<PathBuf>,
    /// Entry names that intentionally overwrite the previous version's
    pub replace: BTreeSet<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub targets: Vec<String>,
    pub license: Option<String>,
}

/// The locally known copy of the previously published version
#[derive(Debug, Clone)]
pub struct PreviousVersion {
    pub version: Version,
    pub files: BTreeSet<String>,
    /// Directory holding the previous files (the installed copy)
    pub source_dir: PathBuf,
}

impl PreviousVersion {
    /// Read an installed package directory through its manifest
    pub fn from_installed(dir: &Path) -> CacheResult<Self> {
        let manifest_path = dir.join(MANIFEST_FILE_NAME);
        let content = fs::read_to_string(&manifest_path).map_err(|e| {
            RulepackError::io(format!("Failed to read {}", manifest_path.display()), e)
        })?;
        let manifest: PackageManifest = serde_json::from_str(&content)?;
        Ok(Self {
            version: manifest.version,
            files: manifest.files.into_iter().collect(),
            source_dir: dir.to_path_buf(),
        })
    }
}

/// Packs files into staged archives
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    policy: SecurityPolicy,
    staging: StagingArea,
}

impl ArchiveBuilder {
    pub fn new(staging: StagingArea) -> Self {
        Self {
            policy: SecurityPolicy::default(),
            staging,
        }
    }

    pub fn with_policy(mut self, policy: SecurityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Choose the version for a pack
    ///
    /// No previous version: the explicit one, else 1.0.0. Previous version:
    /// the explicit one if it is strictly greater, else the next patch.
    pub fn select_version(
        name: &str,
        explicit: Option<&Version>,
        previous: Option<&Version>,
    ) -> CacheResult<Version> {
        match (previous, explicit) {
            (None, Some(explicit)) => Ok(explicit.clone()),
            (None, None) => Ok(Version::initial()),
            (Some(previous), Some(explicit)) => {
                validate_increase(previous, explicit).map_err(|e| e.for_package(name))?;
                Ok(explicit.clone())
            },
            (Some(previous), None) => previous.increment_patch().map_err(|e| e.for_package(name)),
        }
    }

    /// Validate, pack and stage
    pub fn pack(
        &self,
        request: &PackRequest,
        previous: Option<&PreviousVersion>,
    ) -> CacheResult<StagedArchive> {
        if !PackageManifest::is_valid_name(&request.name) {
            return Err(RulepackError::InvalidFormat {
                what: "package name".to_string(),
                input: request.name.clone(),
                reason: "use lowercase letters, digits, '-' and '_'".to_string(),
            });
        }

        let version = Self::select_version(
            &request.name,
            request.explicit_version.as_ref(),
            previous.map(|p| &p.version),
        )?;

        let new_files = self.collect_files(request)?;
        if new_files.is_empty() {
            return Err(RulepackError::InvalidFormat {
                what: "file set".to_string(),
                input: request.name.clone(),
                reason: "no files to pack".to_string(),
            });
        }

        let mut contents = ArchiveContents::new();
        if let Some(previous) = previous {
            check_conflicts(request, &version, previous, &new_files)?;
            for name in &previous.files {
                if name == MANIFEST_FILE_NAME || new_files.contains_key(name) {
                    continue;
                }
                validate_archive_path(Path::new(name))?;
                let path = previous.source_dir.join(name);
                let data = fs::read(&path)
                    .map_err(|e| RulepackError::io(format!("Failed to read {}", path.display()), e))?;
                self.policy.check_entry(name, &data)?;
                contents.insert(name.clone(), data);
            }
        }
        contents.extend(new_files);

        let file_paths: BTreeSet<String> = contents.keys().cloned().collect();
        self.policy
            .check_total(contents.values().map(|d| d.len() as u64).sum())?;

        let manifest = PackageManifest {
            name: request.name.clone(),
            version: version.clone(),
            description: request.description.clone(),
            targets: request.targets.clone(),
            tags: request.tags.clone(),
            files: file_paths.iter().cloned().collect(),
            license: request.license.clone(),
            dependencies: Default::default(),
        };
        contents.insert(
            MANIFEST_FILE_NAME.to_string(),
            serde_json::to_vec_pretty(&manifest)?,
        );

        let archive = create_archive(&contents)?;
        let staged = self.staging.stage(&manifest, &archive, file_paths)?;
        info!(
            "Packed {} ({} files, {} bytes, sha256 {})",
            staged.label(),
            staged.file_paths.len(),
            staged.size_bytes,
            staged.sha256
        );
        Ok(staged)
    }

    /// Read and filter the request's files, expanding directories
    fn collect_files(&self, request: &PackRequest) -> CacheResult<ArchiveContents> {
        let mut contents = ArchiveContents::new();

        for file in &request.files {
            let path = if file.is_absolute() {
                file.clone()
            } else {
                request.base_dir.join(file)
            };
            let metadata = fs::symlink_metadata(&path)
                .map_err(|e| RulepackError::io(format!("Failed to stat {}", path.display()), e))?;

            if metadata.is_dir() {
                for entry in WalkDir::new(&path).sort_by_file_name() {
                    let entry = entry.map_err(|e| RulepackError::Io {
                        message: format!("Failed to walk {}", path.display()),
                        source: e.into(),
                    })?;
                    if entry.file_type().is_dir() {
                        continue;
                    }
                    self.add_file(request, entry.path(), &mut contents)?;
                }
            } else {
                self.add_file(request, &path, &mut contents)?;
            }
        }

        Ok(contents)
    }

    fn add_file(
        &self,
        request: &PackRequest,
        path: &Path,
        contents: &mut ArchiveContents,
    ) -> CacheResult<()> {
        let relative = path.strip_prefix(&request.base_dir).map_err(|_| {
            RulepackError::SecurityViolation {
                path: path.display().to_string(),
                reason: format!("outside of {}", request.base_dir.display()),
            }
        })?;
        let name = archive_entry_name(relative)?;
        if name == MANIFEST_FILE_NAME {
            return Err(RulepackError::InvalidFormat {
                what: "file name".to_string(),
                input: name,
                reason: "reserved for the package manifest".to_string(),
            });
        }

        let metadata = fs::symlink_metadata(path)
            .map_err(|e| RulepackError::io(format!("Failed to stat {}", path.display()), e))?;
        self.policy.check_file_type(&name, &metadata)?;

        let data = fs::read(path)
            .map_err(|e| RulepackError::io(format!("Failed to read {}", path.display()), e))?;
        self.policy.check_entry(&name, &data)?;

        debug!("Adding {} ({} bytes)", name, data.len());
        contents.insert(name, data);
        Ok(())
    }
}

/// New files that shadow previous ones need `--replace` or an explicit bump
fn check_conflicts(
    request: &PackRequest,
    version: &Version,
    previous: &PreviousVersion,
    new_files: &ArchiveContents,
) -> CacheResult<()> {
    if request.explicit_version.is_some() {
        return Ok(());
    }

    let conflicts: Vec<String> = new_files
        .keys()
        .filter(|name| previous.files.contains(*name) && !request.replace.contains(*name))
        .cloned()
        .collect();

    if conflicts.is_empty() {
        return Ok(());
    }
    Err(RulepackError::FileConflict {
        package: request.name.clone(),
        version: version.to_string(),
        files: conflicts,
    })
}
