//! rulepack.lock: the machine-owned record of installed packages
//!
//! The file carries a flat `dependencies` map (name -> version) alongside
//! the detailed `packages` record; both are kept in step on every write.

use rulepack_core::error::RulepackError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::manifest::write_atomic;
use crate::ConfigResult;

/// File name of the lockfile in a project root
pub const LOCKFILE_NAME: &str = "rulepack.lock";

/// Current lockfile schema version
pub const LOCKFILE_SCHEMA_VERSION: u32 = 1;

/// One installed package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedPackage {
    pub version: String,
    pub sha256: String,
    pub install_path: PathBuf,
    #[serde(default)]
    pub registry: String,
}

/// Complete lockfile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lockfile {
    #[serde(rename = "version")]
    pub schema_version: u32,
    pub project_root: PathBuf,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub packages: BTreeMap<String, LockedPackage>,
}

impl Lockfile {
    /// Empty lockfile for a project
    pub fn new(project_root: &Path) -> Self {
        Self {
            schema_version: LOCKFILE_SCHEMA_VERSION,
            project_root: project_root.to_path_buf(),
            dependencies: BTreeMap::new(),
            packages: BTreeMap::new(),
        }
    }

    /// Load the lockfile of a project, or start an empty one
    pub fn load_or_default(project_root: &Path) -> ConfigResult<Self> {
        let path = project_root.join(LOCKFILE_NAME);
        if !path.exists() {
            debug!("No lockfile at {}, starting empty", path.display());
            return Ok(Self::new(project_root));
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| RulepackError::io(format!("Failed to read {}", path.display()), e))?;
        let mut lockfile: Lockfile =
            serde_json::from_str(&content).map_err(|e| RulepackError::InvalidFormat {
                what: "lockfile".to_string(),
                input: path.display().to_string(),
                reason: e.to_string(),
            })?;

        if lockfile.schema_version > LOCKFILE_SCHEMA_VERSION {
            return Err(RulepackError::ConfigValidation {
                field: "version".to_string(),
                reason: format!(
                    "lockfile schema {} is newer than supported {}",
                    lockfile.schema_version, LOCKFILE_SCHEMA_VERSION
                ),
            });
        }

        // Older writers only kept the flat map
        for (name, version) in &lockfile.dependencies {
            if !lockfile.packages.contains_key(name) {
                lockfile.packages.insert(
                    name.clone(),
                    LockedPackage {
                        version: version.clone(),
                        sha256: String::new(),
                        install_path: PathBuf::new(),
                        registry: String::new(),
                    },
                );
            }
        }

        Ok(lockfile)
    }

    /// Write the lockfile atomically to `<project_root>/rulepack.lock`
    pub fn save_atomic(&self) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        write_atomic(&self.project_root.join(LOCKFILE_NAME), content.as_bytes())
    }

    /// Installed entry for a package
    pub fn get(&self, name: &str) -> Option<&LockedPackage> {
        self.packages.get(name)
    }

    /// Replace the entry for a package
    pub fn set(&mut self, name: &str, package: LockedPackage) {
        self.dependencies
            .insert(name.to_string(), package.version.clone());
        self.packages.insert(name.to_string(), package);
    }

    /// Drop the entry for a package
    pub fn remove(&mut self, name: &str) -> Option<LockedPackage> {
        self.dependencies.remove(name);
        self.packages.remove(name)
    }
}
