//! Desired-versus-installed reconciliation
//!
//! `ManifestStore` pairs the project's `rulepack.json` with its
//! `rulepack.lock` and decides, per dependency, what an install run has to
//! do. Every action is computed up front so that a bad entry never hides
//! the verdict for the others.

use rulepack_core::types::{compare, parse, PackageManifest, Version};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::lockfile::{LockedPackage, Lockfile};
use crate::manifest::{load_manifest, save_manifest};
use crate::ConfigResult;

/// What an install run should do for one dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Not present in the lockfile
    Install,
    /// Desired version is newer than the installed one
    Update,
    /// Already at the desired version
    SkipCurrent,
    /// Installed version is newer; downgrades are never performed
    SkipNewer,
    /// One of the two versions could not be parsed
    Invalid(String),
}

impl ReconcileAction {
    /// Whether this action requires fetching the package
    pub fn needs_fetch(&self) -> bool {
        matches!(self, ReconcileAction::Install | ReconcileAction::Update)
    }
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileAction::Install => write!(f, "install"),
            ReconcileAction::Update => write!(f, "update"),
            ReconcileAction::SkipCurrent => write!(f, "skip-current"),
            ReconcileAction::SkipNewer => write!(f, "skip-newer"),
            ReconcileAction::Invalid(reason) => write!(f, "invalid ({})", reason),
        }
    }
}

/// Decide the action for one package
pub fn reconcile(desired: &Version, installed: Option<&Version>) -> ReconcileAction {
    match installed {
        None => ReconcileAction::Install,
        Some(installed) => match compare(desired, installed) {
            1 => ReconcileAction::Update,
            0 => ReconcileAction::SkipCurrent,
            _ => ReconcileAction::SkipNewer,
        },
    }
}

/// One row of an install plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction {
    pub name: String,
    pub desired: String,
    pub installed: Option<String>,
    pub action: ReconcileAction,
}

impl PlannedAction {
    /// Desired version, when it parses
    pub fn desired_version(&self) -> Option<Version> {
        parse(&self.desired).ok()
    }
}

/// Manifest plus lockfile of one project
#[derive(Debug, Clone)]
pub struct ManifestStore {
    root: PathBuf,
    manifest: PackageManifest,
    lockfile: Lockfile,
}

impl ManifestStore {
    /// Load both files from a project root; a missing lockfile is empty
    pub fn open(root: &Path) -> ConfigResult<Self> {
        let manifest = load_manifest(root)?;
        let lockfile = Lockfile::load_or_default(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            manifest,
            lockfile,
        })
    }

    /// Build a store from values already in memory
    pub fn from_parts(root: &Path, manifest: PackageManifest, lockfile: Lockfile) -> Self {
        Self {
            root: root.to_path_buf(),
            manifest,
            lockfile,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &PackageManifest {
        &self.manifest
    }

    pub fn lockfile(&self) -> &Lockfile {
        &self.lockfile
    }

    /// Installed entry for a package
    pub fn installed(&self, name: &str) -> Option<&LockedPackage> {
        self.lockfile.get(name)
    }

    /// Compute the action for every declared dependency, in name order
    pub fn plan(&self) -> Vec<PlannedAction> {
        self.manifest
            .dependencies
            .iter()
            .map(|(name, desired)| {
                let installed = self.lockfile.get(name).map(|p| p.version.clone());
                let action = Self::plan_one(desired, installed.as_deref());
                debug!("Planned {} {} -> {}", name, desired, action);
                PlannedAction {
                    name: name.clone(),
                    desired: desired.clone(),
                    installed,
                    action,
                }
            })
            .collect()
    }

    fn plan_one(desired: &str, installed: Option<&str>) -> ReconcileAction {
        let desired = match parse(desired) {
            Ok(v) => v,
            Err(e) => return ReconcileAction::Invalid(format!("desired version: {}", e)),
        };
        let installed = match installed.map(parse).transpose() {
            Ok(v) => v,
            Err(e) => return ReconcileAction::Invalid(format!("installed version: {}", e)),
        };
        reconcile(&desired, installed.as_ref())
    }

    /// Record a successful install or update and persist both files
    pub fn record_install(
        &mut self,
        name: &str,
        version: &Version,
        sha256: &str,
        install_path: &Path,
        registry: &str,
    ) -> ConfigResult<()> {
        self.lockfile.set(
            name,
            LockedPackage {
                version: version.to_string(),
                sha256: sha256.to_string(),
                install_path: install_path.to_path_buf(),
                registry: registry.to_string(),
            },
        );
        self.lockfile.save_atomic()?;

        let declared = self.manifest.dependencies.get(name);
        if declared.map(String::as_str) != Some(version.to_string().as_str()) {
            self.manifest
                .dependencies
                .insert(name.to_string(), version.to_string());
            save_manifest(&self.root, &self.manifest)?;
        }

        info!("Recorded {}@{} from {}", name, version, registry);
        Ok(())
    }

    /// Forget a package in both files
    pub fn remove(&mut self, name: &str) -> ConfigResult<Option<LockedPackage>> {
        let removed = self.lockfile.remove(name);
        self.lockfile.save_atomic()?;
        if self.manifest.dependencies.remove(name).is_some() {
            save_manifest(&self.root, &self.manifest)?;
        }
        Ok(removed)
    }
}
