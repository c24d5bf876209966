//! Configuration for rulepack projects and registries
//!
//! This crate owns the files a user (or the tool) keeps on disk:
//! - `rulepack.json`, the user-edited project manifest
//! - `rulepack.lock`, the machine-written record of installed versions
//! - `~/.rulepack/config.toml`, the named registries and the active one
//!
//! `ManifestStore` reconciles the first two into per-package install actions.

pub mod lockfile;
pub mod manifest;
pub mod reconcile;
pub mod registry;

// Re-export main types
pub use lockfile::{LockedPackage, Lockfile, LOCKFILE_NAME};
pub use manifest::{default_manifest, load_manifest, parse_manifest, save_manifest, write_atomic};
pub use reconcile::{reconcile, ManifestStore, PlannedAction, ReconcileAction};
pub use registry::{rulepack_home, Credential, RegistriesFile, RegistryConfig};

use rulepack_core::error::RulepackError;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, RulepackError>;
