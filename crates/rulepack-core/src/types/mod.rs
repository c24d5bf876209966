//! Core data types for rulepack.
//!
//! This module provides the fundamental types used throughout the workspace:
//! - The semantic version engine
//! - Package manifests and registry views
//! - Staged archives and publish results

pub mod package;
pub mod publish;
pub mod version;

// Re-export all public types
pub use package::{
    PackageInfo, PackageManifest, PackageSummary, SearchQuery, VersionInfo, MANIFEST_FILE_NAME,
};
pub use publish::{PublishResult, RegistryKind, StagedArchive};
pub use version::{compare, parse, validate_increase, Version, VersionError};
