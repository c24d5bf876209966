//! Publishing pipeline types.
//!
//! `StagedArchive` is produced by the archive builder and consumed by the
//! publish orchestrator; `PublishResult` travels back up from a registry
//! client. Neither is persisted by the core.

use super::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::RulepackError;

/// A packed, not-yet-published bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedArchive {
    pub package_name: String,
    pub version: Version,
    pub sha256: String,
    pub size_bytes: u64,
    pub file_paths: BTreeSet<String>,
    pub archive_path: PathBuf,
}

impl StagedArchive {
    /// `<name>-<version>.tgz`, the staging key of an archive
    pub fn file_name(package_name: &str, version: &Version) -> String {
        format!("{}-{}.tgz", package_name, version)
    }

    /// `name@version` for messages
    pub fn label(&self) -> String {
        format!("{}@{}", self.package_name, self.version)
    }
}

/// Outcome of a successful publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    pub package_name: String,
    pub version: Version,
    pub sha256: String,
    /// Download URL (http) or pull-request / compare URL (git)
    pub locator: String,
    pub message: String,
    /// Set when the publish landed but a follow-up step (PR creation) fell back
    #[serde(default)]
    pub degraded: bool,
}

/// Backend type tag carried by registry configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    #[default]
    Http,
    Git,
}

impl RegistryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryKind::Http => "http",
            RegistryKind::Git => "git",
        }
    }
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistryKind {
    type Err = RulepackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "http" | "https" => Ok(RegistryKind::Http),
            "git" => Ok(RegistryKind::Git),
            other => Err(RulepackError::InvalidFormat {
                what: "registry type".to_string(),
                input: other.to_string(),
                reason: "expected 'http' or 'git'".to_string(),
            }),
        }
    }
}
