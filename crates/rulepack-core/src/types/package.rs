//! Package metadata types.
//!
//! Defines the manifest shipped inside every archive (`rulepack.json`) and
//! the views a registry returns for search and lookup.

use super::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the manifest file at the root of a project and of every archive
pub const MANIFEST_FILE_NAME: &str = "rulepack.json";

/// Package manifest from rulepack.json
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub name: String,
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// File globs (in a project) or concrete file names (inside an archive)
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Exact-version pins: name -> version
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
}

impl PackageManifest {
    /// Create new manifest with required fields
    pub fn new(name: String, version: Version) -> Self {
        Self {
            name,
            version,
            description: None,
            targets: Vec::new(),
            tags: Vec::new(),
            files: Vec::new(),
            license: None,
            dependencies: BTreeMap::new(),
        }
    }

    /// Check if this is a valid package name
    pub fn is_valid_name(name: &str) -> bool {
        !name.is_empty()
            && name.len() <= 214
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
            && !name.starts_with('-')
            && !name.ends_with('-')
    }

    /// Check if this package has a specific tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Check if this package declares a specific target
    pub fn has_target(&self, target: &str) -> bool {
        self.targets.iter().any(|t| t == target)
    }
}

/// One row of a search result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSummary {
    pub name: String,
    pub latest_version: Version,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub targets: Vec<String>,
}

/// Everything a registry knows about a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Published versions, ascending
    pub versions: Vec<Version>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub targets: Vec<String>,
}

impl PackageInfo {
    /// Highest published version
    pub fn latest(&self) -> Option<&Version> {
        self.versions.iter().max()
    }

    /// Collapse into a search row
    pub fn summary(&self) -> Option<PackageSummary> {
        Some(PackageSummary {
            name: self.name.clone(),
            latest_version: self.latest()?.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            targets: self.targets.clone(),
        })
    }
}

/// Metadata of one published version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub name: String,
    pub version: Version,
    pub sha256: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

/// Search parameters accepted by every registry backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub query: String,
    pub tag: Option<String>,
    pub target: Option<String>,
    pub limit: Option<usize>,
}

impl SearchQuery {
    /// Default page size when the caller gives none
    pub const DEFAULT_LIMIT: usize = 20;

    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }

    /// Case-insensitive substring match on name/description plus exact filters
    pub fn matches(&self, summary: &PackageSummary) -> bool {
        let needle = self.query.to_lowercase();
        let text_match = needle.is_empty()
            || summary.name.to_lowercase().contains(&needle)
            || summary
                .description
                .as_deref()
                .map(|d| d.to_lowercase().contains(&needle))
                .unwrap_or(false);
        let tag_match = self
            .tag
            .as_ref()
            .map_or(true, |tag| summary.tags.iter().any(|t| t == tag));
        let target_match = self
            .target
            .as_ref()
            .map_or(true, |target| summary.targets.iter().any(|t| t == target));
        text_match && tag_match && target_match
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_json_shape() {
        let json = r#"{
            "name": "security-rules",
            "version": "1.2.0",
            "description": "Hardening rules",
            "targets": ["cursor"],
            "tags": ["security"],
            "files": ["*.md"],
            "license": "MIT"
        }"#;
        let manifest: PackageManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.version, Version::new(1, 2, 0));
        assert!(manifest.has_tag("security"));
        assert!(manifest.has_target("cursor"));
        assert!(manifest.dependencies.is_empty());

        let back = serde_json::to_value(&manifest).unwrap();
        assert!(back.get("dependencies").is_none());
    }

    #[test]
    fn test_valid_package_names() {
        assert!(PackageManifest::is_valid_name("security-rules"));
        assert!(PackageManifest::is_valid_name("rules_2"));

        assert!(!PackageManifest::is_valid_name(""));
        assert!(!PackageManifest::is_valid_name("-invalid"));
        assert!(!PackageManifest::is_valid_name("invalid-"));
        assert!(!PackageManifest::is_valid_name("Upper"));
        assert!(!PackageManifest::is_valid_name("../escape"));
    }

    #[test]
    fn test_search_query_filters() {
        let summary = PackageSummary {
            name: "security-rules".to_string(),
            latest_version: Version::new(1, 0, 0),
            description: Some("Hardening guidance".to_string()),
            tags: vec!["security".to_string()],
            targets: vec!["cursor".to_string()],
        };

        assert!(SearchQuery::new("secur").matches(&summary));
        assert!(SearchQuery::new("HARDENING").matches(&summary));
        assert!(!SearchQuery::new("python").matches(&summary));

        let mut query = SearchQuery::new("");
        query.tag = Some("security".to_string());
        assert!(query.matches(&summary));
        query.target = Some("vscode".to_string());
        assert!(!query.matches(&summary));
    }

    #[test]
    fn test_package_info_latest() {
        let info = PackageInfo {
            name: "a".to_string(),
            description: None,
            versions: vec![Version::new(1, 0, 0), Version::new(1, 2, 0), Version::new(1, 1, 9)],
            tags: vec![],
            targets: vec![],
        };
        assert_eq!(info.latest(), Some(&Version::new(1, 2, 0)));
        assert_eq!(info.summary().unwrap().latest_version, Version::new(1, 2, 0));
    }
}
