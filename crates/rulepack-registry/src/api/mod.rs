//! Wire types of the rulepack HTTP registry API
//!
//! Shared by `HttpRegistryClient` and the server so both ends agree on the
//! JSON shapes.

use rulepack_core::types::{PackageSummary, Version};
use serde::{Deserialize, Serialize};

/// Path of the health endpoint
pub const HEALTH_PATH: &str = "/health";

/// Multipart field carrying the manifest JSON
pub const MANIFEST_FIELD: &str = "manifest";

/// Multipart field carrying the `.tgz` archive
pub const ARCHIVE_FIELD: &str = "archive";

/// Response of `GET /packages`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub packages: Vec<PackageSummary>,
    #[serde(default)]
    pub total: usize,
}

/// Response of `POST /packages`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResponse {
    pub name: String,
    pub version: Version,
    pub sha256: String,
    pub download_url: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of every non-2xx response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub status: u16,
}

/// Response of `GET /health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Relative path of a blob download
pub fn blob_path(sha256: &str) -> String {
    format!("/blobs/{}", sha256)
}

/// Relative path of a package resource
pub fn package_path(name: &str) -> String {
    format!("/packages/{}", name)
}

/// Relative path of a version resource
pub fn version_path(name: &str, version: &Version) -> String {
    format!("/packages/{}/versions/{}", name, version)
}
