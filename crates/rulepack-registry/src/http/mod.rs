//! REST backend: the rulepack HTTP registry API
//!
//! Reads are idempotent GETs retried with backoff; `publish` is a single
//! multipart POST that is never retried. Blob downloads stream to disk.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{multipart, Client, ClientBuilder, Response, StatusCode};
use rulepack_config::RegistryConfig;
use rulepack_core::error::RulepackError;
use rulepack_core::types::{
    PackageInfo, PackageManifest, PackageSummary, PublishResult, RegistryKind, SearchQuery,
    Version, VersionInfo,
};
use rulepack_core::utils::sha256_hex;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::api::{self, ErrorBody, PublishResponse, SearchResponse};
use crate::cache::MetadataCache;
use crate::client::{
    ensure_sha256, partial_path, place_verified, validate_name, with_deadline, with_retry,
    RegistryClient, RetryConfig,
};
use crate::RegistryResult;

/// Client for one HTTP registry
#[derive(Debug)]
pub struct HttpRegistryClient {
    name: String,
    base_url: String,
    client: Client,
    retry_config: RetryConfig,
    timeout: Duration,
    metadata: MetadataCache,
}

impl HttpRegistryClient {
    /// Create a client with connection pooling and the registry's bearer token
    pub fn new(config: &RegistryConfig) -> RegistryResult<Self> {
        let timeout = config.timeout();
        let mut builder = ClientBuilder::new()
            // Connection pooling configuration
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .gzip(true)
            .user_agent(concat!("rulepack/", env!("CARGO_PKG_VERSION")));

        if let Some(credential) = config.credential() {
            let mut headers = reqwest::header::HeaderMap::new();
            let mut value: reqwest::header::HeaderValue = format!("Bearer {}", credential.secret())
                .parse()
                .map_err(|e| RulepackError::ConfigValidation {
                    field: format!("registries.{}.token", config.name),
                    reason: format!("Invalid auth token: {}", e),
                })?;
            value.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }

        let client = builder.build().map_err(|e| {
            RulepackError::network(format!("Failed to create HTTP client: {}", e), e)
        })?;

        Ok(Self {
            name: config.name.clone(),
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
            retry_config: RetryConfig::default(),
            timeout,
            metadata: MetadataCache::new(),
        })
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// Override the per-call deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Absolute form of a locator the server may return relative
    fn absolute(&self, locator: &str) -> String {
        if locator.starts_with('/') {
            self.url(locator)
        } else {
            locator.to_string()
        }
    }

    fn send_error(&self, operation: &str, error: reqwest::Error) -> RulepackError {
        if error.is_timeout() {
            RulepackError::Timeout {
                operation: format!("{} on '{}'", operation, self.name),
                seconds: self.timeout.as_secs(),
            }
        } else {
            RulepackError::network(format!("{} on '{}' failed: {}", operation, self.name, error), error)
        }
    }

    /// Classify a non-2xx response
    async fn status_error(
        &self,
        response: Response,
        resource: &str,
        package: Option<(&str, &str)>,
    ) -> RulepackError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or_else(|_| {
                let trimmed = body.trim();
                if trimmed.is_empty() {
                    status.canonical_reason().unwrap_or("no details").to_string()
                } else {
                    trimmed.chars().take(200).collect()
                }
            });
        classify_status(&self.name, status, message, resource, package)
    }

    /// GET a JSON resource with retries
    async fn get_json<T: DeserializeOwned + Send>(
        &self,
        path: &str,
        query: &[(&str, String)],
        resource: &str,
    ) -> RegistryResult<T> {
        let url = self.url(path);
        let url = url.as_str();
        let this = self;
        with_retry(&self.retry_config, || async move {
            let response = this
                .client
                .get(url)
                .query(query)
                .send()
                .await
                .map_err(|e| this.send_error("GET", e))?;

            if !response.status().is_success() {
                return Err(this.status_error(response, resource, None).await);
            }
            response.json::<T>().await.map_err(|e| RulepackError::JsonParse {
                message: format!("Invalid response for {}: {}", resource, e),
            })
        })
        .await
    }

    async fn publish_inner(
        &self,
        manifest_path: &Path,
        archive_path: &Path,
    ) -> RegistryResult<PublishResult> {
        let manifest_bytes = tokio::fs::read(manifest_path).await.map_err(|e| {
            RulepackError::io(format!("Failed to read {}", manifest_path.display()), e)
        })?;
        let manifest: PackageManifest = serde_json::from_slice(&manifest_bytes)?;
        let archive_bytes = tokio::fs::read(archive_path).await.map_err(|e| {
            RulepackError::io(format!("Failed to read {}", archive_path.display()), e)
        })?;
        let sha256 = sha256_hex(&archive_bytes);
        let version = manifest.version.to_string();

        let file_name = archive_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive.tgz".to_string());
        let form = multipart::Form::new()
            .part(
                api::MANIFEST_FIELD,
                multipart::Part::bytes(manifest_bytes)
                    .file_name("rulepack.json")
                    .mime_str("application/json")
                    .map_err(|e| RulepackError::network("Invalid mime type".to_string(), e))?,
            )
            .part(
                api::ARCHIVE_FIELD,
                multipart::Part::bytes(archive_bytes)
                    .file_name(file_name)
                    .mime_str("application/gzip")
                    .map_err(|e| RulepackError::network("Invalid mime type".to_string(), e))?,
            );

        info!("Publishing {}@{} to '{}'", manifest.name, version, self.name);
        let response = self
            .client
            .post(self.url("/packages"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.send_error("publish", e))?;

        if !response.status().is_success() {
            let resource = format!("{}@{}", manifest.name, version);
            return Err(self
                .status_error(response, &resource, Some((&manifest.name, &version)))
                .await);
        }

        let published: PublishResponse = response.json().await.map_err(|e| {
            RulepackError::JsonParse {
                message: format!("Invalid publish response: {}", e),
            }
        })?;
        if !published.sha256.eq_ignore_ascii_case(&sha256) {
            return Err(RulepackError::IntegrityMismatch {
                resource: format!("{}@{} on '{}'", manifest.name, version, self.name),
                expected: sha256,
                actual: published.sha256,
            });
        }

        self.metadata.invalidate(&manifest.name);
        Ok(PublishResult {
            package_name: published.name,
            version: published.version,
            sha256,
            locator: self.absolute(&published.download_url),
            message: published
                .message
                .unwrap_or_else(|| format!("Published to '{}'", self.name)),
            degraded: false,
        })
    }

    async fn download_inner(&self, sha256: &str, dest: &Path) -> RegistryResult<()> {
        let url = self.url(&api::blob_path(sha256));
        let resource = format!("blob {}", sha256);
        let (url, resource_ref, this) = (url.as_str(), resource.as_str(), self);
        let response = with_retry(&self.retry_config, || async move {
            let response = this
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| this.send_error("download", e))?;
            if response.status().is_success() {
                Ok(response)
            } else {
                Err(this.status_error(response, resource_ref, None).await)
            }
        })
        .await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RulepackError::io(format!("Failed to create {}", parent.display()), e))?;
        }
        let temp = partial_path(dest);
        let mut file = tokio::fs::File::create(&temp)
            .await
            .map_err(|e| RulepackError::io(format!("Failed to create {}", temp.display()), e))?;

        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&temp).await;
                    return Err(self.send_error("download", e));
                },
            };
            hasher.update(&chunk);
            written += chunk.len() as u64;
            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(RulepackError::io(format!("Failed to write {}", temp.display()), e));
            }
        }
        if let Err(e) = file.flush().await {
            drop(file);
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(RulepackError::io(format!("Failed to flush {}", temp.display()), e));
        }
        drop(file);

        debug!("Downloaded {} bytes for {}", written, resource);
        let actual = hex::encode(hasher.finalize());
        place_verified(&temp, dest, sha256, &actual).await
    }
}

/// Map an HTTP status onto the error taxonomy
pub fn classify_status(
    registry: &str,
    status: StatusCode,
    message: String,
    resource: &str,
    package: Option<(&str, &str)>,
) -> RulepackError {
    match status.as_u16() {
        401 | 403 => RulepackError::Unauthorized {
            registry: registry.to_string(),
            message,
        },
        404 => RulepackError::not_found(resource.to_string()),
        409 => {
            let (package, version) = package.unwrap_or((resource, "?"));
            RulepackError::Conflict {
                package: package.to_string(),
                version: version.to_string(),
                registry: registry.to_string(),
            }
        },
        429 => RulepackError::RateLimited {
            registry: registry.to_string(),
            message,
        },
        code if code >= 500 => RulepackError::ServerError {
            status: code,
            message,
        },
        code => RulepackError::ConnectionFailed {
            message: format!("unexpected status {} from '{}': {}", code, registry, message),
            source: None,
        },
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> RegistryKind {
        RegistryKind::Http
    }

    async fn search(&self, query: &SearchQuery) -> RegistryResult<Vec<PackageSummary>> {
        let mut params = vec![
            ("q", query.query.clone()),
            ("limit", query.limit().to_string()),
        ];
        if let Some(tag) = &query.tag {
            params.push(("tag", tag.clone()));
        }
        if let Some(target) = &query.target {
            params.push(("target", target.clone()));
        }

        let response: SearchResponse = with_deadline(
            "search",
            self.timeout,
            self.get_json("/packages", &params, "search results"),
        )
        .await?;
        let mut packages = response.packages;
        packages.truncate(query.limit());
        Ok(packages)
    }

    async fn get_package(&self, name: &str) -> RegistryResult<PackageInfo> {
        validate_name(name)?;
        if let Some(info) = self.metadata.get(name) {
            debug!("Metadata cache hit for {}", name);
            return Ok(info);
        }

        let resource = format!("package '{}'", name);
        let mut info: PackageInfo = with_deadline(
            "get package",
            self.timeout,
            self.get_json(&api::package_path(name), &[], &resource),
        )
        .await?;
        info.versions.sort();
        self.metadata.insert(info.clone());
        Ok(info)
    }

    async fn get_version(&self, name: &str, version: &Version) -> RegistryResult<VersionInfo> {
        validate_name(name)?;
        let resource = format!("{}@{}", name, version);
        with_deadline(
            "get version",
            self.timeout,
            self.get_json(&api::version_path(name, version), &[], &resource),
        )
        .await
    }

    async fn publish(
        &self,
        manifest_path: &Path,
        archive_path: &Path,
    ) -> RegistryResult<PublishResult> {
        with_deadline(
            "publish",
            self.timeout,
            self.publish_inner(manifest_path, archive_path),
        )
        .await
    }

    async fn download_blob(&self, sha256: &str, dest: &Path) -> RegistryResult<()> {
        ensure_sha256(sha256)?;
        let result = with_deadline("download", self.timeout, self.download_inner(sha256, dest)).await;
        if matches!(result, Err(RulepackError::Timeout { .. })) {
            let _ = tokio::fs::remove_file(partial_path(dest)).await;
        }
        result
    }

    async fn health(&self) -> RegistryResult<()> {
        let _: api::HealthResponse = with_deadline(
            "health",
            self.timeout,
            self.get_json(api::HEALTH_PATH, &[], "health endpoint"),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
