//! GitHub-compatible host API: access checks, rate limits and pull requests

use reqwest::{Client, ClientBuilder, Response, StatusCode};
use rulepack_core::error::RulepackError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::http::classify_status;
use crate::RegistryResult;

/// Remaining requests below which the client waits for the quota window
pub const RATE_LIMIT_LOW_WATER: u64 = 10;

/// Longest the client will sleep waiting for the quota to reset
pub const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(15 * 60);

/// Owner and name of a repository, parsed from its remote URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepo {
    /// Lowercased host; empty for `file://` remotes
    pub host: String,
    pub owner: String,
    pub repo: String,
}

impl RemoteRepo {
    /// Parse `https://host/o/r(.git)`, `ssh://git@host/o/r`, `git@host:o/r` or
    /// `file:///any/path/o/r.git`
    pub fn parse(url: &str) -> Option<Self> {
        let url = url.trim().trim_end_matches('/');
        let (host, path) = if url.contains("://") {
            let parsed = Url::parse(url).ok()?;
            (
                parsed.host_str().unwrap_or_default().to_lowercase(),
                parsed.path().to_string(),
            )
        } else {
            // scp-like syntax: git@host:owner/repo
            let (authority, path) = url.split_once(':')?;
            let host = authority.rsplit('@').next().unwrap_or(authority);
            (host.to_lowercase(), path.to_string())
        };

        let mut segments = path.rsplit('/').filter(|s| !s.is_empty());
        let repo = segments.next()?.trim_end_matches(".git").to_string();
        let owner = segments.next()?.to_string();
        if repo.is_empty() {
            return None;
        }
        Some(Self { host, owner, repo })
    }

    /// Default API base for the host, if it has one
    pub fn api_base(&self) -> Option<String> {
        match self.host.as_str() {
            "" => None,
            "github.com" | "www.github.com" => Some("https://api.github.com".to_string()),
            host => Some(format!("https://{}/api/v3", host)),
        }
    }
}

/// Browser URL of a repository, derived from its remote URL
pub fn web_url(repo_url: &str) -> String {
    let trimmed = repo_url.trim().trim_end_matches('/').trim_end_matches(".git");
    match Url::parse(trimmed) {
        Ok(mut parsed) if matches!(parsed.scheme(), "http" | "https") => {
            // Credentials embedded in the URL never reach messages
            let _ = parsed.set_username("");
            let _ = parsed.set_password(None);
            parsed.as_str().trim_end_matches('/').to_string()
        },
        Ok(parsed) if parsed.scheme() == "file" => trimmed.to_string(),
        _ => match RemoteRepo::parse(trimmed) {
            Some(remote) if !remote.host.is_empty() => {
                format!("https://{}/{}/{}", remote.host, remote.owner, remote.repo)
            },
            _ => trimmed.to_string(),
        },
    }
}

/// `<repo>/compare/<base>...<head>`, the manual pull-request link
pub fn compare_url(repo_url: &str, base: &str, head: &str) -> String {
    format!("{}/compare/{}...{}", web_url(repo_url), base, head)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepoPermissions {
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub maintain: bool,
    #[serde(default)]
    pub push: bool,
}

/// Subset of `GET /repos/{owner}/{repo}`
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryInfo {
    pub default_branch: String,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub permissions: Option<RepoPermissions>,
}

impl RepositoryInfo {
    pub fn can_push(&self) -> bool {
        self.permissions
            .as_ref()
            .map_or(false, |p| p.push || p.maintain || p.admin)
    }
}

/// The `core` bucket of `GET /rate_limit`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimitStatus {
    pub limit: u64,
    pub remaining: u64,
    /// Unix seconds at which the window resets
    pub reset: i64,
}

#[derive(Debug, Deserialize)]
struct RateLimitResources {
    core: RateLimitStatus,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

/// Body of `POST /repos/{owner}/{repo}/pulls`
#[derive(Debug, Clone, Serialize)]
pub struct PullRequestRequest {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
}

#[derive(Debug, Deserialize)]
struct HostErrorBody {
    message: String,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

/// REST client for one repository on a GitHub-compatible host
#[derive(Debug, Clone)]
pub struct GitHostClient {
    registry: String,
    api_base: String,
    remote: RemoteRepo,
    client: Client,
    timeout: Duration,
    low_water: u64,
    max_wait: Duration,
}

impl GitHostClient {
    pub fn new(
        registry: &str,
        api_base: &str,
        remote: RemoteRepo,
        token: Option<&str>,
        timeout: Duration,
    ) -> RegistryResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let mut value: reqwest::header::HeaderValue =
                format!("Bearer {}", token)
                    .parse()
                    .map_err(|e| RulepackError::ConfigValidation {
                        field: format!("registries.{}.token", registry),
                        reason: format!("Invalid auth token: {}", e),
                    })?;
            value.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .user_agent(concat!("rulepack/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| {
                RulepackError::network(format!("Failed to create host API client: {}", e), e)
            })?;

        Ok(Self {
            registry: registry.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            remote,
            client,
            timeout,
            low_water: RATE_LIMIT_LOW_WATER,
            max_wait: MAX_RATE_LIMIT_WAIT,
        })
    }

    pub fn with_rate_limit(mut self, low_water: u64, max_wait: Duration) -> Self {
        self.low_water = low_water;
        self.max_wait = max_wait;
        self
    }

    pub fn remote(&self) -> &RemoteRepo {
        &self.remote
    }

    fn repo_url(&self, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.api_base, self.remote.owner, self.remote.repo, suffix
        )
    }

    fn send_error(&self, operation: &str, error: reqwest::Error) -> RulepackError {
        if error.is_timeout() {
            RulepackError::Timeout {
                operation: format!("{} on '{}'", operation, self.registry),
                seconds: self.timeout.as_secs(),
            }
        } else {
            RulepackError::network(format!("{} failed: {}", operation, error), error)
        }
    }

    async fn status_error(&self, response: Response, resource: &str) -> RulepackError {
        let status = response.status();
        let exhausted = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            == Some("0");
        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<HostErrorBody>(&body) {
            Ok(parsed) => {
                let details: Vec<String> = parsed
                    .errors
                    .iter()
                    .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                    .map(str::to_string)
                    .collect();
                if details.is_empty() {
                    parsed.message
                } else {
                    format!("{} ({})", parsed.message, details.join("; "))
                }
            },
            Err(_) => body.trim().chars().take(200).collect(),
        };

        if exhausted && matches!(status, StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS) {
            return RulepackError::RateLimited {
                registry: self.registry.clone(),
                message,
            };
        }
        classify_status(&self.registry, status, message, resource, None)
    }

    /// Repository metadata as seen by the configured token
    pub async fn repository(&self) -> RegistryResult<RepositoryInfo> {
        let response = self
            .client
            .get(self.repo_url(""))
            .send()
            .await
            .map_err(|e| self.send_error("repository lookup", e))?;
        if !response.status().is_success() {
            let resource = format!("repository {}/{}", self.remote.owner, self.remote.repo);
            return Err(self.status_error(response, &resource).await);
        }
        response.json().await.map_err(|e| RulepackError::JsonParse {
            message: format!("Invalid repository response: {}", e),
        })
    }

    /// Fail with `InsufficientAccess` unless the token may push
    pub async fn check_write_access(&self) -> RegistryResult<RepositoryInfo> {
        let info = match self.repository().await {
            Ok(info) => info,
            // Hosts hide private repositories from tokens without access
            Err(RulepackError::NotFound { .. }) => {
                return Err(self.insufficient("repository is not visible to this token"))
            },
            Err(e) => return Err(e),
        };
        if !info.can_push() {
            return Err(self.insufficient("write (collaborator) access is required to publish"));
        }
        debug!(
            "Write access to {}/{} confirmed",
            self.remote.owner, self.remote.repo
        );
        Ok(info)
    }

    fn insufficient(&self, message: &str) -> RulepackError {
        RulepackError::InsufficientAccess {
            registry: self.registry.clone(),
            message: format!("{}/{}: {}", self.remote.owner, self.remote.repo, message),
        }
    }

    pub async fn rate_limit(&self) -> RegistryResult<RateLimitStatus> {
        let response = self
            .client
            .get(format!("{}/rate_limit", self.api_base))
            .send()
            .await
            .map_err(|e| self.send_error("rate limit lookup", e))?;
        if !response.status().is_success() {
            return Err(self.status_error(response, "rate limit").await);
        }
        let parsed: RateLimitResponse = response.json().await.map_err(|e| {
            RulepackError::JsonParse {
                message: format!("Invalid rate limit response: {}", e),
            }
        })?;
        Ok(parsed.resources.core)
    }

    /// Block until the quota is above the low-water mark
    ///
    /// Waits longer than the configured cap are refused with `RateLimited`.
    pub async fn wait_for_quota(&self) -> RegistryResult<()> {
        let status = self.rate_limit().await?;
        let Some(wait) = quota_wait(&status, self.low_water, chrono::Utc::now().timestamp())
        else {
            return Ok(());
        };
        if wait > self.max_wait {
            return Err(RulepackError::RateLimited {
                registry: self.registry.clone(),
                message: format!(
                    "{} requests left, quota resets in {}s",
                    status.remaining,
                    wait.as_secs()
                ),
            });
        }
        info!(
            "Host API quota low ({} left); waiting {}s for reset",
            status.remaining,
            wait.as_secs()
        );
        tokio::time::sleep(wait).await;
        Ok(())
    }

    pub async fn create_pull_request(
        &self,
        request: &PullRequestRequest,
    ) -> RegistryResult<PullRequest> {
        let response = self
            .client
            .post(self.repo_url("/pulls"))
            .json(request)
            .send()
            .await
            .map_err(|e| self.send_error("pull request creation", e))?;
        if !response.status().is_success() {
            let error = self.status_error(response, "pull request").await;
            warn!("Pull request for {} was not created: {}", request.head, error);
            return Err(error);
        }
        response.json().await.map_err(|e| RulepackError::JsonParse {
            message: format!("Invalid pull request response: {}", e),
        })
    }
}

/// How long to wait before the quota is usable again, if at all
fn quota_wait(status: &RateLimitStatus, low_water: u64, now: i64) -> Option<Duration> {
    if status.remaining >= low_water {
        return None;
    }
    let seconds = (status.reset - now).max(0) as u64 + 1;
    Some(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests;
