//! Git backend: a registry stored in a repository
//!
//! Reads come from a cached clone of the default branch. A publish is an
//! explicit sequence of steps on that clone:
//!
//! ```text
//! Synced -> BranchCreated -> FilesStaged -> IndexUpdated -> Committed
//!        -> Pushed -> PullRequestRequested -> {Created | Fallback}
//! ```
//!
//! Everything up to `Pushed` fails the publish. Once the branch is pushed
//! the publish has succeeded; a failed pull request only degrades the
//! result to a manual compare link.

pub mod cache;
pub mod command;
pub mod host;
pub mod layout;

pub use cache::{normalize_url, GitCache, GitCacheEntry};
pub use command::GitCommand;
pub use host::{compare_url, GitHostClient, PullRequestRequest, RemoteRepo};
pub use layout::RegistryIndex;

use async_trait::async_trait;
use rulepack_config::RegistryConfig;
use rulepack_core::error::RulepackError;
use rulepack_core::types::{
    PackageInfo, PackageManifest, PackageSummary, PublishResult, RegistryKind, SearchQuery,
    Version, VersionInfo,
};
use rulepack_core::utils::sha256_hex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::client::{
    ensure_sha256, partial_path, place_verified, validate_name, with_deadline, RegistryClient,
};
use crate::RegistryResult;

/// Named points of the publish sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStep {
    Synced,
    BranchCreated,
    FilesStaged,
    IndexUpdated,
    Committed,
    Pushed,
    PullRequestRequested,
}

impl fmt::Display for PublishStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PublishStep::Synced => "synced",
            PublishStep::BranchCreated => "branch created",
            PublishStep::FilesStaged => "files staged",
            PublishStep::IndexUpdated => "index updated",
            PublishStep::Committed => "committed",
            PublishStep::Pushed => "pushed",
            PublishStep::PullRequestRequested => "pull request requested",
        };
        f.write_str(name)
    }
}

/// How the pull-request step ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestOutcome {
    Created { number: u64, url: String },
    Fallback { compare_url: String, reason: String },
}

/// Branch a publish of `name@version` is pushed to
pub fn branch_name(name: &str, version: &Version) -> String {
    format!("publish/{}/{}", name, version)
}

/// A version whose branch has been pushed, awaiting its pull request
struct PushedVersion {
    manifest: PackageManifest,
    branch: String,
    sha256: String,
    size_bytes: u64,
    // Why the pull request step is skipped, when it is
    skip_pull_request: Option<String>,
}

/// A clone synced to the remote default branch
struct Checkout {
    dir: PathBuf,
    // False when the remote has no default branch yet
    has_history: bool,
}

/// Client for one git-backed registry
pub struct GitRegistryClient {
    name: String,
    repo_url: String,
    default_branch: String,
    token: Option<String>,
    author: Option<(String, String)>,
    timeout: Duration,
    cache: Arc<GitCache>,
    host: Option<GitHostClient>,
}

impl fmt::Debug for GitRegistryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitRegistryClient")
            .field("name", &self.name)
            .field("repo_url", &self.repo_url)
            .field("default_branch", &self.default_branch)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host.as_ref().map(|h| h.remote().clone()))
            .finish()
    }
}

impl GitRegistryClient {
    pub fn new(config: &RegistryConfig) -> RegistryResult<Self> {
        let token = config.credential().map(|c| c.secret().to_string());
        let host = match RemoteRepo::parse(&config.url) {
            Some(remote) => {
                let base = config.api_url.clone().or_else(|| remote.api_base());
                match base {
                    Some(base) => Some(GitHostClient::new(
                        &config.name,
                        &base,
                        remote,
                        token.as_deref(),
                        config.timeout(),
                    )?),
                    None => None,
                }
            },
            None => None,
        };
        let author = match (&config.author_name, &config.author_email) {
            (Some(name), Some(email)) => Some((name.clone(), email.clone())),
            _ => None,
        };

        Ok(Self {
            name: config.name.clone(),
            repo_url: config.url.clone(),
            default_branch: config.default_branch().to_string(),
            token,
            author,
            timeout: config.timeout(),
            cache: GitCache::shared(&config.cache_root()?),
            host,
        })
    }

    /// Replace the host API client, e.g. to tune its rate-limit policy
    pub fn with_host(mut self, host: Option<GitHostClient>) -> Self {
        self.host = host;
        self
    }

    pub fn repo_url(&self) -> &str {
        &self.repo_url
    }

    fn git(&self, subcommand: &str) -> GitCommand {
        GitCommand::new(subcommand)
            .token(self.token.as_deref())
            .timeout(self.timeout)
    }

    /// Bring the cached clone in line with the remote default branch
    ///
    /// Must be called with the repository lock held.
    async fn sync(&self) -> RegistryResult<Checkout> {
        let dir = self.cache.local_path(&self.repo_url);
        if dir.join(".git").is_dir() {
            debug!("Fetching {} into {}", self.repo_url, dir.display());
            self.git("fetch")
                .args(["--quiet", "--prune", "origin"])
                .current_dir(&dir)
                .run()
                .await?;
        } else {
            if dir.exists() {
                // Leftover of an interrupted clone
                tokio::fs::remove_dir_all(&dir).await.map_err(|e| {
                    RulepackError::io(format!("Failed to clear {}", dir.display()), e)
                })?;
            }
            tokio::fs::create_dir_all(self.cache.root()).await.map_err(|e| {
                RulepackError::io(format!("Failed to create {}", self.cache.root().display()), e)
            })?;
            info!("Cloning {} into {}", self.repo_url, dir.display());
            self.git("clone")
                .args(["--quiet", "--origin", "origin"])
                .arg(self.repo_url.as_str())
                .arg(dir.to_string_lossy())
                .run()
                .await?;
        }

        let remote_ref = format!("refs/remotes/origin/{}", self.default_branch);
        let has_history = self
            .git("rev-parse")
            .args(["--verify", "--quiet", remote_ref.as_str()])
            .current_dir(&dir)
            .succeeds()
            .await?;

        if has_history {
            let tracking = format!("origin/{}", self.default_branch);
            self.git("checkout")
                .args(["--quiet", "--force", "-B", self.default_branch.as_str(), tracking.as_str()])
                .current_dir(&dir)
                .run()
                .await?;
        } else {
            let head = format!("refs/heads/{}", self.default_branch);
            self.git("symbolic-ref")
                .args(["HEAD", head.as_str()])
                .current_dir(&dir)
                .run()
                .await?;
            self.git("read-tree")
                .arg("--empty")
                .current_dir(&dir)
                .run()
                .await?;
        }
        self.git("clean")
            .args(["-q", "-f", "-d", "-x"])
            .current_dir(&dir)
            .run()
            .await?;

        self.cache.record_fetch(&self.repo_url).await?;
        Ok(Checkout { dir, has_history })
    }

    /// Lock, sync and load the index of the default branch
    async fn snapshot(&self) -> RegistryResult<(OwnedMutexGuard<()>, Checkout, RegistryIndex)> {
        let guard = self.cache.lock(&self.repo_url).await;
        let checkout = self.sync().await?;
        let index = if checkout.has_history {
            layout::validate_structure(&checkout.dir, &self.name)?;
            RegistryIndex::load(&checkout.dir)?
        } else {
            RegistryIndex::default()
        };
        Ok((guard, checkout, index))
    }

    /// Host API checks run before anything is pushed
    ///
    /// `Ok(Some(reason))` means the pull request step will be skipped;
    /// credential problems abort the publish.
    async fn preflight(&self) -> RegistryResult<Option<String>> {
        let Some(host) = &self.host else {
            return Ok(Some("no host API is known for this remote".to_string()));
        };
        let checked = match host.wait_for_quota().await {
            Ok(()) => host.check_write_access().await.map(|_| ()),
            Err(e) => Err(e),
        };
        match checked {
            Ok(()) => Ok(None),
            Err(e @ RulepackError::Unauthorized { .. })
            | Err(e @ RulepackError::InsufficientAccess { .. }) => Err(e),
            Err(e) => {
                warn!("Host API unavailable for '{}': {}", self.name, e);
                Ok(Some(e.to_string()))
            },
        }
    }

    /// Everything up to and including the push
    async fn push_version(
        &self,
        manifest_path: &Path,
        archive_path: &Path,
    ) -> RegistryResult<PushedVersion> {
        let manifest_bytes = tokio::fs::read(manifest_path).await.map_err(|e| {
            RulepackError::io(format!("Failed to read {}", manifest_path.display()), e)
        })?;
        let manifest: PackageManifest = serde_json::from_slice(&manifest_bytes)?;
        validate_name(&manifest.name)?;
        let archive = tokio::fs::read(archive_path).await.map_err(|e| {
            RulepackError::io(format!("Failed to read {}", archive_path.display()), e)
        })?;
        let sha256 = sha256_hex(&archive);
        let size_bytes = archive.len() as u64;
        let label = format!("{}@{}", manifest.name, manifest.version);
        let branch = branch_name(&manifest.name, &manifest.version);

        let skip_pull_request = self.preflight().await?;

        let guard = self.cache.lock(&self.repo_url).await;
        let checkout = self.sync().await?;
        let dir = checkout.dir.as_path();
        debug!("{}: {}", label, PublishStep::Synced);

        let mut index = if checkout.has_history {
            layout::validate_structure(dir, &self.name)?;
            RegistryIndex::load(dir)?
        } else {
            info!("Bootstrapping empty registry '{}'", self.name);
            layout::bootstrap(dir)?;
            RegistryIndex::default()
        };
        if index.contains(&manifest.name, &manifest.version) {
            return Err(RulepackError::Conflict {
                package: manifest.name.clone(),
                version: manifest.version.to_string(),
                registry: self.name.clone(),
            });
        }

        if checkout.has_history {
            self.git("checkout")
                .args(["--quiet", "-B", branch.as_str()])
                .current_dir(dir)
                .run()
                .await?;
        } else {
            let head = format!("refs/heads/{}", branch);
            self.git("symbolic-ref")
                .args(["HEAD", head.as_str()])
                .current_dir(dir)
                .run()
                .await?;
        }
        debug!("{}: {} ({})", label, PublishStep::BranchCreated, branch);

        let version_dir = layout::version_dir(dir, &manifest.name, &manifest.version);
        tokio::fs::create_dir_all(&version_dir).await.map_err(|e| {
            RulepackError::io(format!("Failed to create {}", version_dir.display()), e)
        })?;
        let manifest_file = version_dir.join(layout::VERSION_MANIFEST_FILE);
        tokio::fs::write(&manifest_file, serde_json::to_vec_pretty(&manifest)?)
            .await
            .map_err(|e| RulepackError::io(format!("Failed to write {}", manifest_file.display()), e))?;
        let archive_file = version_dir.join(layout::VERSION_ARCHIVE_FILE);
        tokio::fs::write(&archive_file, &archive)
            .await
            .map_err(|e| RulepackError::io(format!("Failed to write {}", archive_file.display()), e))?;
        debug!("{}: {}", label, PublishStep::FilesStaged);

        index.add_version(&manifest, &sha256, size_bytes, &self.name)?;
        index.save(dir)?;
        debug!("{}: {}", label, PublishStep::IndexUpdated);

        self.git("add")
            .args(["--all", "--", layout::PACKAGES_DIR, layout::INDEX_FILE])
            .current_dir(dir)
            .run()
            .await?;
        let message = format!(
            "Publish {}\n\nsha256: {}\nsize: {} bytes",
            label, sha256, size_bytes
        );
        let mut commit = self.git("commit").args(["--quiet", "-m", message.as_str()]);
        if let Some((name, email)) = &self.author {
            commit = commit.config("user.name", name).config("user.email", email);
        }
        commit.current_dir(dir).run().await?;
        debug!("{}: {}", label, PublishStep::Committed);

        // Never retried: the lease is only valid against what we just fetched
        let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch);
        self.git("push")
            .args(["--quiet", "--force-with-lease", "origin", refspec.as_str()])
            .current_dir(dir)
            .run()
            .await?;
        info!("{}: {} to '{}'", label, PublishStep::Pushed, branch);
        drop(guard);

        Ok(PushedVersion {
            manifest,
            branch,
            sha256,
            size_bytes,
            skip_pull_request,
        })
    }

    /// Turn a pushed branch into a publish result
    ///
    /// Never fails: the publish already succeeded once the branch was pushed.
    async fn finish_publish(&self, pushed: PushedVersion) -> PublishResult {
        let PushedVersion {
            manifest,
            branch,
            sha256,
            size_bytes,
            skip_pull_request,
        } = pushed;
        let label = format!("{}@{}", manifest.name, manifest.version);

        let outcome = match skip_pull_request {
            Some(reason) => PullRequestOutcome::Fallback {
                compare_url: compare_url(&self.repo_url, &self.default_branch, &branch),
                reason,
            },
            None => self.request_pull_request(&manifest, &branch, &sha256, size_bytes).await,
        };
        debug!("{}: {}", label, PublishStep::PullRequestRequested);

        match outcome {
            PullRequestOutcome::Created { number, url } => PublishResult {
                package_name: manifest.name.clone(),
                version: manifest.version.clone(),
                sha256,
                locator: url,
                message: format!("Opened pull request #{} for {}", number, label),
                degraded: false,
            },
            PullRequestOutcome::Fallback {
                compare_url,
                reason,
            } => PublishResult {
                package_name: manifest.name.clone(),
                version: manifest.version.clone(),
                sha256,
                message: format!(
                    "Pushed branch {}; open a pull request manually at {} ({})",
                    branch, compare_url, reason
                ),
                locator: compare_url,
                degraded: true,
            },
        }
    }

    async fn request_pull_request(
        &self,
        manifest: &PackageManifest,
        branch: &str,
        sha256: &str,
        size_bytes: u64,
    ) -> PullRequestOutcome {
        let fallback = |reason: String| PullRequestOutcome::Fallback {
            compare_url: compare_url(&self.repo_url, &self.default_branch, branch),
            reason,
        };
        let Some(host) = &self.host else {
            return fallback("no host API is known for this remote".to_string());
        };

        let mut body = format!(
            "Automated publish of `{}` version `{}`.\n\n| | |\n|---|---|\n| sha256 | `{}` |\n| size | {} bytes |\n",
            manifest.name, manifest.version, sha256, size_bytes
        );
        if let Some(description) = &manifest.description {
            body.push_str(&format!("| description | {} |\n", description));
        }
        if !manifest.tags.is_empty() {
            body.push_str(&format!("| tags | {} |\n", manifest.tags.join(", ")));
        }
        if !manifest.targets.is_empty() {
            body.push_str(&format!("| targets | {} |\n", manifest.targets.join(", ")));
        }
        let request = PullRequestRequest {
            title: format!("Publish {}@{}", manifest.name, manifest.version),
            head: branch.to_string(),
            base: self.default_branch.clone(),
            body,
        };

        // The push may have used up the quota the preflight saw
        let created = with_deadline("pull request", self.timeout, async {
            host.wait_for_quota().await?;
            host.create_pull_request(&request).await
        })
        .await;
        match created {
            Ok(pr) => PullRequestOutcome::Created {
                number: pr.number,
                url: pr.html_url,
            },
            Err(e) => {
                warn!("Skipping pull request for {}: {}", branch, e);
                fallback(e.to_string())
            },
        }
    }

    async fn download_inner(&self, sha256: &str, dest: &Path) -> RegistryResult<()> {
        let (_guard, checkout, index) = self.snapshot().await?;
        let (name, version) = index
            .find_blob(sha256)
            .ok_or_else(|| RulepackError::not_found(format!("blob {}", sha256)))?;
        let source = layout::version_dir(&checkout.dir, &name, &version)
            .join(layout::VERSION_ARCHIVE_FILE);

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RulepackError::io(format!("Failed to create {}", parent.display()), e))?;
        }
        let temp = partial_path(dest);
        let copied = match tokio::fs::copy(&source, &temp).await {
            Ok(_) => tokio::fs::read(&temp)
                .await
                .map_err(|e| RulepackError::io(format!("Failed to read {}", temp.display()), e)),
            Err(e) => Err(RulepackError::io(format!("Failed to copy {}", source.display()), e)),
        };
        match copied {
            Ok(bytes) => place_verified(&temp, dest, sha256, &sha256_hex(&bytes)).await,
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp).await;
                Err(e)
            },
        }
    }
}

#[async_trait]
impl RegistryClient for GitRegistryClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> RegistryKind {
        RegistryKind::Git
    }

    async fn search(&self, query: &SearchQuery) -> RegistryResult<Vec<PackageSummary>> {
        with_deadline("search", self.timeout, async {
            let (_guard, _, index) = self.snapshot().await?;
            Ok(index.search(query))
        })
        .await
    }

    async fn get_package(&self, name: &str) -> RegistryResult<PackageInfo> {
        validate_name(name)?;
        with_deadline("get package", self.timeout, async {
            let (_guard, _, index) = self.snapshot().await?;
            index.package_info(name)
        })
        .await
    }

    async fn get_version(&self, name: &str, version: &Version) -> RegistryResult<VersionInfo> {
        validate_name(name)?;
        with_deadline("get version", self.timeout, async {
            let (_guard, _, index) = self.snapshot().await?;
            index.version_info(name, version)
        })
        .await
    }

    /// The deadline covers the host preflight, the wait for the repository
    /// lock and every git step up to the push. The pull request step has a
    /// deadline of its own and only degrades the result when it runs out.
    async fn publish(
        &self,
        manifest_path: &Path,
        archive_path: &Path,
    ) -> RegistryResult<PublishResult> {
        let pushed = with_deadline(
            "publish",
            self.timeout,
            self.push_version(manifest_path, archive_path),
        )
        .await?;
        Ok(self.finish_publish(pushed).await)
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
        let ls_remote = self
            .git("ls-remote")
            .args(["--heads", "--quiet"])
            .arg(self.repo_url.as_str());
        with_deadline("health", self.timeout, ls_remote.run())
            .await
            .map(|_| ())
    }
}
