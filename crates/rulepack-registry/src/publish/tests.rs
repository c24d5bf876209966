//! Unit tests for batch publishing

use super::*;
use async_trait::async_trait;
use rulepack_cache::create_archive;
use rulepack_core::types::{
    PackageInfo, PackageManifest, PackageSummary, RegistryKind, SearchQuery, Version, VersionInfo,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;
use tempfile::tempdir;

/// Registry double that fails for selected packages
struct ScriptedRegistry {
    failing: BTreeSet<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRegistry {
    fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RegistryClient for ScriptedRegistry {
    fn name(&self) -> &str {
        "scripted"
    }

    fn kind(&self) -> RegistryKind {
        RegistryKind::Http
    }

    async fn search(&self, _query: &SearchQuery) -> RegistryResult<Vec<PackageSummary>> {
        Ok(Vec::new())
    }

    async fn get_package(&self, name: &str) -> RegistryResult<PackageInfo> {
        Err(RulepackError::not_found(name))
    }

    async fn get_version(&self, name: &str, _version: &Version) -> RegistryResult<VersionInfo> {
        Err(RulepackError::not_found(name))
    }

    async fn publish(
        &self,
        manifest_path: &Path,
        archive_path: &Path,
    ) -> RegistryResult<PublishResult> {
        let manifest: PackageManifest =
            serde_json::from_slice(&std::fs::read(manifest_path).unwrap()).unwrap();
        assert!(archive_path.exists());
        self.calls.lock().unwrap().push(manifest.name.clone());

        if self.failing.contains(&manifest.name) {
            return Err(RulepackError::Conflict {
                package: manifest.name,
                version: manifest.version.to_string(),
                registry: "scripted".to_string(),
            });
        }
        Ok(PublishResult {
            package_name: manifest.name.clone(),
            version: manifest.version,
            sha256: "0".repeat(64),
            locator: format!("https://rules.example.com/packages/{}", manifest.name),
            message: "published".to_string(),
            degraded: false,
        })
    }

    async fn download_blob(&self, sha256: &str, _dest: &Path) -> RegistryResult<()> {
        Err(RulepackError::not_found(sha256))
    }

    async fn health(&self) -> RegistryResult<()> {
        Ok(())
    }
}

fn stage(area: &StagingArea, name: &str) {
    let manifest = PackageManifest::new(name.to_string(), Version::new(1, 0, 0));
    let mut contents = BTreeMap::new();
    contents.insert("rules.md".to_string(), name.as_bytes().to_vec());
    let archive = create_archive(&contents).unwrap();
    area.stage(&manifest, &archive, BTreeSet::from(["rules.md".to_string()]))
        .unwrap();
}

#[tokio::test]
async fn test_failure_does_not_stop_the_batch() {
    let dir = tempdir().unwrap();
    let staging = StagingArea::new(dir.path());
    for name in ["alpha", "beta", "gamma"] {
        stage(&staging, name);
    }
    let registry = ScriptedRegistry::failing(&["beta"]);

    let report = PublishOrchestrator::new(&registry, &staging)
        .run(&PublishOptions::default())
        .await
        .unwrap();

    assert_eq!(registry.calls(), vec!["alpha", "beta", "gamma"]);
    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.succeeded().count(), 2);
    let failed: Vec<&ItemOutcome> = report.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].archive.package_name, "beta");
    assert!(matches!(
        failed[0].result,
        Err(RulepackError::Conflict { .. })
    ));
    assert!(!report.is_success());

    // Only the failed archive stays staged
    let remaining: Vec<String> = staging
        .list()
        .unwrap()
        .into_iter()
        .map(|a| a.package_name)
        .collect();
    assert_eq!(remaining, vec!["beta"]);
}

#[tokio::test]
async fn test_all_published_is_success() {
    let dir = tempdir().unwrap();
    let staging = StagingArea::new(dir.path());
    stage(&staging, "alpha");
    let registry = ScriptedRegistry::failing(&[]);

    let report = PublishOrchestrator::new(&registry, &staging)
        .run(&PublishOptions::default())
        .await
        .unwrap();

    assert!(report.is_success());
    assert!(staging.list().unwrap().is_empty());
}

#[tokio::test]
async fn test_dry_run_publishes_nothing() {
    let dir = tempdir().unwrap();
    let staging = StagingArea::new(dir.path());
    stage(&staging, "alpha");
    stage(&staging, "beta");
    let registry = ScriptedRegistry::failing(&[]);

    let report = PublishOrchestrator::new(&registry, &staging)
        .run(&PublishOptions {
            package: None,
            dry_run: true,
        })
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.planned.len(), 2);
    assert!(report.outcomes.is_empty());
    assert!(registry.calls().is_empty());
    assert_eq!(staging.list().unwrap().len(), 2);
}

#[tokio::test]
async fn test_package_filter() {
    let dir = tempdir().unwrap();
    let staging = StagingArea::new(dir.path());
    stage(&staging, "alpha");
    stage(&staging, "beta");
    let registry = ScriptedRegistry::failing(&[]);
    let orchestrator = PublishOrchestrator::new(&registry, &staging);

    let report = orchestrator
        .run(&PublishOptions {
            package: Some("beta".to_string()),
            dry_run: false,
        })
        .await
        .unwrap();
    assert_eq!(registry.calls(), vec!["beta"]);
    assert_eq!(report.outcomes.len(), 1);

    let err = orchestrator
        .run(&PublishOptions {
            package: Some("missing".to_string()),
            dry_run: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RulepackError::NotFound { .. }));
}

#[tokio::test]
async fn test_empty_staging_is_success() {
    let dir = tempdir().unwrap();
    let staging = StagingArea::new(dir.path().join("none"));
    let registry = ScriptedRegistry::failing(&[]);

    let report = PublishOrchestrator::new(&registry, &staging)
        .run(&PublishOptions::default())
        .await
        .unwrap();
    assert!(report.is_success());
    assert!(report.planned.is_empty());
}
