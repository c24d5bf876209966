//! Batch publishing of staged archives
//!
//! Archives are published one at a time in staging order. A failure is
//! recorded against its archive and the batch moves on; successfully
//! published archives leave the staging area, failed ones stay for a retry.

use rulepack_cache::StagingArea;
use rulepack_core::error::RulepackError;
use rulepack_core::types::{PublishResult, StagedArchive};
use tracing::{error, info, warn};

use crate::client::RegistryClient;
use crate::RegistryResult;

/// What to publish
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Only publish the pending archive of this package
    pub package: Option<String>,
    /// List what would be published without contacting the registry
    pub dry_run: bool,
}

/// Result of publishing one staged archive
#[derive(Debug)]
pub struct ItemOutcome {
    pub archive: StagedArchive,
    pub result: Result<PublishResult, RulepackError>,
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-item outcomes of one batch
#[derive(Debug, Default)]
pub struct PublishReport {
    /// Archives selected for the batch, in publish order
    pub planned: Vec<StagedArchive>,
    /// Empty for a dry run
    pub outcomes: Vec<ItemOutcome>,
    pub dry_run: bool,
}

impl PublishReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// True unless any item failed
    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Publishes everything pending in a staging area to one registry
pub struct PublishOrchestrator<'a> {
    client: &'a dyn RegistryClient,
    staging: &'a StagingArea,
}

impl<'a> PublishOrchestrator<'a> {
    pub fn new(client: &'a dyn RegistryClient, staging: &'a StagingArea) -> Self {
        Self { client, staging }
    }

    fn discover(&self, options: &PublishOptions) -> RegistryResult<Vec<StagedArchive>> {
        let pending = self.staging.list()?;
        match &options.package {
            Some(name) => {
                let selected: Vec<StagedArchive> = pending
                    .into_iter()
                    .filter(|archive| &archive.package_name == name)
                    .collect();
                if selected.is_empty() {
                    return Err(RulepackError::not_found(format!(
                        "staged archive for '{}'",
                        name
                    )));
                }
                Ok(selected)
            },
            None => Ok(pending),
        }
    }

    pub async fn run(&self, options: &PublishOptions) -> RegistryResult<PublishReport> {
        let planned = self.discover(options)?;
        let mut report = PublishReport {
            planned: planned.clone(),
            outcomes: Vec::with_capacity(planned.len()),
            dry_run: options.dry_run,
        };
        if options.dry_run {
            return Ok(report);
        }

        for archive in planned {
            let label = archive.label();
            info!("Publishing {} to '{}'", label, self.client.name());
            let manifest_path = StagingArea::manifest_path(&archive);
            let result = self
                .client
                .publish(&manifest_path, &archive.archive_path)
                .await;

            match &result {
                Ok(published) => {
                    if published.degraded {
                        warn!("{}: {}", label, published.message);
                    }
                    if let Err(e) = self.staging.remove(&archive) {
                        warn!("Published {} but could not unstage it: {}", label, e);
                    }
                },
                Err(e) => error!("Failed to publish {}: {}", label, e),
            }
            report.outcomes.push(ItemOutcome { archive, result });
        }

        info!(
            "Published {}/{} archives to '{}'",
            report.succeeded().count(),
            report.outcomes.len(),
            self.client.name()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests;
